//! SQLite record store.
//!
//! Decimals are stored as TEXT to keep their exact scale, dates as
//! `%Y-%m-%d` and timestamps as RFC 3339. Each atomic unit is one
//! `BEGIN IMMEDIATE` transaction.

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::account::{Account, AccountId, NewAccount};
use crate::domain::error::StockbookError;
use crate::domain::instrument::{Instrument, InstrumentId, MarketCategory, NewInstrument};
use crate::domain::position::{NewPosition, Position, PositionId};
use crate::domain::price_sample::{NewPriceSample, PriceSample, SampleKind};
use crate::domain::trade::{ActivityEntry, NewTrade, Side, Trade};
use crate::ports::store::{RecordTx, Store, StoreResult};

const DATE_FMT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    cash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS instruments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    current_price TEXT NOT NULL,
    previous_price TEXT,
    market TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    instrument_id INTEGER NOT NULL REFERENCES instruments(id),
    quantity TEXT NOT NULL,
    average_cost TEXT NOT NULL,
    book_value TEXT NOT NULL,
    UNIQUE (account_id, instrument_id)
);
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    instrument_id INTEGER NOT NULL REFERENCES instruments(id),
    side TEXT NOT NULL,
    quantity TEXT NOT NULL,
    unit_price TEXT NOT NULL,
    total_value TEXT NOT NULL,
    executed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_account ON trades(account_id);
CREATE TABLE IF NOT EXISTS activity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    description TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activity_account ON activity(account_id);
CREATE TABLE IF NOT EXISTS price_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument_id INTEGER NOT NULL REFERENCES instruments(id),
    price TEXT NOT NULL,
    open TEXT,
    high TEXT,
    low TEXT,
    close TEXT,
    volume INTEGER,
    sample_date TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    kind TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_samples_instrument_date ON price_samples(instrument_id, sample_date);
CREATE UNIQUE INDEX IF NOT EXISTS idx_samples_daily_unique
    ON price_samples(instrument_id, sample_date) WHERE kind = 'daily';
";

fn db_err(e: r2d2::Error) -> StockbookError {
    StockbookError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> StockbookError {
    StockbookError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn decimal(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion(idx, e))
}

fn opt_decimal(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FMT).map_err(|e| conversion(idx, e))
}

/// Parse an enum column through its `FromStr`.
fn parsed<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|reason| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, reason.into())
    })
}

fn account_row(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        owner: row.get(1)?,
        cash: decimal(row, 2)?,
        created_at: timestamp(row, 3)?,
        updated_at: timestamp(row, 4)?,
    })
}

fn instrument_row(row: &Row) -> rusqlite::Result<Instrument> {
    Ok(Instrument {
        id: row.get(0)?,
        symbol: row.get(1)?,
        name: row.get(2)?,
        current_price: decimal(row, 3)?,
        previous_price: opt_decimal(row, 4)?,
        market: parsed::<MarketCategory>(row, 5)?,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}

fn position_row(row: &Row) -> rusqlite::Result<Position> {
    Ok(Position {
        id: row.get(0)?,
        account_id: row.get(1)?,
        instrument_id: row.get(2)?,
        quantity: decimal(row, 3)?,
        average_cost: decimal(row, 4)?,
        book_value: decimal(row, 5)?,
    })
}

fn trade_row(row: &Row) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        account_id: row.get(1)?,
        instrument_id: row.get(2)?,
        side: parsed::<Side>(row, 3)?,
        quantity: decimal(row, 4)?,
        unit_price: decimal(row, 5)?,
        total_value: decimal(row, 6)?,
        executed_at: timestamp(row, 7)?,
    })
}

fn activity_row(row: &Row) -> rusqlite::Result<ActivityEntry> {
    Ok(ActivityEntry {
        id: row.get(0)?,
        account_id: row.get(1)?,
        description: row.get(2)?,
        recorded_at: timestamp(row, 3)?,
    })
}

fn sample_row(row: &Row) -> rusqlite::Result<PriceSample> {
    Ok(PriceSample {
        id: row.get(0)?,
        instrument_id: row.get(1)?,
        price: decimal(row, 2)?,
        open: opt_decimal(row, 3)?,
        high: opt_decimal(row, 4)?,
        low: opt_decimal(row, 5)?,
        close: opt_decimal(row, 6)?,
        volume: row.get(7)?,
        sample_date: date(row, 8)?,
        recorded_at: timestamp(row, 9)?,
        kind: parsed::<SampleKind>(row, 10)?,
    })
}

const ACCOUNT_COLS: &str = "id, owner, cash, created_at, updated_at";
const INSTRUMENT_COLS: &str =
    "id, symbol, name, current_price, previous_price, market, created_at, updated_at";
const POSITION_COLS: &str = "id, account_id, instrument_id, quantity, average_cost, book_value";
const TRADE_COLS: &str =
    "id, account_id, instrument_id, side, quantity, unit_price, total_value, executed_at";
const SAMPLE_COLS: &str =
    "id, instrument_id, price, open, high, low, close, volume, sample_date, recorded_at, kind";

fn opt_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn open(path: &str, pool_size: u32) -> Result<Self, StockbookError> {
        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, StockbookError> {
        let manager =
            SqliteConnectionManager::memory().with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StockbookError> {
        self.pool.get().map_err(db_err)
    }

    pub fn initialize_schema(&self) -> Result<(), StockbookError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }
}

impl Store for SqliteStore {
    fn atomic<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn RecordTx) -> StoreResult<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;
        // Dropping `tx` without commit rolls back.
        let out = f(&mut SqliteTx { conn: &*tx })?;
        tx.commit().map_err(query_err)?;
        Ok(out)
    }
}

struct SqliteTx<'c> {
    conn: &'c Connection,
}

impl SqliteTx<'_> {
    fn one<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row) -> rusqlite::Result<T>,
    ) -> StoreResult<Option<T>> {
        self.conn
            .query_row(sql, params, map)
            .optional()
            .map_err(query_err)
    }

    fn many<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: fn(&Row) -> rusqlite::Result<T>,
    ) -> StoreResult<Vec<T>> {
        let mut stmt = self.conn.prepare(sql).map_err(query_err)?;
        let rows = stmt.query_map(params, map).map_err(query_err)?;
        rows.collect::<rusqlite::Result<Vec<T>>>().map_err(query_err)
    }

    /// Run an UPDATE/DELETE that must touch exactly one row.
    fn touch_one(&self, sql: &str, params: impl rusqlite::Params, what: &str, id: i64) -> StoreResult<()> {
        match self.conn.execute(sql, params).map_err(query_err)? {
            0 => Err(StockbookError::DatabaseQuery {
                reason: format!("{what} {id} does not exist"),
            }),
            _ => Ok(()),
        }
    }
}

impl RecordTx for SqliteTx<'_> {
    fn create_account(&mut self, account: NewAccount) -> StoreResult<Account> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO accounts (owner, cash, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                params![account.owner, account.cash.to_string(), now.to_rfc3339()],
            )
            .map_err(query_err)?;
        Ok(Account {
            id: self.conn.last_insert_rowid(),
            owner: account.owner,
            cash: account.cash,
            created_at: now,
            updated_at: now,
        })
    }

    fn account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        self.one(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = ?1"),
            params![id],
            account_row,
        )
    }

    fn update_account(&mut self, account: &Account) -> StoreResult<()> {
        self.touch_one(
            "UPDATE accounts SET owner = ?2, cash = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                account.id,
                account.owner,
                account.cash.to_string(),
                account.updated_at.to_rfc3339()
            ],
            "account",
            account.id,
        )
    }

    fn list_accounts(&mut self) -> StoreResult<Vec<Account>> {
        self.many(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts ORDER BY id"),
            [],
            account_row,
        )
    }

    fn create_instrument(&mut self, instrument: NewInstrument) -> StoreResult<Instrument> {
        let now = Utc::now();
        let inserted = self.conn.execute(
            "INSERT INTO instruments (symbol, name, current_price, previous_price, market, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?5)",
            params![
                instrument.symbol,
                instrument.name,
                instrument.price.to_string(),
                instrument.market.as_str(),
                now.to_rfc3339()
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StockbookError::DuplicateSymbol {
                    symbol: instrument.symbol,
                });
            }
            Err(e) => return Err(query_err(e)),
        }
        Ok(Instrument {
            id: self.conn.last_insert_rowid(),
            symbol: instrument.symbol,
            name: instrument.name,
            current_price: instrument.price,
            previous_price: None,
            market: instrument.market,
            created_at: now,
            updated_at: now,
        })
    }

    fn instrument(&mut self, id: InstrumentId) -> StoreResult<Option<Instrument>> {
        self.one(
            &format!("SELECT {INSTRUMENT_COLS} FROM instruments WHERE id = ?1"),
            params![id],
            instrument_row,
        )
    }

    fn instrument_by_symbol(&mut self, symbol: &str) -> StoreResult<Option<Instrument>> {
        self.one(
            &format!("SELECT {INSTRUMENT_COLS} FROM instruments WHERE symbol = ?1"),
            params![symbol],
            instrument_row,
        )
    }

    fn list_instruments(&mut self) -> StoreResult<Vec<Instrument>> {
        self.many(
            &format!("SELECT {INSTRUMENT_COLS} FROM instruments ORDER BY id"),
            [],
            instrument_row,
        )
    }

    fn update_instrument(&mut self, instrument: &Instrument) -> StoreResult<()> {
        self.touch_one(
            "UPDATE instruments
             SET name = ?2, current_price = ?3, previous_price = ?4, market = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                instrument.id,
                instrument.name,
                instrument.current_price.to_string(),
                opt_text(instrument.previous_price),
                instrument.market.as_str(),
                instrument.updated_at.to_rfc3339()
            ],
            "instrument",
            instrument.id,
        )
    }

    fn insert_position(&mut self, position: NewPosition) -> StoreResult<Position> {
        let book_value = position.book_value();
        self.conn
            .execute(
                "INSERT INTO positions (account_id, instrument_id, quantity, average_cost, book_value)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    position.account_id,
                    position.instrument_id,
                    position.quantity.to_string(),
                    position.average_cost.to_string(),
                    book_value.to_string()
                ],
            )
            .map_err(query_err)?;
        Ok(Position {
            id: self.conn.last_insert_rowid(),
            account_id: position.account_id,
            instrument_id: position.instrument_id,
            quantity: position.quantity,
            average_cost: position.average_cost,
            book_value,
        })
    }

    fn position(&mut self, id: PositionId) -> StoreResult<Option<Position>> {
        self.one(
            &format!("SELECT {POSITION_COLS} FROM positions WHERE id = ?1"),
            params![id],
            position_row,
        )
    }

    fn position_for(
        &mut self,
        account_id: AccountId,
        instrument_id: InstrumentId,
    ) -> StoreResult<Option<Position>> {
        self.one(
            &format!(
                "SELECT {POSITION_COLS} FROM positions WHERE account_id = ?1 AND instrument_id = ?2"
            ),
            params![account_id, instrument_id],
            position_row,
        )
    }

    fn positions_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<Position>> {
        self.many(
            &format!("SELECT {POSITION_COLS} FROM positions WHERE account_id = ?1 ORDER BY id"),
            params![account_id],
            position_row,
        )
    }

    fn update_position(&mut self, position: &Position) -> StoreResult<()> {
        self.touch_one(
            "UPDATE positions SET quantity = ?2, average_cost = ?3, book_value = ?4 WHERE id = ?1",
            params![
                position.id,
                position.quantity.to_string(),
                position.average_cost.to_string(),
                position.book_value.to_string()
            ],
            "position",
            position.id,
        )
    }

    fn delete_position(&mut self, id: PositionId) -> StoreResult<()> {
        self.touch_one("DELETE FROM positions WHERE id = ?1", params![id], "position", id)
    }

    fn append_trade(&mut self, trade: NewTrade) -> StoreResult<Trade> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO trades (account_id, instrument_id, side, quantity, unit_price, total_value, executed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    trade.account_id,
                    trade.instrument_id,
                    trade.side.as_str(),
                    trade.quantity.to_string(),
                    trade.unit_price.to_string(),
                    trade.total_value.to_string(),
                    now.to_rfc3339()
                ],
            )
            .map_err(query_err)?;
        Ok(Trade {
            id: self.conn.last_insert_rowid(),
            account_id: trade.account_id,
            instrument_id: trade.instrument_id,
            side: trade.side,
            quantity: trade.quantity,
            unit_price: trade.unit_price,
            total_value: trade.total_value,
            executed_at: now,
        })
    }

    fn trades_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<Trade>> {
        self.many(
            &format!("SELECT {TRADE_COLS} FROM trades WHERE account_id = ?1 ORDER BY id DESC"),
            params![account_id],
            trade_row,
        )
    }

    fn append_activity(
        &mut self,
        account_id: AccountId,
        description: &str,
    ) -> StoreResult<ActivityEntry> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO activity (account_id, description, recorded_at) VALUES (?1, ?2, ?3)",
                params![account_id, description, now.to_rfc3339()],
            )
            .map_err(query_err)?;
        Ok(ActivityEntry {
            id: self.conn.last_insert_rowid(),
            account_id,
            description: description.to_string(),
            recorded_at: now,
        })
    }

    fn activity_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<ActivityEntry>> {
        self.many(
            "SELECT id, account_id, description, recorded_at
             FROM activity WHERE account_id = ?1 ORDER BY id DESC",
            params![account_id],
            activity_row,
        )
    }

    fn append_price_sample(&mut self, sample: NewPriceSample) -> StoreResult<PriceSample> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO price_samples
                 (instrument_id, price, open, high, low, close, volume, sample_date, recorded_at, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    sample.instrument_id,
                    sample.price.to_string(),
                    opt_text(sample.open),
                    opt_text(sample.high),
                    opt_text(sample.low),
                    opt_text(sample.close),
                    sample.volume,
                    sample.sample_date.format(DATE_FMT).to_string(),
                    now.to_rfc3339(),
                    sample.kind.as_str()
                ],
            )
            .map_err(query_err)?;
        Ok(PriceSample {
            id: self.conn.last_insert_rowid(),
            instrument_id: sample.instrument_id,
            price: sample.price,
            open: sample.open,
            high: sample.high,
            low: sample.low,
            close: sample.close,
            volume: sample.volume,
            sample_date: sample.sample_date,
            recorded_at: now,
            kind: sample.kind,
        })
    }

    fn daily_sample_exists(
        &mut self,
        instrument_id: InstrumentId,
        date: NaiveDate,
    ) -> StoreResult<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM price_samples
                 WHERE instrument_id = ?1 AND sample_date = ?2 AND kind = 'daily')",
                params![instrument_id, date.format(DATE_FMT).to_string()],
                |row| row.get(0),
            )
            .map_err(query_err)
    }

    fn price_samples(
        &mut self,
        instrument_id: InstrumentId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<PriceSample>> {
        self.many(
            &format!(
                "SELECT {SAMPLE_COLS} FROM price_samples
                 WHERE instrument_id = ?1 AND sample_date >= ?2 AND sample_date <= ?3
                 ORDER BY sample_date ASC, id ASC"
            ),
            params![
                instrument_id,
                from.format(DATE_FMT).to_string(),
                to.format(DATE_FMT).to_string()
            ],
            sample_row,
        )
    }

    fn latest_price_sample(
        &mut self,
        instrument_id: InstrumentId,
    ) -> StoreResult<Option<PriceSample>> {
        self.one(
            &format!(
                "SELECT {SAMPLE_COLS} FROM price_samples WHERE instrument_id = ?1
                 ORDER BY sample_date DESC, id DESC LIMIT 1"
            ),
            params![instrument_id],
            sample_row,
        )
    }
}
