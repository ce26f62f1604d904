//! In-process record store.
//!
//! Units are serialised by the table mutex. Each unit records a checkpoint
//! first: copies of the keyed tables and the lengths of the append-only
//! logs. The checkpoint is restored unless the unit returns `Ok`, including
//! when it panics.

use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::domain::account::{Account, AccountId, NewAccount};
use crate::domain::error::StockbookError;
use crate::domain::instrument::{Instrument, InstrumentId, NewInstrument};
use crate::domain::position::{NewPosition, Position, PositionId};
use crate::domain::price_sample::{NewPriceSample, PriceSample, SampleKind};
use crate::domain::trade::{ActivityEntry, NewTrade, Trade};
use crate::ports::store::{RecordTx, Store, StoreResult};

#[derive(Debug, Clone, Default)]
struct Sequences {
    account: i64,
    instrument: i64,
    position: i64,
    trade: i64,
    activity: i64,
    sample: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Debug, Clone, Default)]
struct Tables {
    seq: Sequences,
    accounts: BTreeMap<AccountId, Account>,
    instruments: BTreeMap<InstrumentId, Instrument>,
    positions: BTreeMap<PositionId, Position>,
    trades: Vec<Trade>,
    activity: Vec<ActivityEntry>,
    samples: Vec<PriceSample>,
}

impl Tables {
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            seq: self.seq.clone(),
            accounts: self.accounts.clone(),
            instruments: self.instruments.clone(),
            positions: self.positions.clone(),
            trades: self.trades.len(),
            activity: self.activity.len(),
            samples: self.samples.len(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.seq = checkpoint.seq;
        self.accounts = checkpoint.accounts;
        self.instruments = checkpoint.instruments;
        self.positions = checkpoint.positions;
        self.trades.truncate(checkpoint.trades);
        self.activity.truncate(checkpoint.activity);
        self.samples.truncate(checkpoint.samples);
    }
}

/// State before a unit started. Trades, activity and samples are only ever
/// appended, so their lengths are enough to undo them.
struct Checkpoint {
    seq: Sequences,
    accounts: BTreeMap<AccountId, Account>,
    instruments: BTreeMap<InstrumentId, Instrument>,
    positions: BTreeMap<PositionId, Position>,
    trades: usize,
    activity: usize,
    samples: usize,
}

/// Restores the checkpoint on drop unless committed.
struct Unit<'a> {
    tables: &'a mut Tables,
    checkpoint: Option<Checkpoint>,
}

impl Drop for Unit<'_> {
    fn drop(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.tables.restore(checkpoint);
        }
    }
}

fn missing(kind: &str, id: i64) -> StockbookError {
    StockbookError::DatabaseQuery {
        reason: format!("{kind} {id} does not exist"),
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn atomic<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn RecordTx) -> StoreResult<T>,
    {
        // A panicking unit restores its checkpoint while unwinding, so the
        // tables behind a poisoned lock are consistent.
        let mut shared = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let checkpoint = shared.checkpoint();
        let mut unit = Unit {
            tables: &mut *shared,
            checkpoint: Some(checkpoint),
        };
        let out = f(&mut *unit.tables)?;
        unit.checkpoint = None;
        Ok(out)
    }
}

impl RecordTx for Tables {
    fn create_account(&mut self, account: NewAccount) -> StoreResult<Account> {
        let now = Utc::now();
        let record = Account {
            id: next(&mut self.seq.account),
            owner: account.owner,
            cash: account.cash,
            created_at: now,
            updated_at: now,
        };
        self.accounts.insert(record.id, record.clone());
        Ok(record)
    }

    fn account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.accounts.get(&id).cloned())
    }

    fn update_account(&mut self, account: &Account) -> StoreResult<()> {
        let slot = self
            .accounts
            .get_mut(&account.id)
            .ok_or_else(|| missing("account", account.id))?;
        *slot = account.clone();
        Ok(())
    }

    fn list_accounts(&mut self) -> StoreResult<Vec<Account>> {
        Ok(self.accounts.values().cloned().collect())
    }

    fn create_instrument(&mut self, instrument: NewInstrument) -> StoreResult<Instrument> {
        if self
            .instruments
            .values()
            .any(|i| i.symbol == instrument.symbol)
        {
            return Err(StockbookError::DuplicateSymbol {
                symbol: instrument.symbol,
            });
        }
        let now = Utc::now();
        let record = Instrument {
            id: next(&mut self.seq.instrument),
            symbol: instrument.symbol,
            name: instrument.name,
            current_price: instrument.price,
            previous_price: None,
            market: instrument.market,
            created_at: now,
            updated_at: now,
        };
        self.instruments.insert(record.id, record.clone());
        Ok(record)
    }

    fn instrument(&mut self, id: InstrumentId) -> StoreResult<Option<Instrument>> {
        Ok(self.instruments.get(&id).cloned())
    }

    fn instrument_by_symbol(&mut self, symbol: &str) -> StoreResult<Option<Instrument>> {
        Ok(self
            .instruments
            .values()
            .find(|i| i.symbol == symbol)
            .cloned())
    }

    fn list_instruments(&mut self) -> StoreResult<Vec<Instrument>> {
        Ok(self.instruments.values().cloned().collect())
    }

    fn update_instrument(&mut self, instrument: &Instrument) -> StoreResult<()> {
        let slot = self
            .instruments
            .get_mut(&instrument.id)
            .ok_or_else(|| missing("instrument", instrument.id))?;
        *slot = instrument.clone();
        Ok(())
    }

    fn insert_position(&mut self, position: NewPosition) -> StoreResult<Position> {
        let book_value = position.book_value();
        let record = Position {
            id: next(&mut self.seq.position),
            account_id: position.account_id,
            instrument_id: position.instrument_id,
            quantity: position.quantity,
            average_cost: position.average_cost,
            book_value,
        };
        self.positions.insert(record.id, record.clone());
        Ok(record)
    }

    fn position(&mut self, id: PositionId) -> StoreResult<Option<Position>> {
        Ok(self.positions.get(&id).cloned())
    }

    fn position_for(
        &mut self,
        account_id: AccountId,
        instrument_id: InstrumentId,
    ) -> StoreResult<Option<Position>> {
        Ok(self
            .positions
            .values()
            .find(|p| p.account_id == account_id && p.instrument_id == instrument_id)
            .cloned())
    }

    fn positions_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<Position>> {
        Ok(self
            .positions
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect())
    }

    fn update_position(&mut self, position: &Position) -> StoreResult<()> {
        let slot = self
            .positions
            .get_mut(&position.id)
            .ok_or_else(|| missing("position", position.id))?;
        *slot = position.clone();
        Ok(())
    }

    fn delete_position(&mut self, id: PositionId) -> StoreResult<()> {
        self.positions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| missing("position", id))
    }

    fn append_trade(&mut self, trade: NewTrade) -> StoreResult<Trade> {
        let record = Trade {
            id: next(&mut self.seq.trade),
            account_id: trade.account_id,
            instrument_id: trade.instrument_id,
            side: trade.side,
            quantity: trade.quantity,
            unit_price: trade.unit_price,
            total_value: trade.total_value,
            executed_at: Utc::now(),
        };
        self.trades.push(record.clone());
        Ok(record)
    }

    fn trades_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<Trade>> {
        Ok(self
            .trades
            .iter()
            .rev()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    fn append_activity(
        &mut self,
        account_id: AccountId,
        description: &str,
    ) -> StoreResult<ActivityEntry> {
        let record = ActivityEntry {
            id: next(&mut self.seq.activity),
            account_id,
            description: description.to_string(),
            recorded_at: Utc::now(),
        };
        self.activity.push(record.clone());
        Ok(record)
    }

    fn activity_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<ActivityEntry>> {
        Ok(self
            .activity
            .iter()
            .rev()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect())
    }

    fn append_price_sample(&mut self, sample: NewPriceSample) -> StoreResult<PriceSample> {
        if sample.kind == SampleKind::Daily
            && self.daily_sample_exists(sample.instrument_id, sample.sample_date)?
        {
            return Err(StockbookError::DatabaseQuery {
                reason: format!(
                    "daily sample for instrument {} on {} already exists",
                    sample.instrument_id, sample.sample_date
                ),
            });
        }
        let record = PriceSample {
            id: next(&mut self.seq.sample),
            instrument_id: sample.instrument_id,
            price: sample.price,
            open: sample.open,
            high: sample.high,
            low: sample.low,
            close: sample.close,
            volume: sample.volume,
            sample_date: sample.sample_date,
            recorded_at: Utc::now(),
            kind: sample.kind,
        };
        self.samples.push(record.clone());
        Ok(record)
    }

    fn daily_sample_exists(
        &mut self,
        instrument_id: InstrumentId,
        date: NaiveDate,
    ) -> StoreResult<bool> {
        Ok(self.samples.iter().any(|s| {
            s.instrument_id == instrument_id && s.sample_date == date && s.kind == SampleKind::Daily
        }))
    }

    fn price_samples(
        &mut self,
        instrument_id: InstrumentId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<PriceSample>> {
        let mut rows: Vec<PriceSample> = self
            .samples
            .iter()
            .filter(|s| s.instrument_id == instrument_id && s.sample_date >= from && s.sample_date <= to)
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.sample_date, s.id));
        Ok(rows)
    }

    fn latest_price_sample(
        &mut self,
        instrument_id: InstrumentId,
    ) -> StoreResult<Option<PriceSample>> {
        Ok(self
            .samples
            .iter()
            .filter(|s| s.instrument_id == instrument_id)
            .max_by_key(|s| (s.sample_date, s.id))
            .cloned())
    }
}
