//! Trading engine: buy/sell orders, portfolio valuation and account
//! administration.
//!
//! Every mutating operation runs as a single [`Store::atomic`] unit, and
//! operations on the same account are serialised by [`AccountLocks`].

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::account::{Account, AccountId, NewAccount};
use super::error::StockbookError;
use super::instrument::{Instrument, MarketCategory, NewInstrument};
use super::ledger::{apply_buy, apply_sell, SellEffect};
use super::money::{in_range, is_whole_fraction, round_cash, shares_for, MIN_FRACTION};
use super::position::{Position, PositionId};
use super::resolver::FallbackPriceResolver;
use super::symbol;
use super::trade::{describe, ActivityEntry, NewTrade, Side, Trade};
use crate::ports::store::{atomic_blocking, RecordTx, Store};

/// Instruments created by [`TradingEngine::seed_instruments`] on an empty store.
pub const SEED_INSTRUMENTS: &[(&str, &str, MarketCategory, Decimal)] = &[
    ("AAPL", "Apple Inc.", MarketCategory::Nasdaq, dec!(150.00)),
    ("MSFT", "Microsoft Corporation", MarketCategory::Nasdaq, dec!(300.00)),
    ("TSLA", "Tesla Inc.", MarketCategory::Nasdaq, dec!(200.00)),
];

/// One async mutex per account, created on first use.
#[derive(Default)]
pub struct AccountLocks {
    inner: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountLocks {
    pub fn handle(&self, account_id: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(account_id).or_default().clone()
    }
}

#[derive(Debug, Clone)]
pub struct BuyOrder {
    pub symbol: String,
    /// Cash to spend; the debit is `shares * price`, never more.
    pub investment: Decimal,
    pub price_override: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct SellOrder {
    pub position_id: PositionId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReceipt {
    pub trade: Trade,
    pub symbol: String,
    pub balance: Decimal,
    /// `None` when a sell closed the position.
    pub position: Option<Position>,
    /// `(price - average_cost) * quantity` for sells.
    pub realized_pnl: Option<Decimal>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionDetail {
    pub position_id: PositionId,
    pub symbol: String,
    pub name: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub book_value: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub account_id: AccountId,
    pub owner: String,
    pub available_balance: Decimal,
    pub total_investment: Decimal,
    pub current_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub positions: Vec<PositionDetail>,
}

pub struct TradingEngine<S: Store> {
    store: Arc<S>,
    resolver: FallbackPriceResolver,
    min_fraction: Decimal,
    locks: AccountLocks,
}

fn load_account(tx: &mut dyn RecordTx, id: AccountId) -> Result<Account, StockbookError> {
    tx.account(id)?
        .ok_or(StockbookError::AccountNotFound { id })
}

fn positive(amount: Decimal, what: &str) -> Result<Decimal, StockbookError> {
    if amount <= Decimal::ZERO {
        return Err(StockbookError::InvalidAmount {
            reason: format!("{what} must be positive, got {amount}"),
        });
    }
    Ok(amount)
}

impl<S: Store> TradingEngine<S> {
    pub fn new(store: Arc<S>, resolver: FallbackPriceResolver) -> Self {
        Self {
            store,
            resolver,
            min_fraction: MIN_FRACTION,
            locks: AccountLocks::default(),
        }
    }

    pub fn with_min_fraction(mut self, min_fraction: Decimal) -> Self {
        self.min_fraction = min_fraction;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn open_account(
        &self,
        owner: &str,
        initial_balance: Decimal,
    ) -> Result<Account, StockbookError> {
        let cash = round_cash(initial_balance);
        if cash < Decimal::ZERO {
            return Err(StockbookError::InvalidAmount {
                reason: format!("initial balance must not be negative, got {cash}"),
            });
        }
        let account = self.store.atomic(|tx| {
            tx.create_account(NewAccount {
                owner: owner.to_string(),
                cash,
            })
        })?;
        info!(account_id = account.id, owner, %cash, "account opened");
        Ok(account)
    }

    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<Account, StockbookError> {
        let amount = positive(round_cash(amount), "deposit")?;
        let lock = self.locks.handle(account_id);
        let _guard = lock.lock().await;

        atomic_blocking(&self.store, move |tx| {
            let mut account = load_account(tx, account_id)?;
            account.cash = in_range(account.cash.checked_add(amount), "balance")?;
            account.updated_at = Utc::now();
            tx.update_account(&account)?;
            Ok(account)
        })
        .await
    }

    pub fn add_instrument(
        &self,
        symbol: &str,
        name: Option<&str>,
        market: MarketCategory,
        price: Decimal,
    ) -> Result<Instrument, StockbookError> {
        let symbol = symbol::normalize(symbol);
        if !symbol::is_instrument_symbol(&symbol) {
            return Err(StockbookError::InvalidSymbol { symbol });
        }
        let price = positive(round_cash(price), "price")?;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| symbol::company_name(&symbol));

        let instrument = self.store.atomic(|tx| {
            tx.create_instrument(NewInstrument {
                symbol,
                name,
                price,
                market,
            })
        })?;
        info!(symbol = %instrument.symbol, %price, "instrument added");
        Ok(instrument)
    }

    /// Create the default instruments when none exist yet. Returns how many
    /// were created.
    pub fn seed_instruments(&self) -> Result<usize, StockbookError> {
        self.store.atomic(|tx| {
            if !tx.list_instruments()?.is_empty() {
                debug!("instruments already present, seed skipped");
                return Ok(0);
            }
            for (symbol, name, market, price) in SEED_INSTRUMENTS {
                tx.create_instrument(NewInstrument {
                    symbol: symbol.to_string(),
                    name: name.to_string(),
                    price: *price,
                    market: *market,
                })?;
            }
            Ok(SEED_INSTRUMENTS.len())
        })
    }

    pub fn accounts(&self) -> Result<Vec<Account>, StockbookError> {
        self.store.atomic(|tx| tx.list_accounts())
    }

    pub fn instruments(&self) -> Result<Vec<Instrument>, StockbookError> {
        self.store.atomic(|tx| tx.list_instruments())
    }

    pub async fn buy(
        &self,
        account_id: AccountId,
        order: BuyOrder,
    ) -> Result<TradeReceipt, StockbookError> {
        let symbol = symbol::normalize(&order.symbol);
        if !symbol::is_instrument_symbol(&symbol) {
            return Err(StockbookError::InvalidSymbol { symbol });
        }
        let investment = positive(round_cash(order.investment), "investment")?;
        let price_override = order
            .price_override
            .map(|p| positive(round_cash(p), "price override"))
            .transpose()?;

        let lock = self.locks.handle(account_id);
        let _guard = lock.lock().await;

        let lookup = symbol.clone();
        let known = atomic_blocking(&self.store, move |tx| tx.instrument_by_symbol(&lookup)).await?;
        let pending = match known {
            Some(_) => None,
            None => Some(self.discover(&symbol).await?),
        };

        let min_fraction = self.min_fraction;
        let receipt = atomic_blocking(&self.store, move |tx| {
            let mut account = load_account(tx, account_id)?;
            let instrument = match (tx.instrument_by_symbol(&symbol)?, pending) {
                (Some(existing), _) => existing,
                (None, Some(new)) => tx.create_instrument(new)?,
                (None, None) => {
                    return Err(StockbookError::InstrumentNotFound {
                        symbol: symbol.clone(),
                    })
                }
            };

            let unit_price = price_override.unwrap_or(instrument.current_price);
            if unit_price <= Decimal::ZERO {
                return Err(StockbookError::PriceUnavailable {
                    symbol: symbol.clone(),
                });
            }
            let quantity = shares_for(investment, unit_price)?;
            if quantity < min_fraction {
                return Err(StockbookError::AmountTooSmall {
                    minimum: round_cash(min_fraction * unit_price),
                });
            }
            if !account.can_afford(investment) {
                return Err(StockbookError::InsufficientBalance {
                    available: account.cash,
                    requested: investment,
                });
            }

            let cost = round_cash(in_range(quantity.checked_mul(unit_price), "trade value")?);
            account.cash -= cost;
            account.updated_at = Utc::now();
            tx.update_account(&account)?;

            let position = apply_buy(tx, account_id, instrument.id, quantity, unit_price)?;
            let trade = tx.append_trade(NewTrade {
                account_id,
                instrument_id: instrument.id,
                side: Side::Buy,
                quantity,
                unit_price,
                total_value: cost,
            })?;
            let description = describe(Side::Buy, quantity, &instrument.symbol, unit_price, cost);
            tx.append_activity(account_id, &description)?;

            Ok(TradeReceipt {
                trade,
                symbol: instrument.symbol,
                balance: account.cash,
                position: Some(position),
                realized_pnl: None,
                description,
            })
        })
        .await?;

        info!(
            account_id,
            symbol = %receipt.symbol,
            quantity = %receipt.trade.quantity,
            price = %receipt.trade.unit_price,
            total = %receipt.trade.total_value,
            "buy executed"
        );
        Ok(receipt)
    }

    /// Validate and quote a symbol with no stored instrument.
    async fn discover(&self, symbol: &str) -> Result<NewInstrument, StockbookError> {
        let unknown = || StockbookError::UnknownSymbol {
            symbol: symbol.to_string(),
        };
        if !self.resolver.is_valid_symbol(symbol) {
            return Err(unknown());
        }
        let Some(price) = self.resolver.get_price(symbol).await else {
            warn!(symbol, "no source could quote unknown symbol");
            return Err(unknown());
        };
        Ok(NewInstrument {
            symbol: symbol.to_string(),
            name: symbol::company_name(symbol),
            price: round_cash(price),
            market: MarketCategory::Other,
        })
    }

    pub async fn sell(
        &self,
        account_id: AccountId,
        order: SellOrder,
    ) -> Result<TradeReceipt, StockbookError> {
        let quantity = positive(order.quantity, "quantity")?;
        if quantity < self.min_fraction {
            return Err(StockbookError::InvalidAmount {
                reason: format!("quantity below the minimum tradable fraction {}", self.min_fraction),
            });
        }
        if !is_whole_fraction(quantity) {
            return Err(StockbookError::InvalidAmount {
                reason: format!("quantity {quantity} has more than 4 decimal places"),
            });
        }

        let lock = self.locks.handle(account_id);
        let _guard = lock.lock().await;

        let receipt = atomic_blocking(&self.store, move |tx| {
            let position = tx
                .position(order.position_id)?
                .ok_or(StockbookError::PositionNotFound {
                    id: order.position_id,
                })?;
            if position.account_id != account_id {
                return Err(StockbookError::NotOwner {
                    position_id: position.id,
                    account_id,
                });
            }
            let mut account = load_account(tx, account_id)?;
            let instrument = tx.instrument(position.instrument_id)?.ok_or_else(|| {
                StockbookError::InstrumentNotFound {
                    symbol: format!("#{}", position.instrument_id),
                }
            })?;

            let unit_price = instrument.current_price;
            let (remaining, average_cost) =
                match apply_sell(tx, account_id, instrument.id, quantity)? {
                    SellEffect::Reduced(p) => {
                        let avg = p.average_cost;
                        (Some(p), avg)
                    }
                    SellEffect::Closed { average_cost } => (None, average_cost),
                };

            let proceeds = round_cash(in_range(quantity.checked_mul(unit_price), "trade value")?);
            account.cash = in_range(account.cash.checked_add(proceeds), "balance")?;
            account.updated_at = Utc::now();
            tx.update_account(&account)?;

            let trade = tx.append_trade(NewTrade {
                account_id,
                instrument_id: instrument.id,
                side: Side::Sell,
                quantity,
                unit_price,
                total_value: proceeds,
            })?;
            let description =
                describe(Side::Sell, quantity, &instrument.symbol, unit_price, proceeds);
            tx.append_activity(account_id, &description)?;

            Ok(TradeReceipt {
                trade,
                symbol: instrument.symbol,
                balance: account.cash,
                position: remaining,
                realized_pnl: Some(round_cash((unit_price - average_cost) * quantity)),
                description,
            })
        })
        .await?;

        info!(
            account_id,
            symbol = %receipt.symbol,
            quantity = %receipt.trade.quantity,
            price = %receipt.trade.unit_price,
            total = %receipt.trade.total_value,
            "sell executed"
        );
        Ok(receipt)
    }

    pub fn portfolio_summary(
        &self,
        account_id: AccountId,
    ) -> Result<PortfolioSummary, StockbookError> {
        self.store.atomic(|tx| {
            let account = load_account(tx, account_id)?;
            let mut positions = Vec::new();
            for position in tx.positions_for_account(account_id)? {
                let Some(instrument) = tx.instrument(position.instrument_id)? else {
                    warn!(position_id = position.id, "position references missing instrument");
                    continue;
                };
                let price = instrument.current_price;
                positions.push(PositionDetail {
                    position_id: position.id,
                    symbol: instrument.symbol,
                    name: instrument.name,
                    quantity: position.quantity,
                    average_cost: position.average_cost,
                    book_value: position.book_value,
                    current_price: price,
                    market_value: position.market_value(price),
                    unrealized_pnl: position.unrealized_pnl(price),
                });
            }
            positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

            let total_investment: Decimal = positions.iter().map(|p| p.book_value).sum();
            let current_value: Decimal = positions.iter().map(|p| p.market_value).sum();
            Ok(PortfolioSummary {
                account_id,
                owner: account.owner,
                available_balance: account.cash,
                total_investment,
                current_value,
                unrealized_pnl: current_value - total_investment,
                positions,
            })
        })
    }

    pub fn trades(&self, account_id: AccountId) -> Result<Vec<Trade>, StockbookError> {
        self.store.atomic(|tx| {
            load_account(tx, account_id)?;
            tx.trades_for_account(account_id)
        })
    }

    pub fn activity(&self, account_id: AccountId) -> Result<Vec<ActivityEntry>, StockbookError> {
        self.store.atomic(|tx| {
            load_account(tx, account_id)?;
            tx.activity_for_account(account_id)
        })
    }
}
