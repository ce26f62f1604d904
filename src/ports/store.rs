//! Record store port traits.
//!
//! All reads and writes go through a [`RecordTx`] handed out by
//! [`Store::atomic`]. Returning `Err` from the closure discards every
//! mutation made through that handle.

use chrono::NaiveDate;
use std::sync::Arc;

use crate::domain::account::{Account, AccountId, NewAccount};
use crate::domain::error::StockbookError;
use crate::domain::instrument::{Instrument, InstrumentId, NewInstrument};
use crate::domain::position::{NewPosition, Position, PositionId};
use crate::domain::price_sample::{NewPriceSample, PriceSample};
use crate::domain::trade::{ActivityEntry, NewTrade, Trade};

pub type StoreResult<T> = Result<T, StockbookError>;

pub trait RecordTx {
    fn create_account(&mut self, account: NewAccount) -> StoreResult<Account>;
    fn account(&mut self, id: AccountId) -> StoreResult<Option<Account>>;
    fn update_account(&mut self, account: &Account) -> StoreResult<()>;
    fn list_accounts(&mut self) -> StoreResult<Vec<Account>>;

    fn create_instrument(&mut self, instrument: NewInstrument) -> StoreResult<Instrument>;
    fn instrument(&mut self, id: InstrumentId) -> StoreResult<Option<Instrument>>;
    fn instrument_by_symbol(&mut self, symbol: &str) -> StoreResult<Option<Instrument>>;
    fn list_instruments(&mut self) -> StoreResult<Vec<Instrument>>;
    fn update_instrument(&mut self, instrument: &Instrument) -> StoreResult<()>;

    fn insert_position(&mut self, position: NewPosition) -> StoreResult<Position>;
    fn position(&mut self, id: PositionId) -> StoreResult<Option<Position>>;
    fn position_for(
        &mut self,
        account_id: AccountId,
        instrument_id: InstrumentId,
    ) -> StoreResult<Option<Position>>;
    fn positions_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<Position>>;
    fn update_position(&mut self, position: &Position) -> StoreResult<()>;
    fn delete_position(&mut self, id: PositionId) -> StoreResult<()>;

    fn append_trade(&mut self, trade: NewTrade) -> StoreResult<Trade>;
    /// Newest first.
    fn trades_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<Trade>>;

    fn append_activity(
        &mut self,
        account_id: AccountId,
        description: &str,
    ) -> StoreResult<ActivityEntry>;
    /// Newest first.
    fn activity_for_account(&mut self, account_id: AccountId) -> StoreResult<Vec<ActivityEntry>>;

    fn append_price_sample(&mut self, sample: NewPriceSample) -> StoreResult<PriceSample>;
    fn daily_sample_exists(
        &mut self,
        instrument_id: InstrumentId,
        date: NaiveDate,
    ) -> StoreResult<bool>;
    /// Samples dated in `[from, to]`, oldest first.
    fn price_samples(
        &mut self,
        instrument_id: InstrumentId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<PriceSample>>;
    fn latest_price_sample(&mut self, instrument_id: InstrumentId)
    -> StoreResult<Option<PriceSample>>;
}

pub trait Store: Send + Sync + 'static {
    /// Run `f` as one atomic unit: all of its writes commit together when it
    /// returns `Ok`, none of them survive when it returns `Err`.
    fn atomic<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn RecordTx) -> StoreResult<T>;
}

/// [`Store::atomic`] on the blocking thread pool, for callers on the async
/// runtime. A unit that panics is reported as a database error.
pub async fn atomic_blocking<S, T, F>(store: &Arc<S>, f: F) -> StoreResult<T>
where
    S: Store,
    T: Send + 'static,
    F: FnOnce(&mut dyn RecordTx) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.atomic(f))
        .await
        .map_err(|e| StockbookError::Database {
            reason: format!("store task failed: {e}"),
        })?
}
