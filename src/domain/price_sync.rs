//! Periodic price refresh for every stored instrument.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::error::StockbookError;
use super::instrument::{Instrument, InstrumentId};
use super::money::round_cash;
use super::price_event::PriceChangeEvent;
use super::price_sample::NewPriceSample;
use super::resolver::FallbackPriceResolver;
use crate::ports::event_sink::EventSink;
use crate::ports::store::{atomic_blocking, Store};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
    /// Another tick was still running.
    pub skipped: bool,
}

/// Clears the in-flight flag however the tick ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PriceSync<S: Store> {
    store: Arc<S>,
    resolver: FallbackPriceResolver,
    sink: Arc<dyn EventSink>,
    concurrency: usize,
    in_flight: AtomicBool,
}

impl<S: Store> PriceSync<S> {
    pub fn new(store: Arc<S>, resolver: FallbackPriceResolver, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            resolver,
            sink,
            concurrency: DEFAULT_CONCURRENCY,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Refresh every instrument once.
    ///
    /// Quotes are fetched concurrently across instruments; each successful
    /// quote is committed in its own atomic unit and published afterwards.
    /// A missing quote leaves the instrument untouched.
    pub async fn tick(&self) -> TickReport {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!("previous price refresh still running, tick skipped");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        }
        let _guard = FlightGuard(&self.in_flight);

        let instruments = match atomic_blocking(&self.store, |tx| tx.list_instruments()).await {
            Ok(list) => list,
            Err(e) => {
                error!(error = %e, "could not list instruments for price refresh");
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            total: instruments.len(),
            ..TickReport::default()
        };

        let resolver = &self.resolver;
        let mut quotes = stream::iter(instruments)
            .map(|instrument| async move {
                let price = resolver.get_price(&instrument.symbol).await;
                (instrument, price)
            })
            .buffer_unordered(self.concurrency);

        while let Some((instrument, price)) = quotes.next().await {
            let Some(price) = price else {
                warn!(symbol = %instrument.symbol, "failed to fetch price");
                report.failed += 1;
                continue;
            };
            match self.apply(instrument.id, &instrument.symbol, price).await {
                Ok(updated) => {
                    debug!(
                        symbol = %updated.symbol,
                        previous = ?updated.previous_price,
                        current = %updated.current_price,
                        "price updated"
                    );
                    report.updated += 1;
                }
                Err(e) => {
                    error!(symbol = %instrument.symbol, error = %e, "failed to store refreshed price");
                    report.failed += 1;
                }
            }
        }

        info!(
            updated = report.updated,
            failed = report.failed,
            "price refresh completed"
        );
        report
    }

    /// Commit one refreshed price, then publish the change.
    async fn apply(
        &self,
        instrument_id: InstrumentId,
        symbol: &str,
        price: Decimal,
    ) -> Result<Instrument, StockbookError> {
        let now = Utc::now();
        let price = round_cash(price);
        let symbol = symbol.to_string();
        let updated = atomic_blocking(&self.store, move |tx| {
            let mut instrument = tx
                .instrument(instrument_id)?
                .ok_or(StockbookError::InstrumentNotFound { symbol })?;
            instrument.reprice(price, now);
            tx.update_instrument(&instrument)?;
            tx.append_price_sample(NewPriceSample::intraday(instrument.id, price, now))?;
            Ok(instrument)
        })
        .await?;

        self.sink
            .publish(&PriceChangeEvent::from_instrument(&updated, now));
        Ok(updated)
    }

    /// Tick every `period` until `shutdown` resolves. A running tick is
    /// always finished before shutdown is observed.
    pub async fn run<F>(&self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(period_secs = period.as_secs(), "price sync started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("price sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::domain::instrument::{MarketCategory, NewInstrument};
    use crate::ports::price_source::PriceSource;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct Fixed(Decimal);

    #[async_trait]
    impl PriceSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
            (symbol != "FAIL").then_some(self.0)
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<PriceChangeEvent>>);

    impl EventSink for Collect {
        fn publish(&self, event: &PriceChangeEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn setup(symbols: &[&str]) -> (Arc<MemoryStore>, Arc<Collect>, PriceSync<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for symbol in symbols {
            store
                .atomic(|tx| {
                    tx.create_instrument(NewInstrument {
                        symbol: symbol.to_string(),
                        name: symbol.to_string(),
                        price: dec!(100.00),
                        market: MarketCategory::Other,
                    })
                })
                .unwrap();
        }
        let source: Arc<dyn PriceSource> = Arc::new(Fixed(dec!(101.00)));
        let sink = Arc::new(Collect::default());
        let sync = PriceSync::new(
            store.clone(),
            FallbackPriceResolver::new(vec![source]),
            sink.clone(),
        );
        (store, sink, sync)
    }

    #[tokio::test]
    async fn tick_counts_successes_and_failures() {
        let (store, sink, sync) = setup(&["AAPL", "FAIL", "MSFT"]);
        let report = sync.tick().await;
        assert_eq!(report.total, 3);
        assert_eq!(report.updated, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(sink.0.lock().unwrap().len(), 2);

        let failed = store
            .atomic(|tx| tx.instrument_by_symbol("FAIL"))
            .unwrap()
            .unwrap();
        assert_eq!(failed.current_price, dec!(100.00));
        assert_eq!(failed.previous_price, None);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let (_store, _sink, sync) = setup(&["AAPL"]);
        sync.in_flight.store(true, Ordering::SeqCst);
        let report = sync.tick().await;
        assert!(report.skipped);
        assert_eq!(report.total, 0);
    }

    #[tokio::test]
    async fn empty_store_tick_is_a_no_op() {
        let (_store, sink, sync) = setup(&[]);
        let report = sync.tick().await;
        assert_eq!(report, TickReport::default());
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
