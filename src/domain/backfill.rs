//! Historical daily bar backfill.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::StockbookError;
use super::instrument::Instrument;
use super::ohlcv::clip_to_range;
use super::price_sample::NewPriceSample;
use super::resolver::FallbackPriceResolver;
use super::schedule::BackfillSchedule;
use crate::ports::store::{atomic_blocking, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BackfillOutcome {
    Stored { inserted: usize, existing: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentBackfill {
    pub symbol: String,
    pub outcome: BackfillOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub instruments: Vec<InstrumentBackfill>,
}

impl BackfillReport {
    pub fn inserted(&self) -> usize {
        self.instruments
            .iter()
            .map(|i| match i.outcome {
                BackfillOutcome::Stored { inserted, .. } => inserted,
                BackfillOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.instruments
            .iter()
            .filter(|i| matches!(i.outcome, BackfillOutcome::Failed { .. }))
            .count()
    }
}

pub struct HistoricalBackfill<S: Store> {
    store: Arc<S>,
    resolver: FallbackPriceResolver,
}

impl<S: Store> HistoricalBackfill<S> {
    pub fn new(store: Arc<S>, resolver: FallbackPriceResolver) -> Self {
        Self { store, resolver }
    }

    /// Backfill every stored instrument over `[from, to]`.
    ///
    /// A fetch or store failure for one instrument is recorded in the report
    /// and the job moves on.
    pub async fn run(&self, from: NaiveDate, to: NaiveDate) -> Result<BackfillReport, StockbookError> {
        if from > to {
            return Err(StockbookError::InvalidRange { from, to });
        }
        let instruments = atomic_blocking(&self.store, |tx| tx.list_instruments()).await?;
        info!(%from, %to, instruments = instruments.len(), "starting historical backfill");

        let mut report = BackfillReport {
            from,
            to,
            instruments: Vec::with_capacity(instruments.len()),
        };
        for instrument in instruments {
            let outcome = match self.backfill_instrument(&instrument, from, to).await {
                Ok((inserted, existing)) => {
                    debug!(symbol = %instrument.symbol, inserted, existing, "historical data stored");
                    BackfillOutcome::Stored { inserted, existing }
                }
                Err(e) => {
                    error!(symbol = %instrument.symbol, error = %e, "historical backfill failed");
                    BackfillOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            report.instruments.push(InstrumentBackfill {
                symbol: instrument.symbol,
                outcome,
            });
        }

        info!(
            inserted = report.inserted(),
            failed = report.failed(),
            "historical backfill completed"
        );
        Ok(report)
    }

    /// Store one instrument's daily bars, skipping dates already present.
    /// Returns `(inserted, already_present)`.
    pub async fn backfill_instrument(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(usize, usize), StockbookError> {
        let bars = self
            .resolver
            .fetch_range(&instrument.symbol, from, to)
            .await?;
        let bars = clip_to_range(bars, from, to);
        let instrument_id = instrument.id;

        atomic_blocking(&self.store, move |tx| {
            let (mut inserted, mut existing) = (0, 0);
            for bar in &bars {
                if !bar.is_consistent() {
                    warn!(symbol = %bar.symbol, date = %bar.date, "skipping inconsistent bar");
                    continue;
                }
                if tx.daily_sample_exists(instrument_id, bar.date)? {
                    existing += 1;
                    continue;
                }
                tx.append_price_sample(NewPriceSample::daily(instrument_id, bar))?;
                inserted += 1;
            }
            Ok((inserted, existing))
        })
        .await
    }

    /// Run the schedule's lookback window ending today.
    pub async fn run_window(&self, schedule: &BackfillSchedule) -> Result<BackfillReport, StockbookError> {
        let (from, to) = schedule.window(Utc::now().date_naive());
        info!(schedule = %schedule.name, "scheduled backfill firing");
        self.run(from, to).await
    }

    /// Sleep until the earliest next firing among `schedules`, run it, repeat
    /// until `shutdown` resolves. Shutdown is not observed mid-run.
    pub async fn run_scheduled<F>(&self, schedules: &[BackfillSchedule], shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let now = Utc::now();
            let Some((at, schedule)) = schedules
                .iter()
                .filter_map(|s| s.next_after(now).map(|at| (at, s)))
                .min_by_key(|(at, _)| *at)
            else {
                warn!("no backfill schedule will ever fire");
                shutdown.await;
                return;
            };
            let wait = (at - now).to_std().unwrap_or_default();
            debug!(schedule = %schedule.name, next = %at, "waiting for next backfill");

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.run_window(schedule).await {
                        error!(schedule = %schedule.name, error = %e, "scheduled backfill failed");
                    }
                }
            }
        }
        info!("backfill scheduler stopped");
    }
}
