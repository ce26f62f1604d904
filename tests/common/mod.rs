#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use stockbook::adapters::memory_store::MemoryStore;
use stockbook::domain::error::StockbookError;
pub use stockbook::domain::ohlcv::OhlcvBar;
use stockbook::domain::ohlcv::clip_to_range;
use stockbook::domain::price_event::PriceChangeEvent;
use stockbook::domain::resolver::FallbackPriceResolver;
use stockbook::domain::trading::TradingEngine;
use stockbook::ports::event_sink::EventSink;
use stockbook::ports::price_source::PriceSource;

/// Scriptable quote source. Prices can be changed between calls.
pub struct MockPriceSource {
    name: String,
    prices: Mutex<HashMap<String, Decimal>>,
    bars: HashMap<String, Vec<OhlcvBar>>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl MockPriceSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prices: Mutex::new(HashMap::new()),
            bars: HashMap::new(),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<OhlcvBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    /// Every request for `symbol` fails.
    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices
            .lock()
            .unwrap()
            .insert(symbol.to_string(), price);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(symbol) {
            return None;
        }
        self.prices.lock().unwrap().get(symbol).copied()
    }

    fn supports_range(&self) -> bool {
        true
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbookError> {
        if self.failing.contains(symbol) {
            return Err(StockbookError::provider(&self.name, "scripted failure"));
        }
        let bars = self.bars.get(symbol).cloned().unwrap_or_default();
        Ok(clip_to_range(bars, from, to))
    }
}

pub fn as_source(source: &Arc<MockPriceSource>) -> Arc<dyn PriceSource> {
    source.clone()
}

pub fn resolver_of(sources: &[&Arc<MockPriceSource>]) -> FallbackPriceResolver {
    FallbackPriceResolver::new(sources.iter().map(|s| as_source(s)).collect())
}

/// Collects every published event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PriceChangeEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<PriceChangeEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &PriceChangeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A consistent bar closing at `close`.
pub fn bar(symbol: &str, date: NaiveDate, close: Decimal) -> OhlcvBar {
    OhlcvBar {
        symbol: symbol.to_string(),
        date,
        open: close,
        high: close + Decimal::ONE,
        low: close - Decimal::ONE,
        close,
        volume: 1_000,
    }
}

/// Memory-backed engine over a single mock source.
pub fn engine_with(source: &Arc<MockPriceSource>) -> (Arc<MemoryStore>, TradingEngine<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = TradingEngine::new(store.clone(), resolver_of(&[source]));
    (store, engine)
}
