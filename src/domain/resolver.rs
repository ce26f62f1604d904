//! Ordered fallback across price sources.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::StockbookError;
use super::ohlcv::OhlcvBar;
use crate::ports::price_source::PriceSource;

/// Queries sources in fixed priority order; the first quote wins.
#[derive(Clone)]
pub struct FallbackPriceResolver {
    sources: Vec<Arc<dyn PriceSource>>,
}

impl FallbackPriceResolver {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>) -> Self {
        Self { sources }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Delegates to the primary source's format rule.
    pub fn is_valid_symbol(&self, symbol: &str) -> bool {
        self.sources
            .first()
            .is_some_and(|primary| primary.is_valid_symbol(symbol))
    }

    pub async fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.get_price_with_source(symbol)
            .await
            .map(|(price, _)| price)
    }

    /// Like [`get_price`](Self::get_price) but also names the source that answered.
    pub async fn get_price_with_source(&self, symbol: &str) -> Option<(Decimal, String)> {
        if !self.is_valid_symbol(symbol) {
            warn!(symbol, "invalid symbol, no source consulted");
            return None;
        }

        for source in &self.sources {
            debug!(symbol, source = source.name(), "fetching price");
            if let Some(price) = source.fetch_price(symbol).await {
                debug!(symbol, source = source.name(), %price, "price fetched");
                return Some((price, source.name().to_string()));
            }
            debug!(symbol, source = source.name(), "source failed, falling back");
        }

        warn!(
            symbol,
            sources = ?self.source_names(),
            "failed to fetch price from all sources"
        );
        None
    }

    /// Daily bars from the first range-capable source that succeeds.
    pub async fn fetch_range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbookError> {
        if !self.is_valid_symbol(symbol) {
            return Err(StockbookError::InvalidSymbol {
                symbol: symbol.to_string(),
            });
        }

        let mut last_err = None;
        for source in self.sources.iter().filter(|s| s.supports_range()) {
            match source.fetch_range(symbol, from, to).await {
                Ok(bars) => return Ok(bars),
                Err(e) => {
                    warn!(symbol, source = source.name(), error = %e, "range fetch failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| StockbookError::UnsupportedRange {
            source_name: self.source_names().join(","),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        name: &'static str,
        price: Option<Decimal>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(name: &'static str, price: Option<Decimal>) -> Arc<Self> {
            Arc::new(Self {
                name,
                price,
                calls: AtomicUsize::new(0),
            })
        }
    }

    fn as_source(s: &Arc<FixedSource>) -> Arc<dyn PriceSource> {
        s.clone()
    }

    #[async_trait]
    impl PriceSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch_price(&self, _symbol: &str) -> Option<Decimal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.price
        }
    }

    #[tokio::test]
    async fn first_successful_source_wins() {
        let a = FixedSource::new("a", None);
        let b = FixedSource::new("b", Some(dec!(150.00)));
        let c = FixedSource::new("c", Some(dec!(999.00)));
        let resolver = FallbackPriceResolver::new(vec![as_source(&a), as_source(&b), as_source(&c)]);

        assert_eq!(resolver.get_price("AAPL").await, Some(dec!(150.00)));
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_failing_returns_none() {
        let resolver = FallbackPriceResolver::new(vec![
            as_source(&FixedSource::new("a", None)),
            as_source(&FixedSource::new("b", None)),
        ]);
        assert_eq!(resolver.get_price("AAPL").await, None);
    }

    #[tokio::test]
    async fn invalid_symbol_never_reaches_sources() {
        let a = FixedSource::new("a", Some(dec!(1.00)));
        let resolver = FallbackPriceResolver::new(vec![as_source(&a)]);
        assert_eq!(resolver.get_price("not-a-symbol").await, None);
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reports_answering_source() {
        let resolver = FallbackPriceResolver::new(vec![
            as_source(&FixedSource::new("yahoo", None)),
            as_source(&FixedSource::new("nasdaq", Some(dec!(42.00)))),
        ]);
        let (price, source) = resolver.get_price_with_source("IBM").await.unwrap();
        assert_eq!(price, dec!(42.00));
        assert_eq!(source, "nasdaq");
    }

    #[test]
    fn empty_resolver_rejects_every_symbol() {
        let resolver = FallbackPriceResolver::new(vec![]);
        assert!(!resolver.is_valid_symbol("AAPL"));
    }

    #[tokio::test]
    async fn range_without_capable_source_is_unsupported() {
        let resolver = FallbackPriceResolver::new(vec![as_source(&FixedSource::new("a", None))]);
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let err = resolver.fetch_range("AAPL", day, day).await.unwrap_err();
        assert!(matches!(err, StockbookError::UnsupportedRange { .. }));
    }
}
