//! Concrete adapter implementations for ports.

pub mod alpha_vantage;
pub mod csv_source;
pub mod file_config_adapter;
pub mod http;
pub mod memory_store;
pub mod nasdaq;
pub mod sinks;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
pub mod yahoo;

use std::sync::Arc;

use crate::domain::error::StockbookError;
use crate::domain::resolver::FallbackPriceResolver;
use crate::domain::settings::{SourceKind, SourceSettings};
use crate::ports::price_source::PriceSource;

/// Instantiate the configured sources in priority order. Each HTTP source
/// gets its own client.
pub fn build_sources(settings: &SourceSettings) -> Result<Vec<Arc<dyn PriceSource>>, StockbookError> {
    settings
        .order
        .iter()
        .map(|kind| -> Result<Arc<dyn PriceSource>, StockbookError> {
            Ok(match kind {
                SourceKind::Yahoo => Arc::new(yahoo::YahooSource::new(
                    http::build_client(settings.http_timeout)?,
                    &settings.yahoo_url,
                )),
                SourceKind::AlphaVantage => Arc::new(alpha_vantage::AlphaVantageSource::new(
                    http::build_client(settings.http_timeout)?,
                    &settings.alpha_vantage_url,
                    &settings.alpha_vantage_key,
                )),
                SourceKind::Nasdaq => Arc::new(nasdaq::NasdaqSource::new(
                    http::build_client(settings.http_timeout)?,
                    &settings.nasdaq_url,
                )),
                SourceKind::Csv => Arc::new(csv_source::CsvPriceSource::new(settings.csv_dir.clone())),
            })
        })
        .collect()
}

pub fn build_resolver(settings: &SourceSettings) -> Result<FallbackPriceResolver, StockbookError> {
    Ok(FallbackPriceResolver::new(build_sources(settings)?))
}
