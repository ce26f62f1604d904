//! Typed runtime settings read from a [`ConfigPort`].
//!
//! Every key is optional; a missing key takes its default and a present but
//! unusable value is a `ConfigInvalid` error.

use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::error::StockbookError;
use super::money::MIN_FRACTION;
use super::schedule::BackfillSchedule;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Yahoo,
    AlphaVantage,
    Nasdaq,
    Csv,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yahoo" => Ok(SourceKind::Yahoo),
            "alphavantage" | "alpha_vantage" => Ok(SourceKind::AlphaVantage),
            "nasdaq" => Ok(SourceKind::Nasdaq),
            "csv" => Ok(SourceKind::Csv),
            other => Err(format!("unknown price source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub order: Vec<SourceKind>,
    pub http_timeout: Duration,
    pub yahoo_url: String,
    pub alpha_vantage_url: String,
    pub alpha_vantage_key: String,
    pub nasdaq_url: String,
    pub csv_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub sync_enabled: bool,
    pub sync_interval: Duration,
    pub sync_concurrency: usize,
    pub backfill_enabled: bool,
    pub daily_backfill: BackfillSchedule,
    pub weekly_backfill: BackfillSchedule,
    pub sources: SourceSettings,
    pub min_fraction: Decimal,
    pub sqlite_path: String,
    pub sqlite_pool_size: u32,
    pub log_filter: String,
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> StockbookError {
    StockbookError::config_invalid(section, key, reason)
}

fn positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<u64, StockbookError> {
    let value = config.get_int(section, key, default);
    if value <= 0 {
        return Err(invalid(section, key, format!("{key} must be positive")));
    }
    Ok(value as u64)
}

fn string_or(config: &dyn ConfigPort, section: &str, key: &str, default: &str) -> String {
    config
        .get_string(section, key)
        .unwrap_or_else(|| default.to_string())
}

fn schedule(
    config: &dyn ConfigPort,
    key: &str,
    default_expr: &str,
    default_lookback: i64,
) -> Result<BackfillSchedule, StockbookError> {
    let expr = string_or(config, "backfill", key, default_expr);
    let lookback_key = format!("{key}_lookback_days");
    let lookback = config.get_int("backfill", &lookback_key, default_lookback);
    if lookback < 0 {
        return Err(invalid(
            "backfill",
            &lookback_key,
            "lookback must not be negative",
        ));
    }
    BackfillSchedule::parse(key, &expr, lookback as u64)
        .map_err(|reason| invalid("backfill", key, reason))
}

impl Settings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StockbookError> {
        let order = match config.get_list("sources", "order") {
            Some(names) => names
                .iter()
                .map(|n| n.parse::<SourceKind>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|reason| invalid("sources", "order", reason))?,
            None => vec![SourceKind::Yahoo, SourceKind::AlphaVantage, SourceKind::Nasdaq],
        };
        if order.is_empty() {
            return Err(invalid("sources", "order", "at least one source is required"));
        }

        let min_fraction = match config.get_string("trading", "min_fraction") {
            Some(raw) => {
                let value = Decimal::from_str(&raw)
                    .map_err(|e| invalid("trading", "min_fraction", e.to_string()))?;
                if value <= Decimal::ZERO {
                    return Err(invalid("trading", "min_fraction", "must be positive"));
                }
                value
            }
            None => MIN_FRACTION,
        };

        let pool_size = positive_int(config, "sqlite", "pool_size", 4)?;

        Ok(Self {
            sync_enabled: config.get_bool("scheduler", "enabled", true),
            sync_interval: Duration::from_secs(positive_int(config, "scheduler", "interval_secs", 10)?),
            sync_concurrency: positive_int(config, "scheduler", "concurrency", 4)? as usize,
            backfill_enabled: config.get_bool("backfill", "enabled", true),
            daily_backfill: schedule(config, "daily", "18:00 MON-FRI", 3)?,
            weekly_backfill: schedule(config, "weekly", "20:00 SUN", 30)?,
            sources: SourceSettings {
                order,
                http_timeout: Duration::from_secs(positive_int(config, "http", "timeout_secs", 10)?),
                yahoo_url: string_or(config, "yahoo", "base_url", "https://query1.finance.yahoo.com"),
                alpha_vantage_url: string_or(
                    config,
                    "alphavantage",
                    "base_url",
                    "https://www.alphavantage.co",
                ),
                alpha_vantage_key: string_or(config, "alphavantage", "api_key", "demo"),
                nasdaq_url: string_or(config, "nasdaq", "base_url", "https://api.nasdaq.com"),
                csv_dir: PathBuf::from(string_or(config, "csv", "dir", "data")),
            },
            min_fraction,
            sqlite_path: string_or(config, "sqlite", "path", "stockbook.db"),
            sqlite_pool_size: u32::try_from(pool_size)
                .map_err(|e| invalid("sqlite", "pool_size", e.to_string()))?,
            log_filter: string_or(config, "logging", "filter", "info"),
        })
    }

    pub fn backfill_schedules(&self) -> Vec<BackfillSchedule> {
        vec![self.daily_backfill.clone(), self.weekly_backfill.clone()]
    }
}
