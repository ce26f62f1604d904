//! Core domain types and logic.

pub mod account;
pub mod backfill;
pub mod error;
pub mod instrument;
pub mod ledger;
pub mod money;
pub mod ohlcv;
pub mod position;
pub mod price_event;
pub mod price_sample;
pub mod price_sync;
pub mod resolver;
pub mod schedule;
pub mod settings;
pub mod symbol;
pub mod trade;
pub mod trading;
