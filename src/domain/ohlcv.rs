//! OHLCV bar representation.

use chrono::NaiveDate;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl OhlcvBar {
    /// high >= max(open, close), low <= min(open, close), all prices positive.
    pub fn is_consistent(&self) -> bool {
        self.low > Decimal::ZERO
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.volume >= 0
    }
}

/// Keep bars inside `[from, to]`, sorted by date with one bar per day.
pub fn clip_to_range(mut bars: Vec<OhlcvBar>, from: NaiveDate, to: NaiveDate) -> Vec<OhlcvBar> {
    bars.retain(|b| b.date >= from && b.date <= to);
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    bars
}
