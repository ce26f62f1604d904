//! Cash accounts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

pub type AccountId = i64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub cash: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn can_afford(&self, amount: Decimal) -> bool {
        self.cash >= amount
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner: String,
    pub cash: Decimal,
}
