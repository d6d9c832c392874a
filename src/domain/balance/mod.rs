//! Balance domain — unified ledger balances per asset.

pub mod client;
pub mod wire;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shared::Asset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: Asset,
    pub amount: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// Collapse a balance list into `asset → amount`. A later entry for the same
/// asset wins.
pub fn by_asset(balances: &[Balance]) -> HashMap<Asset, Decimal> {
    balances
        .iter()
        .map(|b| (b.asset.clone(), b.amount))
        .collect()
}
