//! Wire types for `get_ledger_balances` results and `bu` pushes.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Balance;
use crate::error::RequestError;
use crate::shared::serde_util::flexible_decimal;
use crate::shared::{Address, Asset};

/// `get_ledger_balances` params (sent as a one-element array).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerBalancesParams {
    pub participant: Address,
}

/// One ledger entry as the broker sends it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LedgerBalance {
    pub asset: Asset,
    #[serde(deserialize_with = "flexible_decimal::deserialize")]
    pub amount: Decimal,
}

/// The result shapes seen in the wild: a bare list, a list wrapped in a
/// one-element array, or an object keyed by `ledger_balances` or
/// `balance_updates`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LedgerBalancesResult {
    List(Vec<LedgerBalance>),
    Nested(Vec<Vec<LedgerBalance>>),
    Keyed {
        #[serde(alias = "balance_updates")]
        ledger_balances: Vec<LedgerBalance>,
    },
    WrappedKeyed(Vec<KeyedOnly>),
}

#[derive(Debug, Clone, Deserialize)]
struct KeyedOnly {
    #[serde(alias = "balance_updates")]
    ledger_balances: Vec<LedgerBalance>,
}

/// Normalize any supported balance payload into `Balance` records stamped
/// with the current time.
pub fn normalize(value: &Value) -> Result<Vec<Balance>, RequestError> {
    let parsed: LedgerBalancesResult = serde_json::from_value(value.clone())
        .map_err(|e| RequestError::Malformed(format!("ledger balances: {}", e)))?;
    let entries: Vec<LedgerBalance> = match parsed {
        LedgerBalancesResult::List(list) => list,
        LedgerBalancesResult::Nested(lists) => lists.into_iter().flatten().collect(),
        LedgerBalancesResult::Keyed { ledger_balances } => ledger_balances,
        LedgerBalancesResult::WrappedKeyed(items) => items
            .into_iter()
            .flat_map(|k| k.ledger_balances)
            .collect(),
    };

    let now = Utc::now();
    Ok(entries
        .into_iter()
        .map(|e| Balance {
            asset: e.asset,
            amount: e.amount,
            last_updated: now,
        })
        .collect())
}
