//! Transfer domain — direct ledger transfers to another participant.

pub mod client;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shared::{Address, Asset};

/// Outcome of a transfer. Failures are reported here rather than as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// `transfer` params (sent as a one-element array).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferParams {
    pub destination: Address,
    pub allocations: Vec<TransferAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferAllocation {
    pub asset: Asset,
    pub amount: Decimal,
}

impl TransferParams {
    pub fn single(destination: Address, asset: Asset, amount: Decimal) -> Self {
        Self {
            destination,
            allocations: vec![TransferAllocation { asset, amount }],
        }
    }
}
