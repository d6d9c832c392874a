//! Payroll domain — batch settlement and recurring payments.

pub mod client;
pub mod scheduler;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::session::PaymentSession;
use crate::shared::{Address, Asset};

pub use scheduler::{PaymentScheduler, ScheduledPayment};

/// One payee in a payroll run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollEntry {
    pub recipient: Address,
    pub amount: Decimal,
    pub asset: Asset,
}

impl PayrollEntry {
    pub fn new(recipient: impl Into<Address>, amount: Decimal, asset: impl Into<Asset>) -> Self {
        Self {
            recipient: recipient.into(),
            amount,
            asset: asset.into(),
        }
    }
}

/// Result of settling one payroll entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PayrollOutcome {
    pub entry: PayrollEntry,
    /// Last known session snapshot, if a session was opened.
    pub session: Option<PaymentSession>,
    pub error: Option<String>,
}

impl PayrollOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.session.as_ref().is_some_and(|s| s.is_settled())
    }
}

/// Sum of the amounts that settled, per asset.
pub fn settled_totals(outcomes: &[PayrollOutcome]) -> std::collections::HashMap<Asset, Decimal> {
    let mut totals = std::collections::HashMap::new();
    for outcome in outcomes.iter().filter(|o| o.is_success()) {
        *totals.entry(outcome.entry.asset.clone()).or_insert(Decimal::ZERO) += outcome.entry.amount;
    }
    totals
}
