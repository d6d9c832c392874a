//! Session domain — two-party payment sessions and their settlement lifecycle.
//!
//! A session is opened with the whole amount allocated to the payer and is
//! settled by closing it with the amount reallocated to the payee.

pub mod client;
pub mod state;
pub mod wire;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::shared::serde_util::flexible_decimal;
use crate::shared::{now_ms, Address, Asset};

// ─── SessionStatus ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `Completed` and `Failed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Allocation ──────────────────────────────────────────────────────────────

/// Share of a session's funds assigned to one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub participant: Address,
    pub asset: Asset,
    #[serde(deserialize_with = "flexible_decimal::deserialize")]
    pub amount: Decimal,
}

impl Allocation {
    pub fn new(participant: Address, asset: Asset, amount: Decimal) -> Self {
        Self {
            participant,
            asset,
            amount,
        }
    }
}

/// Opening split: everything with the payer.
pub fn opening_allocations(payer: &Address, payee: &Address, asset: &Asset, amount: Decimal) -> Vec<Allocation> {
    vec![
        Allocation::new(payer.clone(), asset.clone(), amount),
        Allocation::new(payee.clone(), asset.clone(), Decimal::ZERO),
    ]
}

/// Settlement split: everything with the payee.
pub fn settled_allocations(payer: &Address, payee: &Address, asset: &Asset, amount: Decimal) -> Vec<Allocation> {
    vec![
        Allocation::new(payer.clone(), asset.clone(), Decimal::ZERO),
        Allocation::new(payee.clone(), asset.clone(), amount),
    ]
}

// ─── PaymentSession ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: String,
    pub payer: Address,
    pub payee: Address,
    pub asset: Asset,
    pub amount: Decimal,
    pub status: SessionStatus,
    pub allocations: Vec<Allocation>,
    /// Broker-side state version, when reported.
    #[serde(default)]
    pub version: Option<u64>,
    /// Reason for the last failed settlement.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl PaymentSession {
    /// A freshly opened session.
    pub fn open(id: String, payer: Address, payee: Address, asset: Asset, amount: Decimal) -> Self {
        let now = Utc::now();
        let allocations = opening_allocations(&payer, &payee, &asset, amount);
        Self {
            id,
            payer,
            payee,
            asset,
            amount,
            status: SessionStatus::Active,
            allocations,
            version: None,
            error: None,
            created_at: now,
            last_updated: now,
        }
    }

    /// Move to `next`, refusing any edge the lifecycle does not allow.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), SessionError> {
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.last_updated = Utc::now();
        Ok(())
    }

    pub fn is_settled(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

// ─── AppDefinition ───────────────────────────────────────────────────────────

pub const SESSION_PROTOCOL: &str = "nitroliterpc";

/// Governance terms of a two-party session: the payer holds all the weight
/// and the quorum, so the payer alone can settle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: Vec<Address>,
    pub weights: Vec<u32>,
    pub quorum: u32,
    pub challenge: u64,
    pub nonce: u64,
}

impl AppDefinition {
    pub fn two_party(payer: Address, payee: Address, nonce: u64) -> Self {
        Self {
            protocol: SESSION_PROTOCOL.to_string(),
            participants: vec![payer, payee],
            weights: vec![100, 0],
            quorum: 100,
            challenge: 0,
            nonce,
        }
    }
}

/// Session nonces: strictly increasing and at least the current Unix time in
/// milliseconds.
#[derive(Debug)]
pub struct NonceSource {
    last: AtomicU64,
}

impl NonceSource {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn next_nonce(&self) -> u64 {
        let now = now_ms();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for NonceSource {
    fn default() -> Self {
        Self::new()
    }
}
