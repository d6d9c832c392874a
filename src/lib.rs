//! # Crosspay SDK
//!
//! Rust client for a ClearNode-style state-channel broker: one WebSocket
//! connection shared by the connection lifecycle, a challenge/response auth
//! handshake and correlated request/response traffic for balances, transfers
//! and two-party payment sessions.
//!
//! ## Architecture
//!
//! The SDK is organized in layers:
//!
//! 1. **Core** — Shared newtypes, errors, event bus, network constants
//! 2. **Transport** — `tokio-tungstenite` socket task with queueing and reconnect backoff
//! 3. **RPC** — Signed envelope codec and the request correlator
//! 4. **Auth** — Session keys, key storage, the handshake state machine
//! 5. **Domain** — Sessions, balances, transfers, payroll (vertical slices)
//! 6. **High-Level Client** — `CrosspayClient` with nested sub-clients
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crosspay_sdk::prelude::*;
//!
//! let client = CrosspayClient::builder()
//!     .ws_url("wss://clearnet.yellow.com/ws")
//!     .build()?;
//!
//! client.connect().await?;
//! client.authenticate_with_session_key().await?;
//!
//! let session = client
//!     .sessions()
//!     .create_payroll_session("0xA", "0xB", Decimal::from(100), "usdc")
//!     .await?;
//! client.sessions().process_payment(&session.id).await?;
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes used across all domains.
pub mod shared;

/// Unified SDK error types.
pub mod error;

/// Multi-subscriber event bus.
pub mod events;

/// Network URL constants and environment variable names.
pub mod network;

// ── Layer 2: Transport ───────────────────────────────────────────────────────

/// WebSocket transport: status, queueing, reconnect, keepalive.
pub mod ws;

// ── Layer 3: RPC ─────────────────────────────────────────────────────────────

/// Envelope codec and request correlation.
pub mod rpc;

// ── Layer 4: Auth ────────────────────────────────────────────────────────────

/// Authentication: session keys, storage, handshake state.
pub mod auth;

// ── Layer 5: Domain ──────────────────────────────────────────────────────────

/// Domain modules (vertical slices): types, wire types, state, sub-clients.
pub mod domain;

// ── Layer 6: High-Level Client ───────────────────────────────────────────────

/// `CrosspayClient` — the primary entry point.
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::{Address, Asset};
    pub use rust_decimal::Decimal;

    // Domain types
    pub use crate::domain::balance::Balance;
    pub use crate::domain::payroll::{PayrollEntry, PayrollOutcome, ScheduledPayment};
    pub use crate::domain::session::{Allocation, AppDefinition, PaymentSession, SessionStatus};
    pub use crate::domain::transfer::TransferResult;

    // Errors
    pub use crate::error::{
        AuthError, ErrorKind, RequestError, SdkError, SessionError, SignerError, StoreError,
        WsError,
    };

    // Network
    pub use crate::network::DEFAULT_WS_URL;

    // Auth
    pub use crate::auth::{
        AuthState, FileKeyStore, KeyStore, MemoryKeyStore, MessageSigner, SessionKey,
    };

    // Client + sub-clients
    pub use crate::client::{
        BalancesClient, ClientEvent, CrosspayClient, CrosspayClientBuilder, PayrollClient,
        SessionsClient, TransfersClient,
    };

    // Events
    pub use crate::events::ListenerId;

    // WebSocket types
    pub use crate::ws::{ConnectionStatus, WsConfig, WsEvent};
}
