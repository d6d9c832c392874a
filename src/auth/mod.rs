//! Authentication — session keys, the challenge/verify state machine, wire types.
//!
//! ## Handshake
//!
//! 1. `auth_request` carrying address, app identity, scope and expiry
//! 2. broker answers `auth_challenge` with a challenge string
//! 3. `auth_verify` carrying the challenge, signed by the message signer
//! 4. broker answers `auth_verify` with `success` and an optional token
//!
//! A stored token lets step 1–2 be skipped: `auth_verify` is sent with the
//! token directly. The I/O is driven by `CrosspayClient::authenticate`; this
//! module owns the state and the message shapes.

pub mod signer;
pub mod store;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::shared::Address;

pub use signer::{MessageSigner, SessionKey};
pub use store::{FileKeyStore, KeyStore, MemoryKeyStore};

// ============================================================================
// AuthState
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NotAuthenticated,
    Authenticating,
    Authenticated,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// AuthMachine
// ============================================================================

/// Ticket for one handshake. Completing it after a reset is refused.
///
/// Dropping an attempt that was never completed counts as a failure, so a
/// cancelled handshake cannot leave the machine in `Authenticating`.
#[derive(Debug)]
pub struct AuthAttempt<'a> {
    machine: &'a AuthMachine,
    generation: u64,
}

impl Drop for AuthAttempt<'_> {
    fn drop(&mut self) {
        if self.machine.fail_generation(self.generation) {
            tracing::warn!("Auth handshake abandoned before completion");
        }
    }
}

#[derive(Debug)]
struct MachineState {
    state: AuthState,
    generation: u64,
    address: Option<Address>,
    consecutive_failures: u32,
}

/// Auth state with a re-entrancy guard.
///
/// `NotAuthenticated → Authenticating → Authenticated`, with a failure edge
/// back to `NotAuthenticated` from any state. Only one handshake can hold
/// the `Authenticating` state at a time.
#[derive(Debug)]
pub struct AuthMachine {
    inner: Mutex<MachineState>,
}

impl AuthMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MachineState {
                state: AuthState::NotAuthenticated,
                generation: 0,
                address: None,
                consecutive_failures: 0,
            }),
        }
    }

    pub fn state(&self) -> AuthState {
        self.lock().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == AuthState::Authenticated
    }

    /// Address the current session was authenticated as.
    pub fn address(&self) -> Option<Address> {
        self.lock().address.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Claim the handshake. `None` if one is in flight or already done.
    pub fn try_begin(&self) -> Option<AuthAttempt<'_>> {
        let mut inner = self.lock();
        if inner.state != AuthState::NotAuthenticated {
            return None;
        }
        inner.state = AuthState::Authenticating;
        Some(AuthAttempt {
            machine: self,
            generation: inner.generation,
        })
    }

    /// Mark the attempt successful.
    pub fn succeed(&self, attempt: &AuthAttempt<'_>, address: Address) -> Result<(), AuthError> {
        let mut inner = self.lock();
        if inner.generation != attempt.generation || inner.state != AuthState::Authenticating {
            return Err(AuthError::Superseded);
        }
        inner.state = AuthState::Authenticated;
        inner.address = Some(address);
        inner.consecutive_failures = 0;
        Ok(())
    }

    /// Mark the attempt failed. Stale attempts are ignored.
    pub fn fail(&self, attempt: &AuthAttempt<'_>) {
        self.fail_generation(attempt.generation);
    }

    fn fail_generation(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != AuthState::Authenticating {
            return false;
        }
        inner.state = AuthState::NotAuthenticated;
        inner.consecutive_failures += 1;
        true
    }

    /// Drop back to `NotAuthenticated` and invalidate any in-flight attempt.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = AuthState::NotAuthenticated;
        inner.address = None;
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AuthMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Auth configuration
// ============================================================================

/// Identity and scope presented in `auth_request`.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub app_name: String,
    /// Application identity (contract address or app URL).
    pub application: String,
    pub scope: String,
    /// How long the granted session stays valid.
    pub session_duration: Duration,
    /// Send a stored token straight to `auth_verify` instead of a full handshake.
    pub reuse_token: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            app_name: "crosspay".to_string(),
            application: "crosspay".to_string(),
            scope: "console".to_string(),
            session_duration: Duration::from_secs(3600),
            reuse_token: true,
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// `auth_request` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequestParams {
    pub address: Address,
    pub session_key: Address,
    pub app_name: String,
    pub application: String,
    pub scope: String,
    /// Expiry as Unix seconds.
    pub expire: u64,
    #[serde(default)]
    pub allowances: Vec<serde_json::Value>,
}

impl AuthRequestParams {
    pub fn new(address: Address, session_key: Address, config: &AuthConfig, now_secs: u64) -> Self {
        Self {
            address,
            session_key,
            app_name: config.app_name.clone(),
            application: config.application.clone(),
            scope: config.scope.clone(),
            expire: now_secs + config.session_duration.as_secs(),
            allowances: Vec::new(),
        }
    }
}

/// `auth_challenge` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthChallenge {
    #[serde(alias = "challenge")]
    pub challenge_message: String,
}

/// `auth_verify` params: either the signed challenge or a stored token.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AuthVerifyParams {
    Challenge { challenge: String },
    Token { jwt: String },
}

/// `auth_verify` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthVerifyResult {
    pub success: bool,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub session_key: Option<Address>,
    #[serde(default, alias = "jwt")]
    pub jwt_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
