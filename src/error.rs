//! Unified SDK error types.

use std::time::Duration;

use thiserror::Error;

/// Top-level SDK error.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification used for `ClientEvent::Error` and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Auth,
    RequestTimeout,
    SessionNotFound,
    Settlement,
    Other,
}

impl SdkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SdkError::Ws(_) => ErrorKind::Connectivity,
            SdkError::Auth(_) | SdkError::Signer(_) => ErrorKind::Auth,
            SdkError::Request(RequestError::Timeout { .. }) => ErrorKind::RequestTimeout,
            SdkError::Request(RequestError::ConnectionClosed) => ErrorKind::Connectivity,
            SdkError::Session(SessionError::NotFound(_)) => ErrorKind::SessionNotFound,
            SdkError::Session(SessionError::Settlement { .. }) => ErrorKind::Settlement,
            _ => ErrorKind::Other,
        }
    }

    /// Network errors and request timeouts can be retried by the caller.
    /// Everything else needs a change of input or an explicit re-auth.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SdkError::Ws(WsError::ReconnectExhausted { .. }) => false,
            SdkError::Ws(_) => true,
            SdkError::Request(RequestError::Timeout { .. } | RequestError::ConnectionClosed) => {
                true
            }
            _ => false,
        }
    }
}

/// WebSocket / connectivity errors.
#[derive(Error, Debug, Clone)]
pub enum WsError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Timed out waiting for connection")]
    Timeout,

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Authentication errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Unexpected handshake message: {0}")]
    Protocol(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Handshake superseded by a reset")]
    Superseded,

    #[error("Signer failed: {0}")]
    Signer(#[from] SignerError),

    #[error("Handshake request failed: {0}")]
    Request(#[from] RequestError),
}

/// Correlated request errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("No response to request {id} within {after:?}")]
    Timeout { id: u64, after: Duration },

    #[error("Connection closed before a response arrived")]
    ConnectionClosed,

    #[error("Server rejected request: {0}")]
    Rejected(String),

    #[error("Expected {expected} response, got {got}")]
    UnexpectedResponse { expected: String, got: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Payment session errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Settlement of session {id} failed: {reason}")]
    Settlement { id: String, reason: String },

    #[error("Session {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Payment schedule already running: {0}")]
    AlreadyScheduled(String),
}

/// Message signer errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignerError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Client-side persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store: {0}")]
    Corrupt(String),
}
