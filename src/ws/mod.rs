//! WebSocket layer — connection status, transport events, configuration.
//!
//! The transport itself lives in [`native`] (`tokio-tungstenite`). It knows
//! nothing about the RPC envelope format: inbound text frames are parsed into
//! `serde_json::Value` and handed to listeners; the coordinator decodes them.

pub mod native;

pub use native::WsClient;

// ─── ConnectionStatus ────────────────────────────────────────────────────────

/// Transport connection status.
///
/// Legal edges: `Disconnected → Connecting`, `Connecting → Connected`,
/// `Connected → Disconnected`, and `Connecting → Disconnected` for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Whether `self → next` is one of the legal edges.
    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── WsEvent ─────────────────────────────────────────────────────────────────

/// Events published by the transport to its listeners.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// Status moved along one of the legal edges.
    StatusChanged(ConnectionStatus),
    /// Connection established (after queued messages were flushed).
    Connected,
    /// Connection lost or closed. Reconnect may follow.
    Disconnected { code: Option<u16>, reason: String },
    /// A JSON-parsed inbound text frame.
    Message(serde_json::Value),
    /// A non-fatal transport error (failed attempt, failed send).
    Error(String),
    /// Reconnect attempts exhausted; the transport has stopped.
    MaxReconnectReached { attempts: u32 },
}

// ─── WsConfig ────────────────────────────────────────────────────────────────

/// Configuration for the WS transport.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub reconnect: bool,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// Upper bound of random jitter added to each backoff delay. `0` disables jitter.
    pub reconnect_jitter_ms: u64,
    pub max_reconnect_attempts: u32,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: crate::network::DEFAULT_WS_URL.to_string(),
            reconnect: true,
            base_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            reconnect_jitter_ms: 500,
            max_reconnect_attempts: 5,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
            connect_timeout_ms: 30_000,
        }
    }
}

impl WsConfig {
    /// Backoff delay before reconnect attempt `attempt` (1-indexed), without jitter.
    ///
    /// `base * 2^(attempt-1)`, capped at `max_reconnect_delay_ms`.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_reconnect_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_reconnect_delay_ms)
    }
}
