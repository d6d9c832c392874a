//! Network URL constants and environment variable names.

/// Default ClearNode WebSocket URL.
pub const DEFAULT_WS_URL: &str = "wss://clearnet.yellow.com/ws";

/// Environment variable overriding the WebSocket URL.
pub const ENV_WS_URL: &str = "CROSSPAY_WS_URL";

/// Environment variable overriding the application name sent during auth.
pub const ENV_APP_NAME: &str = "CROSSPAY_APP_NAME";

/// Environment variable overriding the requested auth scope.
pub const ENV_SCOPE: &str = "CROSSPAY_SCOPE";

/// Environment variable overriding the correlated request timeout (milliseconds).
pub const ENV_REQUEST_TIMEOUT_MS: &str = "CROSSPAY_REQUEST_TIMEOUT_MS";
