//! Wire types for `create_app_session` and `close_app_session`.

use serde::{Deserialize, Serialize};

use super::{Allocation, AppDefinition};

/// `create_app_session` params (sent as a one-element array).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateAppSessionParams {
    pub definition: AppDefinition,
    pub allocations: Vec<Allocation>,
}

/// `close_app_session` params (sent as a one-element array).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseAppSessionParams {
    pub app_session_id: String,
    pub allocations: Vec<Allocation>,
}

/// Result of either session call. Every field is optional; the broker omits
/// some of them depending on version.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AppSessionResult {
    #[serde(default)]
    pub app_session_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}
