//! RPC envelope codec.
//!
//! Requests and responses are positional arrays wrapped in an object with a
//! signature list:
//!
//! ```text
//! {"req": [id, method, params, timestamp_ms], "sig": ["0x…"]}
//! {"res": [id, method, result, timestamp_ms], "sig": ["0x…"]}
//! ```
//!
//! Errors come back with method `error` and a result of `{"error": "…"}`.
//! Server pushes carry an id no request was registered under (usually `0`).

pub mod correlator;

pub use correlator::PendingRequests;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::auth::signer::MessageSigner;
use crate::error::{RequestError, SignerError};

// ─── Method ──────────────────────────────────────────────────────────────────

/// RPC method discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    AuthRequest,
    AuthChallenge,
    AuthVerify,
    GetLedgerBalances,
    CreateAppSession,
    CloseAppSession,
    Transfer,
    BalanceUpdate,
    Ping,
    Pong,
    Error,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthRequest => "auth_request",
            Self::AuthChallenge => "auth_challenge",
            Self::AuthVerify => "auth_verify",
            Self::GetLedgerBalances => "get_ledger_balances",
            Self::CreateAppSession => "create_app_session",
            Self::CloseAppSession => "close_app_session",
            Self::Transfer => "transfer",
            Self::BalanceUpdate => "bu",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "auth_request" => Self::AuthRequest,
            "auth_challenge" => Self::AuthChallenge,
            "auth_verify" => Self::AuthVerify,
            "get_ledger_balances" => Self::GetLedgerBalances,
            "create_app_session" => Self::CreateAppSession,
            "close_app_session" => Self::CloseAppSession,
            "transfer" => Self::Transfer,
            "bu" => Self::BalanceUpdate,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Method::from(s.as_str()))
    }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// The positional `[id, method, params|result, timestamp]` tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub id: u64,
    pub method: Method,
    pub body: Value,
    pub timestamp: u64,
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.id, &self.method, &self.body, self.timestamp).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<Value>::deserialize(deserializer)?;
        if items.len() < 3 {
            return Err(D::Error::custom(format!(
                "expected [id, method, body, timestamp], got {} element(s)",
                items.len()
            )));
        }
        let mut items = items.into_iter();
        let id = items
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| D::Error::custom("id must be an unsigned integer"))?;
        let method = match items.next() {
            Some(Value::String(s)) => Method::from(s.as_str()),
            _ => return Err(D::Error::custom("method must be a string")),
        };
        let body = items.next().unwrap_or(Value::Null);
        let timestamp = items.next().and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(Payload {
            id,
            method,
            body,
            timestamp,
        })
    }
}

// ─── Envelopes ───────────────────────────────────────────────────────────────

/// Outbound signed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    pub req: Payload,
    pub sig: Vec<String>,
}

impl RpcRequest {
    pub fn new(id: u64, method: Method, params: Value, timestamp: u64) -> Self {
        Self {
            req: Payload {
                id,
                method,
                body: params,
                timestamp,
            },
            sig: Vec::new(),
        }
    }

    /// Sign the `req` tuple and attach the signature.
    pub fn signed(mut self, signer: &dyn MessageSigner) -> Result<Self, SignerError> {
        let payload = serde_json::to_value(&self.req)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        self.sig.push(signer.sign(&payload)?);
        Ok(self)
    }

    pub fn id(&self) -> u64 {
        self.req.id
    }

    pub fn method(&self) -> &Method {
        &self.req.method
    }
}

/// Inbound response or push.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcResponse {
    pub res: Payload,
    #[serde(default)]
    pub sig: Vec<String>,
}

impl RpcResponse {
    /// Decode a parsed frame. Returns `None` for frames that are not responses.
    pub fn decode(value: &Value) -> Option<Self> {
        if value.get("res").is_none() {
            return None;
        }
        match serde_json::from_value::<RpcResponse>(value.clone()) {
            Ok(resp) => Some(resp),
            Err(e) => {
                tracing::warn!("Malformed response envelope: {}", e);
                None
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.res.id
    }

    pub fn method(&self) -> &Method {
        &self.res.method
    }

    pub fn result(&self) -> &Value {
        &self.res.body
    }

    pub fn into_result(self) -> Value {
        self.res.body
    }

    /// Error message for `error` responses.
    pub fn error_message(&self) -> Option<String> {
        if self.res.method != Method::Error {
            return None;
        }
        let body = first_object(&self.res.body);
        let message = body
            .get("error")
            .or_else(|| body.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());
        Some(message)
    }
}

/// Unwrap the single-object array form (`[{…}]`) the broker uses for most
/// params and results; other values pass through.
pub fn first_object(value: &Value) -> &Value {
    match value {
        Value::Array(items) if items.len() == 1 && items[0].is_object() => &items[0],
        other => other,
    }
}

/// Deserialize a result body, accepting both `{…}` and `[{…}]`.
pub fn parse_result<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, RequestError> {
    serde_json::from_value(first_object(value).clone())
        .map_err(|e| RequestError::Malformed(e.to_string()))
}
