//! High-level client — `CrosspayClient` with nested sub-client accessors.
//!
//! The client owns one WebSocket transport and multiplexes it among the
//! connection lifecycle, the auth handshake and correlated requests. Each
//! domain has its own sub-client in `domain/<name>/client.rs`; this module
//! keeps the builder, the shared state, the transport event routing and the
//! accessor methods.

use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use async_lock::RwLock;
use serde_json::{json, Value};

use crate::auth::store::AUTH_TOKEN_STORAGE_KEY;
use crate::auth::{
    AuthChallenge, AuthConfig, AuthMachine, AuthRequestParams, AuthState, AuthVerifyParams,
    AuthVerifyResult, KeyStore, MemoryKeyStore, MessageSigner, SessionKey,
};
use crate::domain::balance::client::Balances;
use crate::domain::balance::{wire as balance_wire, Balance};
use crate::domain::payroll::client::Payroll;
use crate::domain::payroll::PaymentScheduler;
use crate::domain::session::client::Sessions;
use crate::domain::session::state::SessionBook;
use crate::domain::session::{NonceSource, PaymentSession};
use crate::domain::transfer::client::Transfers;
use crate::error::{AuthError, ErrorKind, RequestError, SdkError, WsError};
use crate::events::{EventBus, ListenerId};
use crate::rpc::correlator::DEFAULT_REQUEST_TIMEOUT;
use crate::rpc::{parse_result, Method, PendingRequests, RpcRequest, RpcResponse};
use crate::shared::{now_ms, Address};
use crate::ws::{ConnectionStatus, WsClient, WsConfig, WsEvent};

// Re-export sub-client types for convenience.
pub use crate::domain::balance::client::Balances as BalancesClient;
pub use crate::domain::payroll::client::Payroll as PayrollClient;
pub use crate::domain::session::client::Sessions as SessionsClient;
pub use crate::domain::transfer::client::Transfers as TransfersClient;

// ─── ClientEvent ─────────────────────────────────────────────────────────────

/// Events published to client subscribers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Authenticated { address: Address },
    Disconnected { code: Option<u16>, reason: String },
    Error { kind: ErrorKind, message: String },
    /// Final snapshot of a settled (or failed) session.
    PaymentProcessed(PaymentSession),
    BalanceUpdated(Vec<Balance>),
}

// ─── Shared state ────────────────────────────────────────────────────────────

pub(crate) struct ClientInner {
    pub(crate) transport: WsClient,
    pub(crate) requests: PendingRequests,
    pub(crate) auth: AuthMachine,
    pub(crate) auth_config: AuthConfig,
    /// Signer of the authenticated session; used for every domain request.
    pub(crate) signer: StdRwLock<Option<Arc<dyn MessageSigner>>>,
    pub(crate) store: Arc<dyn KeyStore>,
    pub(crate) events: EventBus<ClientEvent>,
    pub(crate) sessions: RwLock<SessionBook>,
    pub(crate) nonces: NonceSource,
    pub(crate) balances: StdRwLock<Vec<Balance>>,
    pub(crate) scheduler: PaymentScheduler,
}

impl ClientInner {
    fn on_transport_event(&self, event: &WsEvent) {
        match event {
            WsEvent::StatusChanged(status) => {
                tracing::debug!("Transport status {}", status);
            }
            WsEvent::Connected => {
                self.events.emit(&ClientEvent::Connected);
            }
            WsEvent::Disconnected { code, reason } => {
                self.drop_session_state();
                self.events.emit(&ClientEvent::Disconnected {
                    code: *code,
                    reason: reason.clone(),
                });
            }
            WsEvent::Message(value) => self.route_message(value),
            WsEvent::Error(message) => {
                self.events.emit(&ClientEvent::Error {
                    kind: ErrorKind::Connectivity,
                    message: message.clone(),
                });
            }
            WsEvent::MaxReconnectReached { attempts } => {
                self.drop_session_state();
                tracing::error!("Connection lost for good after {} attempts", attempts);
                self.events.emit(&ClientEvent::Error {
                    kind: ErrorKind::Connectivity,
                    message: WsError::ReconnectExhausted {
                        attempts: *attempts,
                    }
                    .to_string(),
                });
            }
        }
    }

    /// Pending requests cannot be answered on a new socket, and the broker
    /// forgets the auth session with the connection.
    fn drop_session_state(&self) {
        let stale = self.transport.clear_queue();
        if stale > 0 {
            tracing::debug!("Dropped {} unsent frame(s)", stale);
        }
        self.auth.reset();
        *self.signer.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.requests.reject_all();
    }

    fn route_message(&self, value: &Value) {
        let Some(response) = RpcResponse::decode(value) else {
            tracing::debug!("Ignoring non-response frame");
            return;
        };

        if self.requests.is_pending(response.id()) {
            tracing::debug!("← {} #{}", response.method(), response.id());
            self.requests.complete(response);
            return;
        }

        match response.method() {
            Method::BalanceUpdate => match balance_wire::normalize(response.result()) {
                Ok(balances) => self.record_balances(balances),
                Err(e) => tracing::warn!("Unreadable balance push: {}", e),
            },
            Method::Error => {
                let message = response.error_message().unwrap_or_default();
                tracing::warn!("Broker error push: {}", message);
                self.events.emit(&ClientEvent::Error {
                    kind: ErrorKind::Other,
                    message,
                });
            }
            other => tracing::debug!("Unhandled push {} #{}", other, response.id()),
        }
    }

    fn record_balances(&self, balances: Vec<Balance>) {
        *self.balances.write().unwrap_or_else(PoisonError::into_inner) = balances.clone();
        self.events.emit(&ClientEvent::BalanceUpdated(balances));
    }

    fn current_signer(&self) -> Option<Arc<dyn MessageSigner>> {
        self.signer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ─── CrosspayClient ──────────────────────────────────────────────────────────

/// The primary entry point for the SDK.
///
/// Cheap to clone; clones share one connection. Provides nested sub-client
/// accessors for each domain: `client.sessions()`, `client.balances()`, etc.
#[derive(Clone)]
pub struct CrosspayClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl CrosspayClient {
    pub fn builder() -> CrosspayClientBuilder {
        CrosspayClientBuilder::default()
    }

    // ── Sub-client accessors ─────────────────────────────────────────────

    pub fn sessions(&self) -> Sessions<'_> {
        Sessions { client: self }
    }

    pub fn balances(&self) -> Balances<'_> {
        Balances { client: self }
    }

    pub fn transfers(&self) -> Transfers<'_> {
        Transfers { client: self }
    }

    pub fn payroll(&self) -> Payroll<'_> {
        Payroll { client: self }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Open the connection and wait until it is up.
    ///
    /// Returns immediately if already connected. Fails with the transport's
    /// fatal error when reconnection gives up, or `WsError::Timeout` after
    /// the configured connect timeout.
    pub async fn connect(&self) -> Result<(), SdkError> {
        let transport = &self.inner.transport;
        transport.connect()?;
        let timeout = Duration::from_millis(transport.config().connect_timeout_ms);
        transport.wait_until_connected(timeout).await?;
        Ok(())
    }

    /// Close the connection, stop scheduled payments and fail anything pending.
    pub async fn disconnect(&self) -> Result<(), SdkError> {
        self.inner.scheduler.cancel_all();
        let result = self.inner.transport.disconnect().await;
        self.inner.drop_session_state();
        tracing::info!("Client disconnected");
        result.map_err(SdkError::from)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.transport.status()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.auth.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.auth.is_authenticated()
    }

    /// Address of the authenticated session.
    pub fn address(&self) -> Option<Address> {
        self.inner.auth.address()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.len()
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        &self.inner.store
    }

    // ── Authentication ───────────────────────────────────────────────────

    /// Run the auth handshake with `signer`.
    ///
    /// While a handshake is in flight, or once authenticated, this is a no-op
    /// returning the current state. Requires a live connection.
    pub async fn authenticate(&self, signer: Arc<dyn MessageSigner>) -> Result<AuthState, SdkError> {
        if !self.inner.transport.is_connected() {
            return Err(AuthError::NotConnected.into());
        }
        let Some(attempt) = self.inner.auth.try_begin() else {
            let state = self.inner.auth.state();
            tracing::debug!("authenticate() ignored while {}", state);
            return Ok(state);
        };

        match self.handshake(signer.as_ref()).await {
            Ok(verified) => {
                let address = verified.address.clone().unwrap_or_else(|| signer.address());
                self.inner.auth.succeed(&attempt, address.clone())?;
                *self
                    .inner
                    .signer
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(signer);

                if let Some(token) = verified.jwt_token.as_deref() {
                    if let Err(e) = self.inner.store.set(AUTH_TOKEN_STORAGE_KEY, token).await {
                        tracing::warn!("Could not persist auth token: {}", e);
                    }
                }

                tracing::info!("Authenticated as {}", address);
                self.emit(ClientEvent::Authenticated { address });
                Ok(AuthState::Authenticated)
            }
            Err(e) => {
                self.inner.auth.fail(&attempt);
                tracing::warn!("Authentication failed: {}", e);
                self.emit(ClientEvent::Error {
                    kind: ErrorKind::Auth,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Authenticate with the persisted session key, creating one if needed.
    pub async fn authenticate_with_session_key(&self) -> Result<AuthState, SdkError> {
        let key = SessionKey::load_or_create(self.inner.store.as_ref()).await?;
        self.authenticate(Arc::new(key)).await
    }

    async fn handshake(&self, signer: &dyn MessageSigner) -> Result<AuthVerifyResult, SdkError> {
        if self.inner.auth_config.reuse_token {
            if let Some(token) = self.inner.store.get(AUTH_TOKEN_STORAGE_KEY).await? {
                return self.verify_token(signer, token).await;
            }
        }

        let address = signer.address();
        let params = AuthRequestParams::new(
            address.clone(),
            address,
            &self.inner.auth_config,
            now_ms() / 1000,
        );
        let value = self
            .request_with(signer, Method::AuthRequest, Method::AuthChallenge, json!([params]))
            .await?;
        let challenge: AuthChallenge =
            parse_result(&value).map_err(|e| AuthError::Protocol(e.to_string()))?;

        let verify = AuthVerifyParams::Challenge {
            challenge: challenge.challenge_message,
        };
        let value = self
            .request_with(signer, Method::AuthVerify, Method::AuthVerify, json!([verify]))
            .await?;
        Self::check_verified(&value)
    }

    async fn verify_token(&self, signer: &dyn MessageSigner, token: String) -> Result<AuthVerifyResult, SdkError> {
        tracing::debug!("Reusing stored auth token");
        let params = AuthVerifyParams::Token { jwt: token };
        let outcome = match self
            .request_with(signer, Method::AuthVerify, Method::AuthVerify, json!([params]))
            .await
        {
            Ok(value) => Self::check_verified(&value),
            Err(SdkError::Request(RequestError::Rejected(reason))) => {
                Err(AuthError::VerificationFailed(reason).into())
            }
            Err(e) => return Err(e),
        };
        if outcome.is_err() {
            tracing::info!("Stored auth token rejected, clearing it");
            self.inner.store.remove(AUTH_TOKEN_STORAGE_KEY).await?;
        }
        outcome
    }

    fn check_verified(value: &Value) -> Result<AuthVerifyResult, SdkError> {
        let verified: AuthVerifyResult =
            parse_result(value).map_err(|e| AuthError::Protocol(e.to_string()))?;
        if !verified.success {
            let reason = verified
                .message
                .unwrap_or_else(|| "broker refused verification".to_string());
            return Err(AuthError::VerificationFailed(reason).into());
        }
        Ok(verified)
    }

    // ── Correlated requests ──────────────────────────────────────────────

    pub(crate) fn ensure_authenticated(&self) -> Result<(), SdkError> {
        if !self.inner.transport.is_connected() {
            return Err(WsError::NotConnected.into());
        }
        if !self.inner.auth.is_authenticated() {
            return Err(AuthError::NotAuthenticated.into());
        }
        Ok(())
    }

    /// Send a request on the authenticated session and wait for its result.
    ///
    /// Nothing is sent unless the client is connected and authenticated.
    pub(crate) async fn request(&self, method: Method, expected: Method, params: Value) -> Result<Value, SdkError> {
        self.ensure_authenticated()?;
        let signer = self
            .inner
            .current_signer()
            .ok_or(AuthError::NotAuthenticated)?;
        self.request_with(signer.as_ref(), method, expected, params).await
    }

    async fn request_with(
        &self,
        signer: &dyn MessageSigner,
        method: Method,
        expected: Method,
        params: Value,
    ) -> Result<Value, SdkError> {
        if !self.inner.transport.is_connected() {
            return Err(WsError::NotConnected.into());
        }

        let requests = &self.inner.requests;
        let pending = requests.register(expected);
        let id = pending.id();
        tracing::debug!("→ {} #{}", method, id);

        let request = match RpcRequest::new(id, method, params, now_ms()).signed(signer) {
            Ok(request) => request,
            Err(e) => {
                requests.cancel(&pending);
                return Err(e.into());
            }
        };
        if let Err(e) = self.inner.transport.send(&request) {
            requests.cancel(&pending);
            return Err(e.into());
        }

        let response = requests.wait(pending).await?;
        Ok(response.into_result())
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Register a listener. Listeners run inline in arrival order and must
    /// not block.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Receive events on an unbounded channel instead of a callback.
    pub fn events_channel(&self) -> (ListenerId, tokio::sync::mpsc::UnboundedReceiver<ClientEvent>) {
        self.inner.events.channel()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        self.inner.events.emit(&event);
    }

    pub(crate) fn record_balances(&self, balances: Vec<Balance>) {
        self.inner.record_balances(balances);
    }

    pub(crate) fn latest_balances(&self) -> Vec<Balance> {
        self.inner
            .balances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

pub struct CrosspayClientBuilder {
    ws: WsConfig,
    auth: AuthConfig,
    request_timeout: Duration,
    store: Option<Arc<dyn KeyStore>>,
}

impl Default for CrosspayClientBuilder {
    fn default() -> Self {
        Self {
            ws: WsConfig::default(),
            auth: AuthConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            store: None,
        }
    }
}

impl CrosspayClientBuilder {
    /// Defaults overridden by `CROSSPAY_*` environment variables.
    pub fn from_env() -> Result<Self, SdkError> {
        use crate::network::{ENV_APP_NAME, ENV_REQUEST_TIMEOUT_MS, ENV_SCOPE, ENV_WS_URL};

        let mut builder = Self::default();
        if let Ok(url) = std::env::var(ENV_WS_URL) {
            builder = builder.ws_url(&url);
        }
        if let Ok(name) = std::env::var(ENV_APP_NAME) {
            builder = builder.app_name(&name);
        }
        if let Ok(scope) = std::env::var(ENV_SCOPE) {
            builder = builder.scope(&scope);
        }
        if let Ok(raw) = std::env::var(ENV_REQUEST_TIMEOUT_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                SdkError::Validation(format!("{} must be milliseconds, got {:?}", ENV_REQUEST_TIMEOUT_MS, raw))
            })?;
            builder = builder.request_timeout(Duration::from_millis(ms));
        }
        Ok(builder)
    }

    pub fn ws_url(mut self, url: &str) -> Self {
        self.ws.url = url.to_string();
        self
    }

    /// Replace every transport setting, including the URL.
    pub fn ws_config(mut self, config: WsConfig) -> Self {
        self.ws = config;
        self
    }

    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.ws.reconnect = enabled;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.ws.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.ws.base_reconnect_delay_ms = saturating_millis(base);
        self.ws.max_reconnect_delay_ms = saturating_millis(max);
        self
    }

    pub fn reconnect_jitter(mut self, jitter: Duration) -> Self {
        self.ws.reconnect_jitter_ms = saturating_millis(jitter);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.ws.connect_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn app_name(mut self, name: &str) -> Self {
        self.auth.app_name = name.to_string();
        self
    }

    pub fn application(mut self, application: &str) -> Self {
        self.auth.application = application.to_string();
        self
    }

    pub fn scope(mut self, scope: &str) -> Self {
        self.auth.scope = scope.to_string();
        self
    }

    pub fn session_duration(mut self, duration: Duration) -> Self {
        self.auth.session_duration = duration;
        self
    }

    pub fn reuse_token(mut self, enabled: bool) -> Self {
        self.auth.reuse_token = enabled;
        self
    }

    /// Where the session key, auth token and schedules are kept.
    /// Defaults to a [`MemoryKeyStore`].
    pub fn key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<CrosspayClient, SdkError> {
        if !(self.ws.url.starts_with("ws://") || self.ws.url.starts_with("wss://")) {
            return Err(SdkError::Validation(format!(
                "WebSocket URL must start with ws:// or wss://, got {}",
                self.ws.url
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(SdkError::Validation("request timeout must be non-zero".to_string()));
        }

        let inner = Arc::new(ClientInner {
            transport: WsClient::new(self.ws),
            requests: PendingRequests::new(self.request_timeout),
            auth: AuthMachine::new(),
            auth_config: self.auth,
            signer: StdRwLock::new(None),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryKeyStore::new())),
            events: EventBus::new(),
            sessions: RwLock::new(SessionBook::new()),
            nonces: NonceSource::new(),
            balances: StdRwLock::new(Vec::new()),
            scheduler: PaymentScheduler::new(),
        });

        let weak = Arc::downgrade(&inner);
        inner.transport.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_transport_event(event);
            }
        });

        Ok(CrosspayClient { inner })
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
