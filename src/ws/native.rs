//! Native WebSocket transport — `tokio-tungstenite`.
//!
//! - Background tokio task owns the socket; the public API talks to it over an mpsc channel
//! - Status tracked in a `watch` cell and published as [`WsEvent::StatusChanged`]
//! - FIFO queue for messages sent while disconnected, flushed on open
//! - Exponential backoff reconnection with optional jitter, bounded attempt count
//! - WebSocket-level ping keepalive with pong deadline
//! - Inbound text frames JSON-parsed and fanned out to every listener

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::WsError;
use crate::events::{EventBus, ListenerId};
use crate::ws::{ConnectionStatus, WsConfig, WsEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ─── Commands from public API to background task ─────────────────────────────

enum Command {
    Send(String),
    Disconnect,
}

// ─── Disconnect reasons for reconnection decision ────────────────────────────

enum DisconnectReason {
    UserRequested,
    Lost { code: Option<u16>, reason: String },
}

// ─── State shared between the handle and the background task ─────────────────

struct Shared {
    config: WsConfig,
    bus: EventBus<WsEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    pending: Mutex<VecDeque<String>>,
    /// Set when the task stops on its own (attempts exhausted or reconnect disabled).
    terminal: Mutex<Option<WsError>>,
}

impl Shared {
    fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, next: ConnectionStatus) {
        let mut previous = next;
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = *current;
            *current = next;
            true
        });
        if changed {
            if !previous.can_transition_to(next) {
                tracing::warn!("Unexpected status edge {} -> {}", previous, next);
            }
            tracing::debug!("Connection status {} -> {}", previous, next);
            self.bus.emit(&WsEvent::StatusChanged(next));
        }
    }

    fn enqueue(&self, text: String) {
        lock(&self.pending).push_back(text);
    }

    fn requeue_front(&self, text: String) {
        lock(&self.pending).push_front(text);
    }

    fn stop(&self, err: WsError) {
        *lock(&self.terminal) = Some(err);
        // Wake anyone in `wait_until_connected` without changing the status.
        self.status_tx.send_modify(|_| {});
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Public WsClient ─────────────────────────────────────────────────────────

/// Native WebSocket transport using `tokio-tungstenite`.
///
/// All methods take `&self` so one instance can be shared behind an `Arc`
/// by the coordinator.
pub struct WsClient {
    shared: Arc<Shared>,
    cmd_tx: Mutex<Option<mpsc::Sender<Command>>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WsClient {
    /// Create a new transport. Does not connect yet.
    pub fn new(config: WsConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                bus: EventBus::new(),
                status_tx,
                pending: Mutex::new(VecDeque::new()),
                terminal: Mutex::new(None),
            }),
            cmd_tx: Mutex::new(None),
            task_handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.shared.config
    }

    /// Start connecting.
    ///
    /// No-op while a connection task is alive (connected, connecting or in
    /// backoff). Spawns a background task that manages the socket, keepalive
    /// and reconnection. Use [`WsClient::wait_until_connected`] to await the open.
    pub fn connect(&self) -> Result<(), WsError> {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        {
            let mut cmd_slot = lock(&self.cmd_tx);
            if let Some(tx) = cmd_slot.as_ref() {
                if !tx.is_closed() {
                    return Ok(());
                }
            }
            *cmd_slot = Some(cmd_tx);
        }
        *lock(&self.shared.terminal) = None;
        self.shared.set_status(ConnectionStatus::Connecting);

        let handle = tokio::spawn(run_task(Arc::clone(&self.shared), cmd_rx));
        if let Some(old) = lock(&self.task_handle).replace(handle) {
            old.abort();
        }
        Ok(())
    }

    /// Wait until the transport reports `Connected`.
    ///
    /// Fails early if the background task stopped on its own (reconnect
    /// attempts exhausted) or no connection task is running.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), WsError> {
        let mut rx = self.shared.status_tx.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() == ConnectionStatus::Connected {
                    return Ok(());
                }
                if let Some(err) = lock(&self.shared.terminal).clone() {
                    return Err(err);
                }
                if !self.is_running() {
                    return Err(WsError::NotConnected);
                }
                if rx.changed().await.is_err() {
                    return Err(WsError::NotConnected);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| WsError::Timeout)?
    }

    /// Disconnect and cancel any pending reconnect.
    ///
    /// Sends a graceful close to the background task and waits for it to finish.
    pub async fn disconnect(&self) -> Result<(), WsError> {
        let tx = lock(&self.cmd_tx).take();
        if let Some(tx) = tx {
            let _ = tx.send(Command::Disconnect).await;
        }

        let handle = lock(&self.task_handle).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("WebSocket task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.shared.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    /// Serialize and send a payload.
    ///
    /// Sent immediately when open; otherwise queued and flushed in FIFO order
    /// on the next successful open.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), WsError> {
        let text =
            serde_json::to_string(payload).map_err(|e| WsError::SendFailed(e.to_string()))?;
        self.send_text(text)
    }

    /// Send a pre-serialized text frame. Same queueing rules as [`WsClient::send`].
    pub fn send_text(&self, text: String) -> Result<(), WsError> {
        let guard = lock(&self.cmd_tx);
        match guard.as_ref() {
            Some(tx) => match tx.try_send(Command::Send(text)) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    Err(WsError::SendFailed("Command channel full".into()))
                }
                Err(mpsc::error::TrySendError::Closed(Command::Send(text))) => {
                    self.shared.enqueue(text);
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(Command::Disconnect)) => Ok(()),
            },
            None => {
                self.shared.enqueue(text);
                Ok(())
            }
        }
    }

    /// Number of frames waiting for the next open.
    pub fn queued_len(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Drop every queued frame. Returns how many were discarded.
    pub fn clear_queue(&self) -> usize {
        let mut pending = lock(&self.shared.pending);
        let n = pending.len();
        pending.clear();
        n
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// A `watch` receiver tracking the connection status.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Register a listener for transport events. Runs on the transport task.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&WsEvent) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    /// Subscribe to transport events through an unbounded channel.
    pub fn events(&self) -> (ListenerId, mpsc::UnboundedReceiver<WsEvent>) {
        self.shared.bus.channel()
    }

    fn is_running(&self) -> bool {
        lock(&self.cmd_tx)
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task_handle).take() {
            handle.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_task(shared: Arc<Shared>, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut attempts: u32 = 0;

    loop {
        // ── 1. Attempt connection ────────────────────────────────────────
        shared.set_status(ConnectionStatus::Connecting);
        let outcome =
            match until_cancelled(&shared, &mut cmd_rx, attempt_connect(&shared.config)).await {
                Some(outcome) => outcome,
                None => {
                    shared.set_status(ConnectionStatus::Disconnected);
                    return;
                }
            };

        let reason = match outcome {
            Ok((mut sink, stream)) => {
                // ── 2. Connected: flush queue, then serve ────────────────
                attempts = 0;
                shared.set_status(ConnectionStatus::Connected);
                flush_pending(&shared, &mut sink).await;
                shared.bus.emit(&WsEvent::Connected);

                let reason = run_connected(&shared, &mut cmd_rx, sink, stream).await;

                shared.set_status(ConnectionStatus::Disconnected);
                let (code, text) = match &reason {
                    DisconnectReason::UserRequested => (Some(1000), "Client disconnect".to_string()),
                    DisconnectReason::Lost { code, reason } => (*code, reason.clone()),
                };
                shared.bus.emit(&WsEvent::Disconnected { code, reason: text });
                reason
            }
            Err(e) => {
                tracing::error!("WebSocket connection failed: {}", e);
                shared.set_status(ConnectionStatus::Disconnected);
                shared
                    .bus
                    .emit(&WsEvent::Error(format!("Connection failed: {}", e)));
                DisconnectReason::Lost {
                    code: None,
                    reason: e,
                }
            }
        };

        // ── 3. Post-disconnect decision ──────────────────────────────────
        let last_reason = match reason {
            DisconnectReason::UserRequested => return,
            DisconnectReason::Lost { reason, .. } => reason,
        };

        if !shared.config.reconnect {
            shared.stop(WsError::ConnectionFailed(last_reason));
            return;
        }

        if attempts >= shared.config.max_reconnect_attempts {
            tracing::error!("Giving up after {} reconnect attempts", attempts);
            shared.stop(WsError::ReconnectExhausted { attempts });
            shared.bus.emit(&WsEvent::MaxReconnectReached { attempts });
            return;
        }

        attempts += 1;
        let delay = backoff_delay(&shared.config, attempts);
        tracing::info!(
            "Reconnect attempt {}/{} in {}ms",
            attempts,
            shared.config.max_reconnect_attempts,
            delay.as_millis()
        );
        if until_cancelled(&shared, &mut cmd_rx, tokio::time::sleep(delay))
            .await
            .is_none()
        {
            shared.set_status(ConnectionStatus::Disconnected);
            return;
        }
    }
}

/// Drive `fut` while still accepting commands.
///
/// Sends arriving meanwhile are queued for the next open. Returns `None` if
/// a disconnect was requested (or the handle dropped) before `fut` finished.
async fn until_cancelled<F: Future>(
    shared: &Shared,
    cmd_rx: &mut mpsc::Receiver<Command>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(text)) => shared.enqueue(text),
                Some(Command::Disconnect) | None => return None,
            }
        }
    }
}

/// The inner connected loop — runs until the connection breaks.
async fn run_connected(
    shared: &Shared,
    cmd_rx: &mut mpsc::Receiver<Command>,
    mut sink: WsSink,
    mut stream: SplitStream<WsStream>,
) -> DisconnectReason {
    let ping_enabled = shared.config.ping_interval_ms > 0;
    let ping_dur = Duration::from_millis(shared.config.ping_interval_ms.max(1));
    let pong_dur = Duration::from_millis(shared.config.pong_timeout_ms);

    let mut ping_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + ping_dur, ping_dur);

    let mut pong_deadline: Option<tokio::time::Instant> = None;
    let far_future = tokio::time::Instant::now() + Duration::from_secs(86400);
    let pong_sleep = tokio::time::sleep_until(far_future);
    tokio::pin!(pong_sleep);

    loop {
        tokio::select! {
            // ── a) Incoming frame ────────────────────────────────────────
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        match serde_json::from_str::<serde_json::Value>(text_str) {
                            Ok(value) => shared.bus.emit(&WsEvent::Message(value)),
                            Err(e) => {
                                tracing::warn!("Dropping unparseable frame: {} — raw: {}", e, text_str);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                        pong_sleep.as_mut().reset(far_future);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        return DisconnectReason::Lost { code: Some(code), reason };
                    }
                    Some(Ok(_)) => {} // Binary, Frame — ignore
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        tracing::error!("WebSocket error: {}", reason);
                        return DisconnectReason::Lost { code: None, reason };
                    }
                    None => {
                        return DisconnectReason::Lost { code: None, reason: "Stream ended".into() };
                    }
                }
            }

            // ── b) Command from public API ───────────────────────────────
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
                            tracing::warn!("Send failed, requeueing: {}", e);
                            shared.requeue_front(text);
                            shared.bus.emit(&WsEvent::Error(format!("Send failed: {}", e)));
                            return DisconnectReason::Lost { code: None, reason: e.to_string() };
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        return DisconnectReason::UserRequested;
                    }
                }
            }

            // ── c) Keepalive ping ────────────────────────────────────────
            _ = ping_interval.tick(), if ping_enabled => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    tracing::warn!("Failed to send ping: {}", e);
                } else if pong_deadline.is_none() {
                    let deadline = tokio::time::Instant::now() + pong_dur;
                    pong_deadline = Some(deadline);
                    pong_sleep.as_mut().reset(deadline);
                }
            }

            // ── d) Pong timeout ──────────────────────────────────────────
            () = &mut pong_sleep, if pong_deadline.is_some() => {
                tracing::warn!(
                    "Pong timeout — no response within {}ms",
                    shared.config.pong_timeout_ms
                );
                let _ = sink.close().await;
                return DisconnectReason::Lost { code: None, reason: "Pong timeout".into() };
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn attempt_connect(config: &WsConfig) -> Result<(WsSink, SplitStream<WsStream>), String> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(config.url.as_str()))
        .await
        .map_err(|_| "Connection timeout".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(ws_stream.split())
}

async fn flush_pending(shared: &Shared, sink: &mut WsSink) {
    let messages: Vec<String> = lock(&shared.pending).drain(..).collect();
    if messages.is_empty() {
        return;
    }
    tracing::info!("Flushing {} queued message(s)", messages.len());
    let mut iter = messages.into_iter();
    while let Some(text) = iter.next() {
        if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
            tracing::warn!("Failed to flush queued message: {}", e);
            // Keep the unsent tail, in order, for the next open.
            let mut pending = lock(&shared.pending);
            for rest in iter.rev() {
                pending.push_front(rest);
            }
            pending.push_front(text);
            return;
        }
    }
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}

fn backoff_delay(config: &WsConfig, attempt: u32) -> Duration {
    let base = config.backoff_delay_ms(attempt);
    let jitter = if config.reconnect_jitter_ms > 0 {
        rand::random::<u64>() % config.reconnect_jitter_ms
    } else {
        0
    };
    Duration::from_millis(base.saturating_add(jitter).min(config.max_reconnect_delay_ms))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
