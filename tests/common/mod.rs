//! In-process mock broker and helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crosspay_sdk::auth::SessionKey;
use crosspay_sdk::client::{ClientEvent, CrosspayClient, CrosspayClientBuilder};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const CHALLENGE: &str = "challenge-123";
pub const JWT: &str = "jwt-1";

pub type Handler = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
enum Control {
    Push(String),
    Drop,
}

/// WebSocket server on 127.0.0.1 that records every request frame and
/// answers through a handler.
pub struct MockBroker {
    pub url: String,
    frames: Arc<Mutex<Vec<Value>>>,
    control: broadcast::Sender<Control>,
    task: JoinHandle<()>,
}

impl MockBroker {
    pub async fn start() -> Self {
        Self::with_handler(Arc::new(default_reply)).await
    }

    pub async fn with_handler(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let frames = Arc::new(Mutex::new(Vec::new()));
        let (control, _) = broadcast::channel(16);

        let task = tokio::spawn({
            let frames = frames.clone();
            let control = control.clone();
            async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    let mut control_rx = control.subscribe();
                    let handler = handler.clone();
                    let frames = frames.clone();
                    tokio::spawn(async move {
                        let Ok(ws) = accept_async(tcp).await else {
                            return;
                        };
                        let (mut sink, mut stream) = ws.split();
                        loop {
                            tokio::select! {
                                msg = stream.next() => match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                                            continue;
                                        };
                                        frames.lock().unwrap().push(value.clone());
                                        if let Some(reply) = handler(&value) {
                                            if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                },
                                ctl = control_rx.recv() => match ctl {
                                    Ok(Control::Push(text)) => {
                                        let _ = sink.send(Message::Text(text.into())).await;
                                    }
                                    Ok(Control::Drop) | Err(_) => {
                                        let _ = sink.send(Message::Close(None)).await;
                                        break;
                                    }
                                },
                            }
                        }
                    });
                }
            }
        });

        Self {
            url,
            frames,
            control,
            task,
        }
    }

    /// Every request frame received so far, in arrival order.
    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frames_for(&self, method: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|f| method_of(f) == Some(method))
            .collect()
    }

    /// Wait until at least `n` frames with `method` have arrived.
    pub async fn wait_for(&self, method: &str, n: usize) -> Vec<Value> {
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                let frames = self.frames_for(method);
                if frames.len() >= n {
                    return frames;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {} {} frame(s)", n, method))
    }

    /// Send a server-initiated frame on every open connection.
    pub fn push(&self, frame: Value) {
        let _ = self.control.send(Control::Push(frame.to_string()));
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Drop);
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Drop);
        self.task.abort();
    }
}

// ─── Frames ──────────────────────────────────────────────────────────────────

pub fn id_of(frame: &Value) -> Option<u64> {
    frame["req"][0].as_u64()
}

pub fn method_of(frame: &Value) -> Option<&str> {
    frame["req"][1].as_str()
}

pub fn params_of(frame: &Value) -> &Value {
    &frame["req"][2]
}

pub fn response(id: u64, method: &str, body: Value) -> Value {
    json!({"res": [id, method, body, 1_700_000_000_000u64], "sig": []})
}

pub fn error_response(id: u64, message: &str) -> Value {
    response(id, "error", json!({"error": message}))
}

/// Happy-path broker behaviour for every method the client uses.
pub fn default_reply(frame: &Value) -> Option<Value> {
    let id = id_of(frame)?;
    let params = params_of(frame);
    let (method, body) = match method_of(frame)? {
        "auth_request" => ("auth_challenge", json!([{"challenge_message": CHALLENGE}])),
        "auth_verify" => ("auth_verify", json!([{"success": true, "jwt_token": JWT}])),
        "get_ledger_balances" => (
            "get_ledger_balances",
            json!([[{"asset": "usdc", "amount": "250.5"}, {"asset": "eth", "amount": "1"}]]),
        ),
        "create_app_session" => {
            let nonce = params[0]["definition"]["nonce"].as_u64().unwrap_or_default();
            (
                "create_app_session",
                json!([{"app_session_id": format!("0xsession-{}", nonce), "status": "open", "version": 1}]),
            )
        }
        "close_app_session" => (
            "close_app_session",
            json!([{"app_session_id": params[0]["app_session_id"], "status": "closed", "version": 2}]),
        ),
        "transfer" => ("transfer", json!([{"transactions": []}])),
        _ => return None,
    };
    Some(response(id, method, body))
}

// ─── Clients ─────────────────────────────────────────────────────────────────

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builder pointed at `url` with fast, deterministic reconnect settings.
pub fn test_builder(url: &str) -> CrosspayClientBuilder {
    init_tracing();
    CrosspayClient::builder()
        .ws_url(url)
        .reconnect(false)
        .reconnect_delays(Duration::from_millis(1), Duration::from_millis(5))
        .reconnect_jitter(Duration::ZERO)
        .connect_timeout(TEST_TIMEOUT)
}

pub async fn connected_client(broker: &MockBroker) -> CrosspayClient {
    let client = test_builder(&broker.url).build().unwrap();
    client.connect().await.unwrap();
    client
}

pub async fn authenticated_client(broker: &MockBroker) -> (CrosspayClient, Arc<SessionKey>) {
    let client = connected_client(broker).await;
    let key = Arc::new(SessionKey::generate());
    client.authenticate(key.clone()).await.unwrap();
    (client, key)
}

/// Next event matching `predicate`, skipping the rest.
pub async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            if predicate(&event) {
                return event;
            }
        }
        panic!("event channel closed without a matching event");
    })
    .await
    .expect("timed out waiting for matching event")
}
