//! End-to-end coordinator tests: auth, correlation, sessions, payroll.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::{json, Value};

use crosspay_sdk::auth::signer::verify_signature;
use crosspay_sdk::auth::store::{AUTH_TOKEN_STORAGE_KEY, SCHEDULES_STORAGE_KEY};
use crosspay_sdk::auth::{AuthState, KeyStore, MemoryKeyStore, MessageSigner, SessionKey};
use crosspay_sdk::client::ClientEvent;
use crosspay_sdk::domain::payroll::{PayrollEntry, ScheduledPayment};
use crosspay_sdk::domain::session::SessionStatus;
use crosspay_sdk::error::{ErrorKind, RequestError, SdkError, SessionError, SignerError, WsError};
use crosspay_sdk::shared::{Address, Asset};

use common::{
    authenticated_client, connected_client, default_reply, error_response, id_of, method_of,
    next_event, params_of, test_builder, MockBroker, JWT,
};

// ─── Auth ────────────────────────────────────────────────────────────────────

/// Signer whose key is unavailable.
struct UnpluggedSigner;

impl MessageSigner for UnpluggedSigner {
    fn address(&self) -> Address {
        Address::new("0xunplugged")
    }

    fn sign(&self, _payload: &Value) -> Result<String, SignerError> {
        Err(SignerError::Signing("device unplugged".to_string()))
    }
}

#[tokio::test]
async fn handshake_signs_challenge_and_stores_token() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let (_, mut rx) = client.events_channel();
    let key = Arc::new(SessionKey::generate());

    let state = client.authenticate(key.clone()).await.unwrap();
    assert_eq!(state, AuthState::Authenticated);
    assert_eq!(client.address(), Some(key.address()));

    let request = &broker.frames_for("auth_request")[0];
    assert_eq!(params_of(request)[0]["address"], key.address().as_str());
    assert_eq!(params_of(request)[0]["app_name"], "crosspay");

    let verify = &broker.frames_for("auth_verify")[0];
    assert_eq!(params_of(verify)[0]["challenge"], common::CHALLENGE);
    for frame in broker.frames() {
        let sig = frame["sig"][0].as_str().unwrap();
        assert!(verify_signature(&key.address(), &frame["req"], sig));
    }

    assert_eq!(
        client.key_store().get(AUTH_TOKEN_STORAGE_KEY).await.unwrap().as_deref(),
        Some(JWT)
    );
    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::Authenticated { .. })).await;
    assert!(matches!(event, ClientEvent::Authenticated { address } if address == key.address()));
}

#[tokio::test]
async fn concurrent_authenticate_sends_one_auth_request() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let key: Arc<dyn MessageSigner> = Arc::new(SessionKey::generate());

    let (first, second) = tokio::join!(
        client.authenticate(key.clone()),
        client.authenticate(key.clone())
    );
    assert_eq!(first.unwrap(), AuthState::Authenticated);
    assert_eq!(second.unwrap(), AuthState::Authenticating);

    assert_eq!(client.authenticate(key).await.unwrap(), AuthState::Authenticated);
    assert_eq!(broker.frames_for("auth_request").len(), 1);
}

#[tokio::test]
async fn rejected_verification_resets_state() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| match method_of(frame) {
        Some("auth_verify") => Some(common::response(
            id_of(frame)?,
            "auth_verify",
            json!([{"success": false, "message": "bad signature"}]),
        )),
        _ => default_reply(frame),
    }))
    .await;
    let client = connected_client(&broker).await;
    let (_, mut rx) = client.events_channel();

    let err = client
        .authenticate(Arc::new(SessionKey::generate()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(err.to_string().contains("bad signature"));
    assert_eq!(client.auth_state(), AuthState::NotAuthenticated);

    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::Error { .. })).await;
    assert!(matches!(event, ClientEvent::Error { kind: ErrorKind::Auth, .. }));
}

#[tokio::test]
async fn signer_failure_aborts_handshake_before_sending() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let (_, mut rx) = client.events_channel();

    let err = client.authenticate(Arc::new(UnpluggedSigner)).await.unwrap_err();
    assert!(matches!(err, SdkError::Signer(SignerError::Signing(_))));
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(client.auth_state(), AuthState::NotAuthenticated);
    assert_eq!(client.pending_requests(), 0);

    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::Error { .. })).await;
    assert!(matches!(event, ClientEvent::Error { kind: ErrorKind::Auth, .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(broker.frames_for("auth_request").is_empty());
}

#[tokio::test]
async fn abandoned_handshake_can_be_retried() {
    let answered_once = Arc::new(AtomicBool::new(false));
    let broker = MockBroker::with_handler(Arc::new({
        let answered_once = answered_once.clone();
        move |frame: &Value| {
            // The first challenge request goes unanswered.
            if method_of(frame) == Some("auth_request") && !answered_once.swap(true, Ordering::SeqCst) {
                return None;
            }
            default_reply(frame)
        }
    }))
    .await;
    let client = connected_client(&broker).await;
    let key: Arc<dyn MessageSigner> = Arc::new(SessionKey::generate());

    let abandoned = tokio::time::timeout(Duration::from_millis(100), client.authenticate(key.clone())).await;
    assert!(abandoned.is_err());
    assert_eq!(client.auth_state(), AuthState::NotAuthenticated);
    assert_eq!(client.pending_requests(), 0);

    assert_eq!(client.authenticate(key).await.unwrap(), AuthState::Authenticated);
    assert_eq!(broker.frames_for("auth_request").len(), 2);
}

#[tokio::test]
async fn stored_token_skips_challenge_after_reconnect() {
    let broker = MockBroker::start().await;
    let (client, key) = authenticated_client(&broker).await;

    client.disconnect().await.unwrap();
    assert_eq!(client.auth_state(), AuthState::NotAuthenticated);
    client.connect().await.unwrap();
    client.authenticate(key).await.unwrap();

    assert_eq!(broker.frames_for("auth_request").len(), 1);
    let verifies = broker.frames_for("auth_verify");
    assert_eq!(verifies.len(), 2);
    assert_eq!(params_of(&verifies[1])[0], json!({"jwt": JWT}));
}

#[tokio::test]
async fn rejected_token_is_cleared() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| {
        if method_of(frame) == Some("auth_verify") && params_of(frame)[0].get("jwt").is_some() {
            return Some(error_response(id_of(frame)?, "token expired"));
        }
        default_reply(frame)
    }))
    .await;

    let store = Arc::new(MemoryKeyStore::new());
    store.set(AUTH_TOKEN_STORAGE_KEY, "stale").await.unwrap();
    let client = test_builder(&broker.url)
        .key_store(store.clone())
        .build()
        .unwrap();
    client.connect().await.unwrap();
    let key: Arc<dyn MessageSigner> = Arc::new(SessionKey::generate());

    let err = client.authenticate(key.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(store.get(AUTH_TOKEN_STORAGE_KEY).await.unwrap().as_deref(), None);

    // Next attempt runs the full handshake.
    assert_eq!(client.authenticate(key).await.unwrap(), AuthState::Authenticated);
    assert_eq!(broker.frames_for("auth_request").len(), 1);
    assert_eq!(store.get(AUTH_TOKEN_STORAGE_KEY).await.unwrap().as_deref(), Some(JWT));
}

#[tokio::test]
async fn session_key_is_persisted_between_clients() {
    let broker = MockBroker::start().await;
    let store: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());

    let first = test_builder(&broker.url).key_store(store.clone()).build().unwrap();
    first.connect().await.unwrap();
    first.authenticate_with_session_key().await.unwrap();

    let second = test_builder(&broker.url).key_store(store).build().unwrap();
    second.connect().await.unwrap();
    second.authenticate_with_session_key().await.unwrap();

    assert_eq!(first.address(), second.address());
}

// ─── Correlation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_balances_before_auth_sends_nothing() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;

    let err = client.balances().fetch_balances("0xA").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(broker.frames().is_empty());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn fetch_balances_normalizes_and_emits() {
    let broker = MockBroker::start().await;
    let (client, _) = authenticated_client(&broker).await;
    let (_, mut rx) = client.events_channel();

    let balances = client.balances().fetch_balances("0xA").await.unwrap();
    assert_eq!(balances[&Asset::new("usdc")], "250.5".parse::<Decimal>().unwrap());
    assert_eq!(balances[&Asset::new("eth")], Decimal::ONE);

    let sent = &broker.frames_for("get_ledger_balances")[0];
    assert_eq!(params_of(sent)[0]["participant"], "0xA");

    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::BalanceUpdated(_))).await;
    assert!(matches!(event, ClientEvent::BalanceUpdated(list) if list.len() == 2));
    assert_eq!(client.balances().latest().len(), 2);
}

#[tokio::test]
async fn unanswered_request_times_out_and_is_removed() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| match method_of(frame) {
        Some("get_ledger_balances") => None,
        _ => default_reply(frame),
    }))
    .await;
    let client = test_builder(&broker.url)
        .request_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    client.connect().await.unwrap();
    client
        .authenticate(Arc::new(SessionKey::generate()))
        .await
        .unwrap();

    let err = client.balances().fetch_balances("0xA").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestTimeout);
    assert!(err.is_recoverable());
    assert_eq!(client.pending_requests(), 0);
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn abandoned_request_is_released() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| match method_of(frame) {
        Some("get_ledger_balances") => None,
        _ => default_reply(frame),
    }))
    .await;
    let (client, _) = authenticated_client(&broker).await;

    for _ in 0..3 {
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), client.balances().fetch_balances("0xA")).await;
        assert!(abandoned.is_err());
        assert_eq!(client.pending_requests(), 0);
    }
    assert_eq!(broker.frames_for("get_ledger_balances").len(), 3);
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn close_rejects_pending_requests() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| match method_of(frame) {
        Some("get_ledger_balances") => None,
        _ => default_reply(frame),
    }))
    .await;
    let (client, _) = authenticated_client(&broker).await;
    let (_, mut rx) = client.events_channel();

    let fetching = tokio::spawn({
        let client = client.clone();
        async move { client.balances().fetch_balances("0xA").await }
    });
    broker.wait_for("get_ledger_balances", 1).await;
    assert_eq!(client.pending_requests(), 1);

    broker.drop_connections();
    let err = fetching.await.unwrap().unwrap_err();
    assert!(matches!(err, SdkError::Request(RequestError::ConnectionClosed)));
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.auth_state(), AuthState::NotAuthenticated);

    next_event(&mut rx, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
}

#[tokio::test]
async fn connect_gives_up_after_five_attempts() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = test_builder(&url)
        .reconnect(true)
        .max_reconnect_attempts(5)
        .build()
        .unwrap();
    let (_, mut rx) = client.events_channel();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, SdkError::Ws(WsError::ReconnectExhausted { attempts: 5 })));
    assert!(!err.is_recoverable());

    let event = next_event(&mut rx, |e| {
        matches!(e, ClientEvent::Error { message, .. } if message.contains("Gave up"))
    })
    .await;
    assert!(matches!(event, ClientEvent::Error { kind: ErrorKind::Connectivity, .. }));
}

#[tokio::test]
async fn error_push_is_surfaced() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let (_, mut rx) = client.events_channel();

    broker.push(json!({"res": [0, "error", {"error": "maintenance window"}, 1], "sig": []}));
    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::Error { .. })).await;
    assert!(matches!(event, ClientEvent::Error { message, .. } if message == "maintenance window"));
}

#[tokio::test]
async fn balance_push_emits_update() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let (_, mut rx) = client.events_channel();

    broker.push(json!({
        "res": [0, "bu", {"balance_updates": [{"asset": "usdc", "amount": "99"}]}, 1],
        "sig": []
    }));
    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::BalanceUpdated(_))).await;
    match event {
        ClientEvent::BalanceUpdated(list) => {
            assert_eq!(list[0].asset, Asset::new("usdc"));
            assert_eq!(list[0].amount, Decimal::from(99));
        }
        other => panic!("unexpected {:?}", other),
    }
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_opens_and_settles_to_payee() {
    let broker = MockBroker::start().await;
    let (client, _) = authenticated_client(&broker).await;
    let (_, mut rx) = client.events_channel();

    let session = client
        .sessions()
        .create_payroll_session("0xA", "0xB", Decimal::from(100), "usdc")
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.id.starts_with("0xsession-"));

    let create = &broker.frames_for("create_app_session")[0];
    let definition = &params_of(create)[0]["definition"];
    assert_eq!(definition["participants"], json!(["0xA", "0xB"]));
    assert_eq!(definition["weights"], json!([100, 0]));
    assert_eq!(definition["quorum"], 100);
    assert_eq!(
        params_of(create)[0]["allocations"],
        json!([
            {"participant": "0xA", "asset": "usdc", "amount": "100"},
            {"participant": "0xB", "asset": "usdc", "amount": "0"}
        ])
    );

    let settled = client.sessions().process_payment(&session.id).await.unwrap();
    assert_eq!(settled.status, SessionStatus::Completed);
    assert_eq!(settled.version, Some(2));

    let close = &broker.frames_for("close_app_session")[0];
    assert_eq!(params_of(close)[0]["app_session_id"], session.id.as_str());

    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::PaymentProcessed(_))).await;
    let ClientEvent::PaymentProcessed(snapshot) = event else {
        unreachable!()
    };
    assert_eq!(snapshot.status, SessionStatus::Completed);
    let allocations: Vec<(Address, Decimal)> = snapshot
        .allocations
        .iter()
        .map(|a| (a.participant.clone(), a.amount))
        .collect();
    assert_eq!(
        allocations,
        vec![
            (Address::new("0xA"), Decimal::ZERO),
            (Address::new("0xB"), Decimal::from(100))
        ]
    );

    // Completed is terminal.
    let err = client.sessions().process_payment(&session.id).await.unwrap_err();
    assert!(matches!(err, SdkError::Session(SessionError::InvalidTransition { .. })));
    assert_eq!(broker.frames_for("close_app_session").len(), 1);
}

#[tokio::test]
async fn session_nonces_increase() {
    let broker = MockBroker::start().await;
    let (client, _) = authenticated_client(&broker).await;
    for _ in 0..3 {
        client
            .sessions()
            .create_payroll_session("0xA", "0xB", Decimal::ONE, "usdc")
            .await
            .unwrap();
    }
    let nonces: Vec<u64> = broker
        .frames_for("create_app_session")
        .iter()
        .map(|f| params_of(f)[0]["definition"]["nonce"].as_u64().unwrap())
        .collect();
    assert!(nonces.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(client.sessions().list().await.len(), 3);
}

#[tokio::test]
async fn missing_session_id_falls_back_to_local_id() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| match method_of(frame) {
        Some("create_app_session") => Some(common::response(
            id_of(frame)?,
            "create_app_session",
            json!([{"status": "open"}]),
        )),
        _ => default_reply(frame),
    }))
    .await;
    let (client, _) = authenticated_client(&broker).await;

    let session = client
        .sessions()
        .create_payroll_session("0xA", "0xB", Decimal::from(5), "usdc")
        .await
        .unwrap();
    assert!(session.id.starts_with("local-"));
    assert!(client.sessions().get(&session.id).await.is_some());
}

#[tokio::test]
async fn failed_settlement_marks_session_failed() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| match method_of(frame) {
        Some("close_app_session") => Some(error_response(id_of(frame)?, "quorum not reached")),
        _ => default_reply(frame),
    }))
    .await;
    let (client, _) = authenticated_client(&broker).await;
    let (_, mut rx) = client.events_channel();

    let session = client
        .sessions()
        .create_payroll_session("0xA", "0xB", Decimal::from(100), "usdc")
        .await
        .unwrap();
    let err = client.sessions().process_payment(&session.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Settlement);
    assert!(err.to_string().contains("quorum not reached"));

    let stored = client.sessions().get(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Failed);
    assert!(stored.error.is_some());

    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::PaymentProcessed(_))).await;
    assert!(matches!(event, ClientEvent::PaymentProcessed(s) if s.status == SessionStatus::Failed));

    // Failed is terminal and never retried.
    let again = client.sessions().process_payment(&session.id).await.unwrap_err();
    assert!(matches!(again, SdkError::Session(SessionError::InvalidTransition { .. })));
    assert_eq!(broker.frames_for("close_app_session").len(), 1);
}

#[tokio::test]
async fn abandoned_settlement_still_reaches_terminal_state() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| match method_of(frame) {
        Some("close_app_session") => None,
        _ => default_reply(frame),
    }))
    .await;
    let client = test_builder(&broker.url)
        .request_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    client.connect().await.unwrap();
    client
        .authenticate(Arc::new(SessionKey::generate()))
        .await
        .unwrap();
    let (_, mut rx) = client.events_channel();

    let session = client
        .sessions()
        .create_payroll_session("0xA", "0xB", Decimal::from(100), "usdc")
        .await
        .unwrap();
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), client.sessions().process_payment(&session.id)).await;
    assert!(abandoned.is_err());

    let event = next_event(&mut rx, |e| matches!(e, ClientEvent::PaymentProcessed(_))).await;
    assert!(matches!(&event, ClientEvent::PaymentProcessed(s) if s.status == SessionStatus::Failed));

    let stored = client.sessions().get(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Failed);
    assert!(stored.error.is_some());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let broker = MockBroker::start().await;
    let (client, _) = authenticated_client(&broker).await;
    let err = client.sessions().process_payment("0xnope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    assert!(broker.frames_for("close_app_session").is_empty());
}

#[tokio::test]
async fn invalid_amount_is_rejected_locally() {
    let broker = MockBroker::start().await;
    let (client, _) = authenticated_client(&broker).await;
    let err = client
        .sessions()
        .create_payroll_session("0xA", "0xB", Decimal::ZERO, "usdc")
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::Validation(_)));
    assert!(broker.frames_for("create_app_session").is_empty());
}

// ─── Transfers & payroll ─────────────────────────────────────────────────────

#[tokio::test]
async fn transfer_reports_success_and_failure() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| {
        if method_of(frame) == Some("transfer") && params_of(frame)[0]["destination"] == "0xBAD" {
            return Some(error_response(id_of(frame)?, "insufficient funds"));
        }
        default_reply(frame)
    }))
    .await;
    let (client, _) = authenticated_client(&broker).await;

    let ok = client.transfers().transfer("0xB", Decimal::from(25), "usdc").await;
    assert!(ok.success);
    assert!(ok.error.is_none());
    let sent = &broker.frames_for("transfer")[0];
    assert_eq!(
        params_of(sent)[0],
        json!({"destination": "0xB", "allocations": [{"asset": "usdc", "amount": "25"}]})
    );

    let failed = client.transfers().transfer("0xBAD", Decimal::from(25), "usdc").await;
    assert!(!failed.success);
    assert!(failed.error.unwrap().contains("insufficient funds"));
}

#[tokio::test]
async fn payroll_batch_continues_past_failures() {
    let broker = MockBroker::with_handler(Arc::new(|frame: &Value| {
        if method_of(frame) == Some("create_app_session")
            && params_of(frame)[0]["definition"]["participants"][1] == "0xBAD"
        {
            return Some(error_response(id_of(frame)?, "unknown participant"));
        }
        default_reply(frame)
    }))
    .await;
    let (client, key) = authenticated_client(&broker).await;

    let outcomes = client
        .payroll()
        .process_payroll(vec![
            PayrollEntry::new("0xB", Decimal::from(10), "usdc"),
            PayrollEntry::new("0xBAD", Decimal::from(5), "usdc"),
            PayrollEntry::new("0xC", Decimal::from(7), "usdc"),
        ])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_success());
    assert!(!outcomes[1].is_success());
    assert!(outcomes[1].session.is_none());
    assert!(outcomes[1].error.as_deref().unwrap().contains("unknown participant"));
    assert!(outcomes[2].is_success());

    let payer = outcomes[0].session.as_ref().unwrap().payer.clone();
    assert_eq!(payer, key.address());
    assert_eq!(broker.frames_for("close_app_session").len(), 2);
}

#[tokio::test]
async fn payroll_requires_authentication() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let err = client
        .payroll()
        .process_payroll(vec![PayrollEntry::new("0xB", Decimal::ONE, "usdc")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(broker.frames().is_empty());
}

#[tokio::test]
async fn scheduled_payment_runs_once_per_id_and_persists() {
    let broker = MockBroker::start().await;
    let (client, _) = authenticated_client(&broker).await;
    let payment = ScheduledPayment::new("rent", "0xB", Decimal::ONE, "usdc", Duration::from_secs(1));

    client.payroll().schedule(payment.clone()).await.unwrap();
    let dup = client.payroll().schedule(payment.clone()).await.unwrap_err();
    assert!(matches!(dup, SdkError::Session(SessionError::AlreadyScheduled(id)) if id == "rent"));

    let saved = client.key_store().get(SCHEDULES_STORAGE_KEY).await.unwrap().unwrap();
    let saved: Vec<ScheduledPayment> = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved, vec![payment]);

    let transfers = broker.wait_for("transfer", 1).await;
    assert_eq!(params_of(&transfers[0])[0]["destination"], "0xB");

    assert!(client.payroll().cancel("rent").await.unwrap());
    assert!(client.payroll().scheduled().is_empty());
    let saved = client.key_store().get(SCHEDULES_STORAGE_KEY).await.unwrap().unwrap();
    assert_eq!(saved, "[]");
}

#[tokio::test]
async fn disconnect_stops_schedules_and_restore_rearms_them() {
    let broker = MockBroker::start().await;
    let (client, key) = authenticated_client(&broker).await;
    let payment = ScheduledPayment::new("salary", "0xB", Decimal::ONE, "usdc", Duration::from_secs(3600));
    client.payroll().schedule(payment).await.unwrap();
    assert_eq!(client.payroll().scheduled().len(), 1);

    client.disconnect().await.unwrap();
    assert!(client.payroll().scheduled().is_empty());

    client.connect().await.unwrap();
    client.authenticate(key).await.unwrap();
    assert_eq!(client.payroll().restore_schedules().await.unwrap(), 1);
    assert_eq!(client.payroll().restore_schedules().await.unwrap(), 0);
    assert_eq!(client.payroll().scheduled()[0].id, "salary");
}
