//! Sessions sub-client — open and settle two-party payment sessions.

use rust_decimal::Decimal;
use serde_json::json;

use crate::client::{ClientEvent, CrosspayClient};
use crate::domain::session::wire::{AppSessionResult, CloseAppSessionParams, CreateAppSessionParams};
use crate::domain::session::{
    opening_allocations, settled_allocations, AppDefinition, PaymentSession, SessionStatus,
};
use crate::error::{SdkError, SessionError};
use crate::rpc::{parse_result, Method};
use crate::shared::{Address, Asset};

pub struct Sessions<'a> {
    pub(crate) client: &'a CrosspayClient,
}

impl<'a> Sessions<'a> {
    /// Open a session moving `amount` of `asset` from `payer` to `payee`.
    ///
    /// The session starts `Active` with everything allocated to the payer. If
    /// the broker does not return an id, a local one is generated.
    pub async fn create_payroll_session(
        &self,
        payer: impl Into<Address>,
        payee: impl Into<Address>,
        amount: Decimal,
        asset: impl Into<Asset>,
    ) -> Result<PaymentSession, SdkError> {
        let payer = payer.into();
        let payee = payee.into();
        let asset = asset.into();

        if amount <= Decimal::ZERO {
            return Err(SdkError::Validation(format!("amount must be positive, got {}", amount)));
        }
        if payer == payee {
            return Err(SdkError::Validation("payer and payee must differ".to_string()));
        }

        let nonce = self.client.inner.nonces.next_nonce();
        let params = CreateAppSessionParams {
            definition: AppDefinition::two_party(payer.clone(), payee.clone(), nonce),
            allocations: opening_allocations(&payer, &payee, &asset, amount),
        };

        let value = self
            .client
            .request(Method::CreateAppSession, Method::CreateAppSession, json!([params]))
            .await?;
        let result: AppSessionResult = parse_result(&value).unwrap_or_else(|e| {
            tracing::warn!("Unreadable create_app_session result: {}", e);
            AppSessionResult::default()
        });

        let id = match result.app_session_id {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = format!("local-{}", uuid::Uuid::new_v4());
                tracing::warn!("Broker returned no session id, using {}", id);
                id
            }
        };

        let mut session = PaymentSession::open(id, payer, payee, asset, amount);
        session.version = result.version;

        self.client.inner.sessions.write().await.insert(session.clone());
        tracing::info!(
            "Opened session {} ({} {} {} → {})",
            session.id,
            session.amount,
            session.asset,
            session.payer,
            session.payee
        );
        Ok(session)
    }

    /// Settle a session by closing it with the amount reallocated to the payee.
    ///
    /// Emits `PaymentProcessed` with the final snapshot whether settlement
    /// succeeded or failed. The close runs on its own task: dropping this
    /// future does not leave the session in `Processing`, it still ends up
    /// `Completed` or `Failed` once the broker answers or the request expires.
    pub async fn process_payment(&self, session_id: &str) -> Result<PaymentSession, SdkError> {
        self.client.ensure_authenticated()?;

        let params = {
            let mut book = self.client.inner.sessions.write().await;
            let session = book
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            session.transition(SessionStatus::Processing)?;
            session.allocations =
                settled_allocations(&session.payer, &session.payee, &session.asset, session.amount);
            CloseAppSessionParams {
                app_session_id: session.id.clone(),
                allocations: session.allocations.clone(),
            }
        };

        let settling = tokio::spawn(settle(self.client.clone(), session_id.to_string(), params));
        match settling.await {
            Ok(outcome) => outcome,
            Err(e) => Err(SessionError::Settlement {
                id: session_id.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<PaymentSession> {
        self.client.inner.sessions.read().await.get(session_id).cloned()
    }

    pub async fn list(&self) -> Vec<PaymentSession> {
        self.client.inner.sessions.read().await.list()
    }
}

/// Send the close for a session already in `Processing` and record the
/// terminal state.
async fn settle(
    client: CrosspayClient,
    session_id: String,
    params: CloseAppSessionParams,
) -> Result<PaymentSession, SdkError> {
    let outcome = client
        .request(Method::CloseAppSession, Method::CloseAppSession, json!([params]))
        .await;

    let snapshot = {
        let mut book = client.inner.sessions.write().await;
        let session = book
            .get_mut(&session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        match &outcome {
            Ok(value) => {
                if let Ok(result) = parse_result::<AppSessionResult>(value) {
                    session.version = result.version.or(session.version);
                }
                session.transition(SessionStatus::Completed)?;
            }
            Err(e) => {
                session.transition(SessionStatus::Failed)?;
                session.error = Some(e.to_string());
            }
        }
        session.clone()
    };

    client.emit(ClientEvent::PaymentProcessed(snapshot.clone()));

    match outcome {
        Ok(_) => {
            tracing::info!("Settled session {}", snapshot.id);
            Ok(snapshot)
        }
        Err(e) => {
            tracing::warn!("Settlement of session {} failed: {}", snapshot.id, e);
            Err(SessionError::Settlement {
                id: snapshot.id,
                reason: e.to_string(),
            }
            .into())
        }
    }
}
