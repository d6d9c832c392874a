//! Payroll sub-client — batch runs and recurring payments.

use std::sync::{Arc, Weak};

use crate::auth::store::SCHEDULES_STORAGE_KEY;
use crate::client::{ClientInner, CrosspayClient};
use crate::domain::payroll::{PayrollEntry, PayrollOutcome, ScheduledPayment};
use crate::error::{AuthError, SdkError};

pub struct Payroll<'a> {
    pub(crate) client: &'a CrosspayClient,
}

impl<'a> Payroll<'a> {
    /// Pay every entry from the authenticated address, one session each.
    ///
    /// Entries run sequentially; a failed entry is recorded in its outcome
    /// and does not stop the batch.
    pub async fn process_payroll(&self, entries: Vec<PayrollEntry>) -> Result<Vec<PayrollOutcome>, SdkError> {
        self.client.ensure_authenticated()?;
        let payer = self.client.address().ok_or(AuthError::NotAuthenticated)?;
        let sessions = self.client.sessions();

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let opened = sessions
                .create_payroll_session(payer.clone(), entry.recipient.clone(), entry.amount, entry.asset.clone())
                .await;
            let outcome = match opened {
                Err(e) => PayrollOutcome {
                    entry,
                    session: None,
                    error: Some(e.to_string()),
                },
                Ok(session) => match sessions.process_payment(&session.id).await {
                    Ok(settled) => PayrollOutcome {
                        entry,
                        session: Some(settled),
                        error: None,
                    },
                    Err(e) => PayrollOutcome {
                        entry,
                        session: sessions.get(&session.id).await,
                        error: Some(e.to_string()),
                    },
                },
            };
            outcomes.push(outcome);
        }

        let settled = outcomes.iter().filter(|o| o.is_success()).count();
        tracing::info!("Payroll run finished: {}/{} settled", settled, outcomes.len());
        Ok(outcomes)
    }

    /// Start a recurring transfer and persist it.
    ///
    /// The first transfer happens one interval from now. Fails with
    /// `SessionError::AlreadyScheduled` if the id is already running.
    pub async fn schedule(&self, payment: ScheduledPayment) -> Result<(), SdkError> {
        if payment.interval_secs == 0 {
            return Err(SdkError::Validation("schedule interval must be at least one second".to_string()));
        }
        self.arm(payment.clone())?;
        let mut saved = self.load_saved().await?;
        saved.retain(|p| p.id != payment.id);
        saved.push(payment.clone());
        self.save(&saved).await?;
        tracing::info!(
            "Scheduled {} {} to {} every {}s ({})",
            payment.amount,
            payment.asset,
            payment.recipient,
            payment.interval_secs,
            payment.id
        );
        Ok(())
    }

    /// Stop a schedule and drop it from storage. Returns whether it was running.
    pub async fn cancel(&self, id: &str) -> Result<bool, SdkError> {
        let was_running = self.client.inner.scheduler.cancel(id);
        let mut saved = self.load_saved().await?;
        let before = saved.len();
        saved.retain(|p| p.id != id);
        if saved.len() != before {
            self.save(&saved).await?;
        }
        Ok(was_running)
    }

    /// Re-arm every persisted schedule that is not already running.
    /// Returns how many were started.
    pub async fn restore_schedules(&self) -> Result<usize, SdkError> {
        let mut started = 0;
        for payment in self.load_saved().await? {
            if payment.interval_secs == 0 {
                tracing::warn!("Skipping persisted schedule {} with zero interval", payment.id);
                continue;
            }
            match self.arm(payment) {
                Ok(()) => started += 1,
                Err(e) => tracing::debug!("Not restoring schedule: {}", e),
            }
        }
        tracing::info!("Restored {} scheduled payment(s)", started);
        Ok(started)
    }

    pub fn scheduled(&self) -> Vec<ScheduledPayment> {
        self.client.inner.scheduler.scheduled()
    }

    fn arm(&self, payment: ScheduledPayment) -> Result<(), SdkError> {
        let weak = Arc::downgrade(&self.client.inner);
        self.client
            .inner
            .scheduler
            .start(payment, move |p| tokio::spawn(run_schedule(weak, p)))?;
        Ok(())
    }

    async fn load_saved(&self) -> Result<Vec<ScheduledPayment>, SdkError> {
        match self.client.inner.store.get(SCHEDULES_STORAGE_KEY).await? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    async fn save(&self, list: &[ScheduledPayment]) -> Result<(), SdkError> {
        let encoded = serde_json::to_string(list)?;
        self.client.inner.store.set(SCHEDULES_STORAGE_KEY, &encoded).await?;
        Ok(())
    }
}

/// Tick loop for one schedule. Holds only a weak reference between ticks so
/// a dropped client stops its schedules.
async fn run_schedule(weak: Weak<ClientInner>, payment: ScheduledPayment) {
    let period = payment.interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let client = CrosspayClient { inner };
        let result = client
            .transfers()
            .transfer(payment.recipient.clone(), payment.amount, payment.asset.clone())
            .await;
        if result.success {
            tracing::info!("Scheduled payment {} sent", payment.id);
        } else {
            tracing::warn!(
                "Scheduled payment {} failed: {}",
                payment.id,
                result.error.unwrap_or_default()
            );
        }
    }
}
