//! Recurring payments, each driven by its own tokio task.
//!
//! The scheduler only owns the task handles; what a tick does is decided by
//! the closure handed to [`PaymentScheduler::start`]. Handles are aborted on
//! cancel, on [`PaymentScheduler::cancel_all`] and when the scheduler drops.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::shared::{Address, Asset};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPayment {
    /// Caller-chosen id; at most one schedule per id runs at a time.
    pub id: String,
    pub recipient: Address,
    pub amount: Decimal,
    pub asset: Asset,
    pub interval_secs: u64,
}

impl ScheduledPayment {
    pub fn new(
        id: impl Into<String>,
        recipient: impl Into<Address>,
        amount: Decimal,
        asset: impl Into<Asset>,
        interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            recipient: recipient.into(),
            amount,
            asset: asset.into(),
            interval_secs: interval.as_secs(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

struct Running {
    payment: ScheduledPayment,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct PaymentScheduler {
    running: Mutex<HashMap<String, Running>>,
}

impl PaymentScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `payment` unless a schedule with the same id is already running.
    ///
    /// `spawn` is only called when the id is free.
    pub fn start<F>(&self, payment: ScheduledPayment, spawn: F) -> Result<(), SessionError>
    where
        F: FnOnce(ScheduledPayment) -> JoinHandle<()>,
    {
        let mut running = self.lock();
        running.retain(|_, r| !r.handle.is_finished());
        if running.contains_key(&payment.id) {
            return Err(SessionError::AlreadyScheduled(payment.id));
        }
        let handle = spawn(payment.clone());
        running.insert(payment.id.clone(), Running { payment, handle });
        Ok(())
    }

    /// Stop one schedule. Returns whether it was running.
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(r) => {
                r.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop every schedule, returning how many were running.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Running> = self.lock().drain().map(|(_, r)| r).collect();
        for r in &drained {
            r.handle.abort();
        }
        if !drained.is_empty() {
            tracing::info!("Stopped {} scheduled payment(s)", drained.len());
        }
        drained.len()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock().get(id).is_some_and(|r| !r.handle.is_finished())
    }

    /// Snapshot of running schedules, ordered by id.
    pub fn scheduled(&self) -> Vec<ScheduledPayment> {
        let mut list: Vec<ScheduledPayment> = self
            .lock()
            .values()
            .filter(|r| !r.handle.is_finished())
            .map(|r| r.payment.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PaymentScheduler {
    fn drop(&mut self) {
        for (_, r) in self.lock().drain() {
            r.handle.abort();
        }
    }
}
