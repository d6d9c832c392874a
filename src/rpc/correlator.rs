//! Request correlator — pairs outgoing requests with their responses.
//!
//! Every entry is removed exactly once: by the matching response, by its
//! timeout, by [`PendingRequests::reject_all`] when the transport closes, or
//! when the caller drops its [`PendingResponse`] without waiting.
//! Whichever removes the entry owns the completion, so a request can never
//! resolve twice and late responses fall on the floor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::RequestError;
use crate::rpc::{Method, RpcResponse};

/// Default time budget for a correlated request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Completion = Result<RpcResponse, RequestError>;

struct PendingEntry {
    expected: Method,
    tx: oneshot::Sender<Completion>,
}

/// Receiving half handed to the caller by [`PendingRequests::register`].
///
/// Dropping it releases the registration, so an abandoned request never
/// outlives its caller.
pub struct PendingResponse<'a> {
    id: u64,
    rx: oneshot::Receiver<Completion>,
    requests: &'a PendingRequests,
}

impl PendingResponse<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        if self.requests.lock().remove(&self.id).is_some() {
            tracing::debug!("Request {} abandoned by its caller", self.id);
        }
    }
}

pub struct PendingRequests {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    timeout: Duration,
}

impl PendingRequests {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate a fresh id and park a completion slot under it.
    ///
    /// `expected` is the response method that counts as success; `error`
    /// responses reject and anything else is reported as unexpected.
    pub fn register(&self, expected: Method) -> PendingResponse<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, PendingEntry { expected, tx });
        PendingResponse {
            id,
            rx,
            requests: self,
        }
    }

    /// Route an inbound response to its waiter.
    ///
    /// Returns `false` when no request is pending under that id (push,
    /// duplicate, or a response that arrived after its timeout).
    pub fn complete(&self, response: RpcResponse) -> bool {
        let Some(entry) = self.lock().remove(&response.id()) else {
            return false;
        };

        let outcome = if let Some(message) = response.error_message() {
            Err(RequestError::Rejected(message))
        } else if response.method() != &entry.expected {
            Err(RequestError::UnexpectedResponse {
                expected: entry.expected.to_string(),
                got: response.method().to_string(),
            })
        } else {
            Ok(response)
        };

        let _ = entry.tx.send(outcome);
        true
    }

    /// Wait for the response to a registered request, bounded by the timeout.
    pub async fn wait(&self, mut pending: PendingResponse<'_>) -> Result<RpcResponse, RequestError> {
        let id = pending.id;
        match tokio::time::timeout(self.timeout, &mut pending.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RequestError::ConnectionClosed),
            Err(_) => {
                if self.lock().remove(&id).is_some() {
                    tracing::warn!("Request {} timed out after {:?}", id, self.timeout);
                    return Err(RequestError::Timeout {
                        id,
                        after: self.timeout,
                    });
                }
                // Completed in the same instant the timer fired.
                match pending.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RequestError::ConnectionClosed),
                }
            }
        }
    }

    /// Drop a registration without waiting (e.g. the send itself failed).
    pub fn cancel(&self, pending: &PendingResponse<'_>) {
        self.lock().remove(&pending.id);
    }

    /// Fail every pending request with `ConnectionClosed` and clear the map.
    pub fn reject_all(&self) -> usize {
        let drained: Vec<PendingEntry> = self.lock().drain().map(|(_, e)| e).collect();
        let n = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(RequestError::ConnectionClosed));
        }
        if n > 0 {
            tracing::info!("Rejected {} pending request(s) on close", n);
        }
        n
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}
