//! Correlation of engine-initiated control requests with their responses.
//!
//! Each outstanding request owns a oneshot sender keyed by request id. The
//! pump resolves it when the matching `control_response` arrives; session
//! shutdown fails every remaining one. Either way a waiter completes exactly
//! once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{AppError, Result};

type Reply = oneshot::Sender<Result<Value>>;

#[derive(Debug, Default)]
struct Pending {
    waiters: HashMap<String, Reply>,
    closed: bool,
}

/// Table of outstanding control requests.
#[derive(Debug)]
pub struct ControlChannel {
    pending: Mutex<Pending>,
    prefix: String,
    next_id: AtomicU64,
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlChannel {
    /// Create an empty channel with a random request-id prefix.
    #[must_use]
    pub fn new() -> Self {
        let mut prefix = uuid::Uuid::new_v4().simple().to_string();
        prefix.truncate(8);
        Self {
            pending: Mutex::new(Pending::default()),
            prefix,
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A request id unique within this session.
    #[must_use]
    pub fn next_request_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("req-{}-{n}", self.prefix)
    }

    /// Register a waiter for `request_id`.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionClosed` — the channel has been failed.
    /// - `AppError::Control` — `request_id` is already outstanding.
    pub fn register(&self, request_id: &str) -> Result<ControlWaiter> {
        let mut pending = self.lock();
        if pending.closed {
            return Err(AppError::SessionClosed("session closed".into()));
        }
        if pending.waiters.contains_key(request_id) {
            return Err(AppError::Control(format!(
                "duplicate request id '{request_id}'"
            )));
        }

        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(request_id.to_owned(), tx);
        Ok(ControlWaiter {
            request_id: request_id.to_owned(),
            rx,
        })
    }

    /// Whether `request_id` came from [`next_request_id`](Self::next_request_id).
    #[must_use]
    pub fn issued_here(&self, request_id: &str) -> bool {
        request_id
            .strip_prefix("req-")
            .and_then(|rest| rest.strip_prefix(self.prefix.as_str()))
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Deliver a response. Returns `false` when no waiter matched.
    ///
    /// Responses to requests sent without a waiter (interrupts, tool
    /// registration) or whose waiter was cancelled are dropped quietly.
    pub fn resolve(&self, request_id: &str, outcome: std::result::Result<Value, String>) -> bool {
        let Some(reply) = self.lock().waiters.remove(request_id) else {
            if self.issued_here(request_id) {
                debug!(request_id, "control response without a waiter, dropping");
            } else {
                warn!(request_id, "unmatched control response, dropping");
            }
            return false;
        };

        let result = outcome.map_err(AppError::Control);
        if reply.send(result).is_err() {
            debug!(request_id, "control response arrived after its waiter was dropped");
        }
        true
    }

    /// Forget a waiter without resolving it: its request was never sent or
    /// its caller stopped waiting.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.lock().waiters.remove(request_id).is_some()
    }

    /// Fail every outstanding waiter and refuse new registrations.
    /// Returns how many waiters were failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let waiters: Vec<(String, Reply)> = {
            let mut pending = self.lock();
            pending.closed = true;
            pending.waiters.drain().collect()
        };

        let count = waiters.len();
        for (request_id, reply) in waiters {
            debug!(request_id = %request_id, reason, "failing outstanding control request");
            let _ = reply.send(Err(AppError::SessionClosed(reason.to_owned())));
        }
        count
    }

    /// Number of outstanding waiters.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Whether [`fail_all`](Self::fail_all) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Receiving half of one registered control request.
#[derive(Debug)]
pub struct ControlWaiter {
    request_id: String,
    rx: oneshot::Receiver<Result<Value>>,
}

impl ControlWaiter {
    /// The request id this waiter answers.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the response payload.
    ///
    /// # Errors
    ///
    /// - `AppError::Control` — the worker answered with an error.
    /// - `AppError::SessionClosed` — the session closed first.
    pub async fn wait(self) -> Result<Value> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(AppError::SessionClosed("session closed".into())))
    }

    /// The response, if it has already arrived.
    pub fn try_take(&mut self) -> Option<Result<Value>> {
        self.rx.try_recv().ok()
    }
}
