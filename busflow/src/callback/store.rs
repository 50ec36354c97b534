//! The pending-callback map.

use super::Continuation;
use crate::context::MediationContext;
use crate::engine::MediationOutcome;
use crate::errors::{CallbackTimeoutError, DuplicateCorrelationError};
use crate::events::EventSink;
use crate::metrics::{BusMetrics, Counter};
use crate::utils::{now_utc, Timestamp};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

struct PendingCallback {
    message_id: String,
    registered_at: Timestamp,
    expires_at: Timestamp,
    timeout_ms: u64,
    continuation: Box<dyn Continuation>,
}

/// Read-only view of a pending callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCallbackInfo {
    /// Correlation key.
    pub key: String,
    /// Message id of the suspended context.
    pub message_id: String,
    /// When the callback was registered.
    pub registered_at: Timestamp,
    /// When the callback expires.
    pub expires_at: Timestamp,
}

/// What happened to a response handed to [`CallbackStore::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A pending callback was found and resumed.
    Resumed(MediationOutcome),
    /// No pending callback had the key; the response was discarded.
    Orphaned,
}

/// Maps correlation keys to suspended continuations.
///
/// Removal from the map is the single atomic step that decides who owns a
/// continuation: whichever of `resolve`, `sweep` or a failed dispatch
/// removes the entry resumes it, and every other caller sees a miss.
/// Continuations always run outside the map's shard locks.
///
/// A caller that needs the final outcome of a suspended message can
/// [`watch`](Self::watch) its message id before mediating it; the first
/// non-suspended outcome of a resumed continuation is sent to the watcher.
pub struct CallbackStore {
    pending: DashMap<String, PendingCallback>,
    watchers: DashMap<String, oneshot::Sender<MediationOutcome>>,
    orphans: AtomicU64,
    expired: AtomicU64,
    metrics: Arc<BusMetrics>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackStore")
            .field("pending", &self.pending.len())
            .field("watchers", &self.watchers.len())
            .field("orphans", &self.orphan_count())
            .field("expired", &self.expired_count())
            .finish_non_exhaustive()
    }
}

impl CallbackStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(metrics: Arc<BusMetrics>, events: Arc<dyn EventSink>) -> Self {
        Self {
            pending: DashMap::new(),
            watchers: DashMap::new(),
            orphans: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            metrics,
            events,
        }
    }

    /// Registers a continuation under `key`, expiring after `timeout`.
    pub fn register(
        &self,
        key: impl Into<String>,
        continuation: Box<dyn Continuation>,
        timeout: Duration,
    ) -> Result<(), DuplicateCorrelationError> {
        let key = key.into();
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let registered_at = now_utc();
        let expires_at = registered_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365));
        let message_id = continuation.message_id().to_string();

        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => return Err(DuplicateCorrelationError::new(key)),
            Entry::Vacant(slot) => {
                slot.insert(PendingCallback {
                    message_id: message_id.clone(),
                    registered_at,
                    expires_at,
                    timeout_ms,
                    continuation,
                });
            }
        }

        debug!(key = %key, message_id = %message_id, timeout_ms, "Callback registered");
        self.events.try_emit(
            "callback.registered",
            Some(json!({"key": key, "message_id": message_id, "timeout_ms": timeout_ms})),
        );
        Ok(())
    }

    /// Resumes the continuation pending under `key` with `response`.
    ///
    /// Unknown, late and already-resolved keys are counted as orphans and
    /// the response is dropped.
    pub async fn resolve(&self, key: &str, response: MediationContext) -> Resolution {
        let Some((key, pending)) = self.pending.remove(key) else {
            self.orphans.fetch_add(1, Ordering::Relaxed);
            self.metrics.incr(Counter::OrphanedResponses);
            warn!(key = %key, response_id = %response.message_id(), "Discarding orphaned response");
            self.events.try_emit(
                "callback.orphaned",
                Some(json!({"key": key, "response_id": response.message_id()})),
            );
            return Resolution::Orphaned;
        };

        debug!(key = %key, message_id = %pending.message_id, "Callback resolved");
        self.events.try_emit(
            "callback.resolved",
            Some(json!({"key": key, "message_id": pending.message_id})),
        );

        let outcome = self.run(&key, pending, Ok(response)).await;
        Resolution::Resumed(outcome)
    }

    /// Expires every callback whose deadline is at or before `now`.
    ///
    /// Each expired continuation is resumed with a [`CallbackTimeoutError`].
    /// A continuation that panics is logged and the sweep carries on.
    /// Returns the expired keys.
    pub async fn sweep(&self, now: Timestamp) -> Vec<String> {
        let candidates: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(candidates.len());
        for key in candidates {
            // A concurrent resolve may have won since the scan.
            let Some((key, pending)) = self.pending.remove_if(&key, |_, p| p.expires_at <= now) else {
                continue;
            };

            self.expired.fetch_add(1, Ordering::Relaxed);
            self.metrics.incr(Counter::TimedOutCallbacks);
            warn!(
                key = %key,
                message_id = %pending.message_id,
                timeout_ms = pending.timeout_ms,
                "Callback expired"
            );
            self.events.try_emit(
                "callback.expired",
                Some(json!({
                    "key": key,
                    "message_id": pending.message_id,
                    "registered_at": pending.registered_at.to_rfc3339(),
                })),
            );

            let timeout = CallbackTimeoutError::new(&key, pending.timeout_ms);
            self.run(&key, pending, Err(timeout)).await;
            expired.push(key);
        }
        expired
    }

    async fn run(
        &self,
        key: &str,
        pending: PendingCallback,
        outcome: Result<MediationContext, CallbackTimeoutError>,
    ) -> MediationOutcome {
        let message_id = pending.message_id;
        let outcome = match AssertUnwindSafe(pending.continuation.resume(outcome))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(key = %key, message_id = %message_id, "Continuation panicked");
                MediationOutcome::Failed {
                    message_id,
                    error: format!("continuation for '{key}' panicked"),
                }
            }
        };
        self.notify(&outcome);
        outcome
    }

    /// Returns a receiver for the final outcome of `message_id` once one of
    /// its continuations concludes without suspending again.
    ///
    /// Watching the same id twice replaces the earlier watcher, whose
    /// receiver then reports a closed channel.
    pub fn watch(&self, message_id: impl Into<String>) -> oneshot::Receiver<MediationOutcome> {
        let (tx, rx) = oneshot::channel();
        self.watchers.insert(message_id.into(), tx);
        rx
    }

    /// Drops the watcher for `message_id`, if any.
    pub fn unwatch(&self, message_id: &str) {
        self.watchers.remove(message_id);
    }

    fn notify(&self, outcome: &MediationOutcome) {
        if matches!(outcome, MediationOutcome::Suspended { .. }) {
            return;
        }
        if let Some((_, tx)) = self.watchers.remove(outcome.message_id()) {
            if tx.send(outcome.clone()).is_err() {
                debug!(message_id = %outcome.message_id(), "Outcome watcher went away");
            }
        }
    }

    /// Removes a pending callback without resuming it.
    ///
    /// Used when the outbound dispatch for `key` failed. `None` means the
    /// callback was already resolved or expired.
    pub(crate) fn withdraw(&self, key: &str) -> Option<Box<dyn Continuation>> {
        self.pending.remove(key).map(|(_, pending)| pending.continuation)
    }

    /// Returns the number of pending callbacks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the pending correlation keys, sorted.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Returns a view of every pending callback, ordered by expiry.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingCallbackInfo> {
        let mut infos: Vec<PendingCallbackInfo> = self
            .pending
            .iter()
            .map(|e| PendingCallbackInfo {
                key: e.key().clone(),
                message_id: e.message_id.clone(),
                registered_at: e.registered_at,
                expires_at: e.expires_at,
            })
            .collect();
        infos.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        infos
    }

    /// Checks whether `key` is pending.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Responses discarded as orphans so far.
    #[must_use]
    pub fn orphan_count(&self) -> u64 {
        self.orphans.load(Ordering::Relaxed)
    }

    /// Callbacks expired by sweeps so far.
    #[must_use]
    pub fn expired_count(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }
}
