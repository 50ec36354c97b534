//! In-process message store.

use super::{
    FailOutcome, FailurePolicy, MessageStatus, MessageStore, NewMessage, StoreId, StoreStats,
    StoredMessage,
};
use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::utils::now_utc;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    next_id: StoreId,
    messages: BTreeMap<StoreId, StoredMessage>,
}

/// Message store held in memory. Not durable across restarts.
///
/// All state sits behind one mutex, so every operation is atomic.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    inner: Mutex<Inner>,
    policy: FailurePolicy,
}

impl InMemoryMessageStore {
    /// Creates an empty store with the default failure policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store using the failure settings of `config`.
    #[must_use]
    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            inner: Mutex::default(),
            policy: FailurePolicy::from(config),
        }
    }

    /// Number of messages held, in any status.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Returns true if the store holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn locked_entry<'a>(
    inner: &'a mut Inner,
    id: StoreId,
    action: &'static str,
) -> Result<&'a mut StoredMessage, StoreError> {
    let message = inner.messages.get_mut(&id).ok_or(StoreError::NotFound(id))?;
    if message.status != MessageStatus::Locked {
        return Err(StoreError::InvalidTransition {
            id,
            status: message.status.to_string(),
            action,
        });
    }
    Ok(message)
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn persist(&self, message: NewMessage) -> Result<StoreId, StoreError> {
        let now = now_utc();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.messages.insert(
            id,
            StoredMessage {
                id,
                queue: message.queue,
                payload: message.payload,
                arrival: now,
                attempts: 0,
                status: MessageStatus::Queued,
                available_at: now,
            },
        );
        debug!(id, "Message persisted");
        Ok(id)
    }

    async fn lock_queue(
        &self,
        queue: Option<&str>,
        n: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let now = now_utc();
        let mut inner = self.inner.lock();
        let batch: Vec<StoredMessage> = inner
            .messages
            .values_mut()
            .filter(|m| m.status == MessageStatus::Queued && m.available_at <= now)
            .filter(|m| queue.map_or(true, |q| m.queue == q))
            .take(n)
            .map(|m| {
                m.status = MessageStatus::Locked;
                m.clone()
            })
            .collect();
        Ok(batch)
    }

    async fn acknowledge(&self, id: StoreId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        locked_entry(&mut inner, id, "acknowledged")?.status = MessageStatus::Delivered;
        Ok(())
    }

    async fn fail(&self, id: StoreId) -> Result<FailOutcome, StoreError> {
        let now = now_utc();
        let mut inner = self.inner.lock();
        let message = locked_entry(&mut inner, id, "failed")?;
        let outcome = self.policy.on_failure(message.attempts, now);
        match outcome {
            FailOutcome::Requeued {
                attempts,
                available_at,
            } => {
                message.attempts = attempts;
                message.available_at = available_at;
                message.status = MessageStatus::Queued;
            }
            FailOutcome::DeadLettered { attempts } => {
                message.attempts = attempts;
                message.status = MessageStatus::Dead;
            }
        }
        Ok(outcome)
    }

    async fn get(&self, id: StoreId) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.inner.lock().messages.get(&id).cloned())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.lock();
        let mut stats = StoreStats::default();
        for message in inner.messages.values() {
            stats.count(message.status);
        }
        Ok(stats)
    }

    async fn purge_delivered(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.messages.len();
        inner
            .messages
            .retain(|_, m| m.status != MessageStatus::Delivered);
        Ok(before - inner.messages.len())
    }
}
