//! Persistent message store.
//!
//! A durable queue with exclusive-lock retrieval. A message is created
//! `queued`, moves to `locked` when handed out by [`MessageStore::lock`], and
//! from there either to `delivered` (acknowledged), back to `queued` (failed
//! with retries left) or to `dead` (failed too often). Dead and delivered
//! messages are never handed out again.
//!
//! Two concurrent `lock` calls never return the same message.

mod memory;
mod retrying;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryMessageStore;
pub use retrying::RetryingStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMessageStore;

use crate::config::{RetryMode, StoreConfig};
use crate::context::MediationContext;
use crate::errors::StoreError;
use crate::utils::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Identifier assigned to a persisted message.
pub type StoreId = i64;

/// Queue used when none is given.
pub const DEFAULT_QUEUE: &str = "default";

/// Lifecycle state of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting to be locked.
    Queued,
    /// Handed to a consumer.
    Locked,
    /// Acknowledged.
    Delivered,
    /// Failed too many times.
    Dead,
}

impl MessageStatus {
    /// Stable string form used by durable backends.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Locked => "locked",
            Self::Delivered => "delivered",
            Self::Dead => "dead",
        }
    }

    /// Parses the string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "locked" => Some(Self::Locked),
            "delivered" => Some(Self::Delivered),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Queue name.
    pub queue: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

impl NewMessage {
    /// Creates a message for the default queue.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            payload,
        }
    }

    /// Sets the queue.
    #[must_use]
    pub fn in_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Serializes a whole mediation context.
    pub fn from_context(ctx: &MediationContext) -> Result<Self, StoreError> {
        let payload =
            serde_json::to_vec(ctx).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::new(payload))
    }
}

/// A durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Assigned id; increases with arrival.
    pub id: StoreId,
    /// Queue name.
    pub queue: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
    /// When the message was persisted.
    pub arrival: Timestamp,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    /// Current status.
    pub status: MessageStatus,
    /// Earliest time the message may be locked.
    pub available_at: Timestamp,
}

impl StoredMessage {
    /// Deserializes a payload written by [`NewMessage::from_context`].
    pub fn to_context(&self) -> Result<MediationContext, StoreError> {
        serde_json::from_slice(&self.payload).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// Result of [`MessageStore::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Returned to the queue.
    Requeued {
        /// Failed attempts so far.
        attempts: u32,
        /// When the message becomes lockable again.
        available_at: Timestamp,
    },
    /// Moved to the dead state.
    DeadLettered {
        /// Failed attempts so far.
        attempts: u32,
    },
}

/// Message counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Queued messages.
    pub queued: usize,
    /// Locked messages.
    pub locked: usize,
    /// Delivered messages not yet purged.
    pub delivered: usize,
    /// Dead messages.
    pub dead: usize,
}

impl StoreStats {
    /// Adds one message of `status`.
    pub fn count(&mut self, status: MessageStatus) {
        match status {
            MessageStatus::Queued => self.queued += 1,
            MessageStatus::Locked => self.locked += 1,
            MessageStatus::Delivered => self.delivered += 1,
            MessageStatus::Dead => self.dead += 1,
        }
    }

    /// Total messages held.
    #[must_use]
    pub fn total(&self) -> usize {
        self.queued + self.locked + self.delivered + self.dead
    }
}

/// Decides what happens to a message on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Failures tolerated before dead-lettering.
    pub max_retries: u32,
    /// Requeue timing.
    pub retry_mode: RetryMode,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for FailurePolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_mode: config.retry_mode.clone(),
        }
    }
}

impl FailurePolicy {
    /// Applies one more failure to a message that has failed `attempts`
    /// times before.
    #[must_use]
    pub fn on_failure(&self, attempts: u32, now: Timestamp) -> FailOutcome {
        let attempts = attempts.saturating_add(1);
        if attempts > self.max_retries {
            return FailOutcome::DeadLettered { attempts };
        }
        let delay = self.retry_mode.delay_after(attempts);
        let available_at =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        FailOutcome::Requeued {
            attempts,
            available_at,
        }
    }
}

/// Durable queue with exclusive-lock retrieval.
#[async_trait]
pub trait MessageStore: Send + Sync + Debug {
    /// Appends a message and returns its id.
    async fn persist(&self, message: NewMessage) -> Result<StoreId, StoreError>;

    /// Locks up to `n` lockable messages, oldest first, optionally
    /// restricted to one queue.
    async fn lock_queue(&self, queue: Option<&str>, n: usize)
        -> Result<Vec<StoredMessage>, StoreError>;

    /// Locks up to `n` lockable messages across all queues, oldest first.
    async fn lock(&self, n: usize) -> Result<Vec<StoredMessage>, StoreError> {
        self.lock_queue(None, n).await
    }

    /// Marks a locked message delivered.
    async fn acknowledge(&self, id: StoreId) -> Result<(), StoreError>;

    /// Records a failed delivery of a locked message.
    async fn fail(&self, id: StoreId) -> Result<FailOutcome, StoreError>;

    /// Reads a message without changing it.
    async fn get(&self, id: StoreId) -> Result<Option<StoredMessage>, StoreError>;

    /// Counts messages per status.
    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Removes delivered messages and returns how many were removed.
    async fn purge_delivered(&self) -> Result<usize, StoreError>;
}
