//! Bounded retries for transient store failures.

use super::{FailOutcome, MessageStore, NewMessage, StoreId, StoreStats, StoredMessage};
use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::retry::{with_retry_if, RetryConfig};
use async_trait::async_trait;

/// Wraps a store and retries operations that fail with a transient
/// [`StoreError::Io`]. Other errors, and the last transient error once the
/// retries are used up, are returned unchanged.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    retry: RetryConfig,
}

impl<S: MessageStore> RetryingStore<S> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: S, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    /// Wraps `inner` with the store's configured `io_retry` policy.
    #[must_use]
    pub fn from_config(inner: S, config: &StoreConfig) -> Self {
        Self::new(inner, config.io_retry.clone())
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: MessageStore> MessageStore for RetryingStore<S> {
    async fn persist(&self, message: NewMessage) -> Result<StoreId, StoreError> {
        let inner = &self.inner;
        with_retry_if(
            &self.retry,
            "store.persist",
            move || inner.persist(message.clone()),
            StoreError::is_transient,
        )
        .await
    }

    async fn lock_queue(
        &self,
        queue: Option<&str>,
        n: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = &self.inner;
        with_retry_if(
            &self.retry,
            "store.lock",
            move || inner.lock_queue(queue, n),
            StoreError::is_transient,
        )
        .await
    }

    async fn acknowledge(&self, id: StoreId) -> Result<(), StoreError> {
        let inner = &self.inner;
        with_retry_if(
            &self.retry,
            "store.acknowledge",
            move || inner.acknowledge(id),
            StoreError::is_transient,
        )
        .await
    }

    async fn fail(&self, id: StoreId) -> Result<FailOutcome, StoreError> {
        let inner = &self.inner;
        with_retry_if(
            &self.retry,
            "store.fail",
            move || inner.fail(id),
            StoreError::is_transient,
        )
        .await
    }

    async fn get(&self, id: StoreId) -> Result<Option<StoredMessage>, StoreError> {
        self.inner.get(id).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }

    async fn purge_delivered(&self) -> Result<usize, StoreError> {
        self.inner.purge_delivered().await
    }
}
