//! Hands a message off to the persistent store.

use super::Mediator;
use crate::context::MediationContext;
use crate::engine::MediationEnvironment;
use crate::errors::{BusflowError, MediationError};
use crate::metrics::Counter;
use crate::store::{NewMessage, DEFAULT_QUEUE};
use async_trait::async_trait;
use tracing::debug;

/// Persists the whole context into the environment's message store and
/// stops mediation: the store owns the message from here on.
///
/// The assigned id is recorded in the `store.id` property before the context
/// is terminated.
#[derive(Debug, Clone)]
pub struct StoreMediator {
    name: String,
    queue: String,
}

impl Default for StoreMediator {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE)
    }
}

impl StoreMediator {
    /// Creates a mediator that persists into `queue`.
    #[must_use]
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            name: "store".to_string(),
            queue: queue.into(),
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Target queue.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl Mediator for StoreMediator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        let store = env
            .store()
            .ok_or_else(|| MediationError::new(&self.name, "no message store configured"))?;

        let message = NewMessage::from_context(ctx)?.in_queue(self.queue.clone());
        let id = store.persist(message).await?;
        env.metrics().incr(Counter::Persisted);
        debug!(message_id = %ctx.message_id(), store_id = id, queue = %self.queue, "Message stored");

        ctx.set_property("store.id", id);
        ctx.terminate();
        Ok(false)
    }
}
