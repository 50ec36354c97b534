//! Entry point for inbound messages.
//!
//! The transport layer hands each inbound message to
//! [`MediationEngine::inject`] and each correlated response to
//! [`CallbackStore::resolve`](crate::callback::CallbackStore::resolve).

mod environment;
#[cfg(test)]
mod integration_tests;
mod monitor;
mod outcome;

pub use environment::{EnvironmentBuilder, MediationEnvironment};
pub use monitor::{Monitor, MonitoringSnapshot};
pub use outcome::MediationOutcome;
pub(crate) use outcome::conclude;

use crate::context::MediationContext;
use crate::mediators::MediatorRef;
use crate::metrics::Counter;
use tracing::{debug_span, Instrument};

/// Runs inbound messages through a root mediator.
#[derive(Debug, Clone)]
pub struct MediationEngine {
    root: MediatorRef,
    env: MediationEnvironment,
}

impl MediationEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(root: MediatorRef, env: MediationEnvironment) -> Self {
        Self { root, env }
    }

    /// Returns the environment.
    #[must_use]
    pub fn env(&self) -> &MediationEnvironment {
        &self.env
    }

    /// Mediates one inbound message.
    ///
    /// Never returns an error: failures are reported as
    /// [`MediationOutcome::Failed`] and do not affect other messages.
    pub async fn inject(&self, mut ctx: MediationContext) -> MediationOutcome {
        self.env.metrics().incr(Counter::Injected);
        let span = debug_span!("mediate", message_id = %ctx.message_id(), root = %self.root.name());

        async {
            let result = self.root.mediate(&mut ctx, &self.env).await;
            conclude(&ctx, result, &self.env)
        }
        .instrument(span)
        .await
    }
}
