//! Asynchronous outbound dispatch: the pipeline's suspend point.

use super::{Mediator, MediatorRef, Sequence};
use crate::callback::PipelineContinuation;
use crate::context::{Destination, MediationContext};
use crate::engine::MediationEnvironment;
use crate::errors::BusflowError;
use crate::utils::generate_correlation_key;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends the message and suspends its mediation until the response arrives.
///
/// The callback is registered before the transport is called, so a response
/// can never beat its registration. The live context moves into the
/// callback store; the caller's context is left as a suspended husk and the
/// mediator returns `false`. When the response is resolved, `on_response`
/// mediates it on the resolving task.
///
/// If the transport fails, the callback is withdrawn and the original
/// context restored before the error is returned.
#[derive(Debug, Clone)]
pub struct SendAsyncMediator {
    name: String,
    destination: Option<Destination>,
    timeout: Option<Duration>,
    on_response: MediatorRef,
    on_timeout: Option<MediatorRef>,
}

impl Default for SendAsyncMediator {
    fn default() -> Self {
        Self::new()
    }
}

impl SendAsyncMediator {
    /// Creates a sender whose response mediation is an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "send".to_string(),
            destination: None,
            timeout: None,
            on_response: Arc::new(Sequence::default()),
            on_timeout: None,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the destination before sending.
    #[must_use]
    pub fn to(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Sets the response timeout; otherwise the configured default applies.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the mediator that handles the response.
    #[must_use]
    pub fn on_response(mut self, mediator: MediatorRef) -> Self {
        self.on_response = mediator;
        self
    }

    /// Sets the mediator run when no response arrives in time.
    #[must_use]
    pub fn on_timeout(mut self, mediator: MediatorRef) -> Self {
        self.on_timeout = Some(mediator);
        self
    }
}

#[async_trait]
impl Mediator for SendAsyncMediator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        if let Some(destination) = &self.destination {
            ctx.set_destination(destination.clone());
        }
        let key = generate_correlation_key();
        ctx.set_correlation_key(key.clone());

        let outbound = ctx.clone();
        let suspended = ctx.suspend();
        let timeout = self
            .timeout
            .unwrap_or_else(|| env.callback_config().default_timeout());
        let continuation = PipelineContinuation::new(suspended, self.on_response.clone(), env.clone())
            .with_on_timeout(self.on_timeout.clone());

        if let Err(err) = env.callbacks().register(key.clone(), Box::new(continuation), timeout) {
            *ctx = outbound;
            return Err(err.into());
        }

        debug!(
            mediator = %self.name,
            message_id = %outbound.message_id(),
            key = %key,
            destination = ?outbound.destination().map(Destination::address),
            "Dispatching outbound call"
        );

        if let Err(err) = env.transport().send(&outbound, Some(key.clone())).await {
            if env.callbacks().withdraw(&key).is_some() {
                warn!(message_id = %outbound.message_id(), key = %key, error = %err, "Outbound dispatch failed");
                *ctx = outbound;
                return Err(err.into());
            }
            // The callback already completed; the response is authoritative.
            debug!(key = %key, error = %err, "Dispatch error after callback completed");
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextState, Payload};
    use crate::errors::TransportError;
    use crate::testing::{test_env_with_transport, RecordingTransport};
    use crate::transport::MockTransport;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_registers_before_send_and_suspends() {
        let transport = Arc::new(RecordingTransport::new());
        let env = test_env_with_transport(transport.clone());
        transport.watch(env.callbacks().clone());
        let sender = SendAsyncMediator::new().to(Destination::new("http://quotes"));

        let mut ctx = MediationContext::new(Payload::text("getQuote"));
        assert!(!sender.mediate(&mut ctx, &env).await.unwrap());

        assert_eq!(ctx.state(), ContextState::Suspended);
        let key = ctx.correlation_key().unwrap().to_string();
        assert!(env.callbacks().is_pending(&key));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.as_deref(), Some(key.as_str()));
        assert_eq!(sent[0].0.payload(), &Payload::text("getQuote"));
        assert_eq!(transport.pending_at_send(), vec![true]);
    }

    #[tokio::test]
    async fn test_transport_failure_restores_context() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_, _| Err(TransportError::new("connection refused")));
        let env = test_env_with_transport(Arc::new(mock));

        let mut ctx = MediationContext::new(Payload::text("body")).with_property("p", 1);
        let err = SendAsyncMediator::new().mediate(&mut ctx, &env).await.unwrap_err();

        assert_eq!(err.kind(), "TransportError");
        assert_eq!(ctx.state(), ContextState::Continuing);
        assert_eq!(ctx.payload(), &Payload::text("body"));
        assert_eq!(env.callbacks().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_custom_timeout_applies() {
        let env = test_env_with_transport(Arc::new(RecordingTransport::new()));
        let sender = SendAsyncMediator::new().with_timeout(Duration::from_millis(1));
        let mut ctx = MediationContext::new(Payload::Empty);
        sender.mediate(&mut ctx, &env).await.unwrap();

        let pending = env.callbacks().pending();
        let waited = pending[0].expires_at - pending[0].registered_at;
        assert_eq!(waited.num_milliseconds(), 1);
    }
}
