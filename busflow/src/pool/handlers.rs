//! Work handlers that ship with the core.

use super::{WorkHandler, WorkTarget};
use crate::context::MediationContext;
use crate::engine::{MediationEngine, MediationOutcome};
use crate::errors::{BusflowError, MediationError};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs the target through a mediation engine.
///
/// A [`MediationOutcome::Failed`] outcome is reported as an error so a
/// stored message is failed rather than acknowledged. A stored message that
/// suspends is settled by the outcome of its resumed continuation: the
/// handler waits for the response or the timeout, so a callback sweeper
/// must be running for timeouts to arrive. Suspension of a live context
/// counts as success.
#[derive(Debug, Clone)]
pub struct MediationHandler {
    engine: MediationEngine,
}

impl MediationHandler {
    /// Creates a handler over `engine`.
    #[must_use]
    pub fn new(engine: MediationEngine) -> Self {
        Self { engine }
    }

    async fn settle_stored(&self, ctx: MediationContext) -> MediationOutcome {
        let callbacks = self.engine.env().callbacks().clone();
        let message_id = ctx.message_id().to_string();
        let resumed = callbacks.watch(message_id.clone());

        match self.engine.inject(ctx).await {
            MediationOutcome::Suspended { key, .. } => {
                debug!(message_id = %message_id, key = %key, "Awaiting resumed outcome");
                resumed.await.unwrap_or_else(|_| MediationOutcome::Failed {
                    message_id,
                    error: "suspended continuation was dropped".to_string(),
                })
            }
            outcome => {
                callbacks.unwatch(&message_id);
                outcome
            }
        }
    }
}

#[async_trait]
impl WorkHandler for MediationHandler {
    async fn handle(&self, target: WorkTarget) -> Result<(), BusflowError> {
        let outcome = match target {
            WorkTarget::Stored(_) => self.settle_stored(target.into_context()?).await,
            WorkTarget::Context(ctx) => self.engine.inject(ctx).await,
        };
        match outcome {
            MediationOutcome::Failed { error, .. } => {
                Err(MediationError::new("engine", error).into())
            }
            _ => Ok(()),
        }
    }
}

/// Hands the target to a transport without correlation.
pub struct ForwardHandler {
    transport: Arc<dyn Transport>,
}

impl ForwardHandler {
    /// Creates a handler over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl std::fmt::Debug for ForwardHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl WorkHandler for ForwardHandler {
    async fn handle(&self, target: WorkTarget) -> Result<(), BusflowError> {
        let ctx = target.into_context()?;
        self.transport.send(&ctx, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{MediationContext, Payload};
    use crate::errors::TransportError;
    use crate::context::Destination;
    use crate::mediators::{DropMediator, SendAsyncMediator};
    use crate::store::{MessageStatus, StoredMessage};
    use crate::testing::{
        test_env, test_env_with_transport, FailingMediator, MediationTrace, RecordingMediator,
        RecordingTransport,
    };
    use crate::transport::MockTransport;
    use crate::utils::now_utc;
    use std::time::Duration;

    fn stored(ctx: &MediationContext) -> StoredMessage {
        StoredMessage {
            id: 7,
            queue: "default".into(),
            payload: serde_json::to_vec(ctx).unwrap(),
            arrival: now_utc(),
            attempts: 0,
            status: MessageStatus::Locked,
            available_at: now_utc(),
        }
    }

    #[tokio::test]
    async fn test_mediation_handler_reports_failed_outcome() {
        let engine = MediationEngine::new(Arc::new(FailingMediator::new("boom")), test_env());
        let handler = MediationHandler::new(engine);
        let ctx = MediationContext::new(Payload::text("x"));

        let err = handler.handle(WorkTarget::Stored(stored(&ctx))).await.unwrap_err();
        assert_eq!(err.kind(), "MediationError");
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_mediation_handler_accepts_terminated() {
        let engine = MediationEngine::new(Arc::new(DropMediator), test_env());
        let handler = MediationHandler::new(engine);
        let ctx = MediationContext::new(Payload::Empty);
        assert!(handler.handle(WorkTarget::Context(ctx)).await.is_ok());
    }

    #[tokio::test]
    async fn test_mediation_handler_rejects_corrupt_payload() {
        let engine = MediationEngine::new(Arc::new(DropMediator), test_env());
        let mut message = stored(&MediationContext::new(Payload::Empty));
        message.payload = b"not json".to_vec();

        let err = MediationHandler::new(engine)
            .handle(WorkTarget::Stored(message))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StoreIOError");
    }

    fn suspending_handler(trace: &MediationTrace) -> (MediationHandler, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let env = test_env_with_transport(transport.clone());
        let send = SendAsyncMediator::new()
            .to(Destination::new("http://quotes"))
            .with_timeout(Duration::from_millis(1))
            .on_response(Arc::new(RecordingMediator::new("reply", trace)));
        let engine = MediationEngine::new(Arc::new(send), env);
        (MediationHandler::new(engine), transport)
    }

    async fn wait_for_key(transport: &RecordingTransport) -> String {
        for _ in 0..200 {
            if let Some(key) = transport.last_key() {
                return key;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no outbound call was made");
    }

    #[tokio::test]
    async fn test_suspended_stored_message_settles_on_response() {
        let trace = MediationTrace::new();
        let (handler, transport) = suspending_handler(&trace);
        let callbacks = handler.engine.env().callbacks().clone();
        let ctx = MediationContext::with_message_id("m-s", Payload::text("ask"));

        let task = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle(WorkTarget::Stored(stored(&ctx))).await }
        });
        let key = wait_for_key(&transport).await;
        callbacks
            .resolve(&key, MediationContext::response(Payload::text("answer")))
            .await;

        assert!(task.await.unwrap().is_ok());
        assert_eq!(trace.names(), vec!["reply"]);
    }

    #[tokio::test]
    async fn test_suspended_stored_message_fails_on_timeout() {
        let (handler, transport) = suspending_handler(&MediationTrace::new());
        let callbacks = handler.engine.env().callbacks().clone();
        let ctx = MediationContext::with_message_id("m-t", Payload::text("ask"));

        let task = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle(WorkTarget::Stored(stored(&ctx))).await }
        });
        wait_for_key(&transport).await;
        callbacks.sweep(now_utc() + chrono::Duration::seconds(5)).await;

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "MediationError");
        assert_eq!(callbacks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_suspended_live_context_returns_immediately() {
        let (handler, _) = suspending_handler(&MediationTrace::new());
        let ctx = MediationContext::new(Payload::text("ask"));
        assert!(handler.handle(WorkTarget::Context(ctx)).await.is_ok());
        assert_eq!(handler.engine.env().callbacks().pending_count(), 1);
    }

    #[tokio::test]
    async fn test_forward_handler_sends_without_key() {
        let ctx = MediationContext::with_message_id("m-5", Payload::text("fwd"));
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|ctx, key| ctx.message_id() == "m-5" && key.is_none())
            .times(1)
            .returning(|_, _| Ok(()));
        let handler = ForwardHandler::new(Arc::new(mock));
        handler.handle(WorkTarget::Stored(stored(&ctx))).await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_handler_propagates_transport_error() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .returning(|_, _| Err(TransportError::new("down")));
        let handler = ForwardHandler::new(Arc::new(mock));
        let err = handler
            .handle(WorkTarget::Context(MediationContext::new(Payload::Empty)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransportError");
    }
}
