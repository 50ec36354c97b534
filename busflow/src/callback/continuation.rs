//! Suspended mediation state.

use crate::context::MediationContext;
use crate::engine::{conclude, MediationEnvironment, MediationOutcome};
use crate::errors::CallbackTimeoutError;
use crate::mediators::MediatorRef;
use crate::metrics::Counter;
use async_trait::async_trait;
use tracing::{debug, warn};

/// The rest of a message's mediation, waiting for a response.
#[async_trait]
pub trait Continuation: Send + Sync {
    /// Message id of the suspended context.
    fn message_id(&self) -> &str;

    /// Resumes with the response or the timeout that ended the wait.
    async fn resume(
        self: Box<Self>,
        outcome: Result<MediationContext, CallbackTimeoutError>,
    ) -> MediationOutcome;
}

/// Resumes a suspended pipeline by mediating the response.
///
/// On response the payload and properties of the response are folded into
/// the suspended context and `on_response` mediates it. On timeout the
/// optional `on_timeout` mediator runs first and the outcome is `Failed`.
pub struct PipelineContinuation {
    ctx: MediationContext,
    on_response: MediatorRef,
    on_timeout: Option<MediatorRef>,
    env: MediationEnvironment,
}

impl PipelineContinuation {
    /// Creates a continuation over a suspended context.
    #[must_use]
    pub fn new(ctx: MediationContext, on_response: MediatorRef, env: MediationEnvironment) -> Self {
        Self {
            ctx,
            on_response,
            on_timeout: None,
            env,
        }
    }

    /// Sets the mediator run on timeout.
    #[must_use]
    pub fn with_on_timeout(mut self, on_timeout: Option<MediatorRef>) -> Self {
        self.on_timeout = on_timeout;
        self
    }
}

impl std::fmt::Debug for PipelineContinuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContinuation")
            .field("message_id", &self.ctx.message_id())
            .field("on_response", &self.on_response.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Continuation for PipelineContinuation {
    fn message_id(&self) -> &str {
        self.ctx.message_id()
    }

    async fn resume(
        self: Box<Self>,
        outcome: Result<MediationContext, CallbackTimeoutError>,
    ) -> MediationOutcome {
        let Self {
            mut ctx,
            on_response,
            on_timeout,
            env,
        } = *self;

        match outcome {
            Ok(response) => {
                ctx.absorb_response(response);
                env.metrics().incr(Counter::Resumed);
                debug!(message_id = %ctx.message_id(), "Resuming mediation with response");
                let result = on_response.mediate(&mut ctx, &env).await;
                conclude(&ctx, result, &env)
            }
            Err(timeout) => {
                if let Some(handler) = on_timeout {
                    ctx.set_property("callback.timed_out", true);
                    if let Err(err) = handler.mediate(&mut ctx, &env).await {
                        warn!(message_id = %ctx.message_id(), error = %err, "Timeout handler failed");
                    }
                }
                conclude(&ctx, Err(timeout.into()), &env)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Payload;
    use crate::testing::{test_env, MediationTrace, RecordingMediator};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resume_with_response_mediates_on_response() {
        let env = test_env();
        let trace = MediationTrace::new();
        let ctx = MediationContext::with_message_id("m-1", Payload::text("request"));
        let continuation = Box::new(PipelineContinuation::new(
            ctx,
            Arc::new(RecordingMediator::new("reply", &trace)),
            env.clone(),
        ));

        let response = MediationContext::response(Payload::json(json!({"quote": 12})));
        let outcome = continuation.resume(Ok(response)).await;

        assert_eq!(
            outcome,
            MediationOutcome::Completed {
                message_id: "m-1".into(),
                proceed: true
            }
        );
        assert_eq!(trace.names(), vec!["reply"]);
        assert_eq!(trace.contexts()[0].payload(), &Payload::json(json!({"quote": 12})));
        assert!(trace.contexts()[0].is_response());
        assert_eq!(env.metrics().get(Counter::Resumed), 1);
    }

    #[tokio::test]
    async fn test_resume_with_timeout_fails() {
        let env = test_env();
        let trace = MediationTrace::new();
        let ctx = MediationContext::with_message_id("m-2", Payload::Empty);
        let continuation = Box::new(
            PipelineContinuation::new(
                ctx,
                Arc::new(RecordingMediator::new("reply", &trace)),
                env.clone(),
            )
            .with_on_timeout(Some(Arc::new(RecordingMediator::new("timeout", &trace)))),
        );

        let outcome = continuation
            .resume(Err(CallbackTimeoutError::new("k", 10)))
            .await;

        assert!(matches!(outcome, MediationOutcome::Failed { ref message_id, .. } if message_id == "m-2"));
        assert_eq!(trace.names(), vec!["timeout"]);
        assert_eq!(trace.contexts()[0].property("callback.timed_out"), Some(&json!(true)));
    }
}
