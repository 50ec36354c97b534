//! Terminal outcomes of a mediation run.

use super::MediationEnvironment;
use crate::context::{ContextState, MediationContext};
use crate::errors::BusflowError;
use crate::metrics::Counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

/// How a mediation run (initial or resumed) ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MediationOutcome {
    /// The tree ran to the end; `proceed` is the root mediator's result.
    Completed {
        /// Message id.
        message_id: String,
        /// The value returned by the root mediator.
        proceed: bool,
    },
    /// A mediator explicitly terminated the message.
    Terminated {
        /// Message id.
        message_id: String,
    },
    /// The message is waiting on an outbound call.
    Suspended {
        /// Message id.
        message_id: String,
        /// Correlation key of the outstanding call.
        key: String,
    },
    /// Mediation aborted with an error.
    Failed {
        /// Message id.
        message_id: String,
        /// Error description.
        error: String,
    },
}

impl MediationOutcome {
    /// Message id the outcome refers to.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::Completed { message_id, .. }
            | Self::Terminated { message_id }
            | Self::Suspended { message_id, .. }
            | Self::Failed { message_id, .. } => message_id,
        }
    }

    /// Event name for this outcome.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "mediation.completed",
            Self::Terminated { .. } => "mediation.terminated",
            Self::Suspended { .. } => "mediation.suspended",
            Self::Failed { .. } => "mediation.failed",
        }
    }

    /// Returns true for `Failed`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Turns the result of running a mediator over `ctx` into an outcome,
/// recording counters and emitting the matching lifecycle event.
pub(crate) fn conclude(
    ctx: &MediationContext,
    result: Result<bool, BusflowError>,
    env: &MediationEnvironment,
) -> MediationOutcome {
    let message_id = ctx.message_id().to_string();
    let mut data = json!({"message_id": message_id});

    let outcome = match result {
        Ok(_) if ctx.state() == ContextState::Suspended => {
            let key = ctx.correlation_key().unwrap_or_default().to_string();
            data["key"] = json!(key);
            env.metrics().incr(Counter::Suspended);
            MediationOutcome::Suspended { message_id, key }
        }
        Ok(_) if ctx.state() == ContextState::Terminated => {
            env.metrics().incr(Counter::Terminated);
            MediationOutcome::Terminated { message_id }
        }
        Ok(proceed) => {
            data["proceed"] = json!(proceed);
            env.metrics().incr(Counter::Completed);
            MediationOutcome::Completed { message_id, proceed }
        }
        Err(err) => {
            error!(message_id = %message_id, kind = err.kind(), error = %err, "Mediation failed");
            data["error"] = json!(err.to_dict());
            env.metrics().incr(Counter::Failed);
            MediationOutcome::Failed {
                message_id,
                error: err.to_string(),
            }
        }
    };

    debug!(message_id = %outcome.message_id(), outcome = outcome.event_type(), "Mediation concluded");
    env.events().try_emit(outcome.event_type(), Some(data));
    outcome
}
