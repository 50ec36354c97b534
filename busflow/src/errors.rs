//! Error types for the busflow mediation core.
//!
//! Each failure kind of the core has its own error type so callers can match
//! on exactly what went wrong; [`BusflowError`] is the umbrella used on the
//! mediation path.

use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for busflow operations.
#[derive(Debug, Error)]
pub enum BusflowError {
    /// A mediator failed to construct or execute.
    #[error("{0}")]
    Mediation(#[from] MediationError),

    /// A condition failed to evaluate in strict mode.
    #[error("{0}")]
    Condition(#[from] ConditionEvaluationError),

    /// A correlation key was registered twice.
    #[error("{0}")]
    DuplicateCorrelation(#[from] DuplicateCorrelationError),

    /// A pending callback expired.
    #[error("{0}")]
    CallbackTimeout(#[from] CallbackTimeoutError),

    /// The persistent message store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The worker pool refused a work item.
    #[error("{0}")]
    Rejected(#[from] PoolRejection),

    /// The outbound transport failed to dispatch.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Configuration was invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BusflowError {
    /// Short machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mediation(_) => "MediationError",
            Self::Condition(_) => "ConditionEvaluationError",
            Self::DuplicateCorrelation(_) => "DuplicateCorrelationError",
            Self::CallbackTimeout(_) => "CallbackTimeoutError",
            Self::Store(_) => "StoreIOError",
            Self::Rejected(_) => "PoolRejection",
            Self::Transport(_) => "TransportError",
            Self::Config(_) => "ConfigError",
            Self::Serialization(_) => "SerializationError",
        }
    }

    /// Converts to a dictionary representation for event emission.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), json!(self.kind()));
        map.insert("message".to_string(), json!(self.to_string()));
        map
    }
}

impl From<serde_json::Error> for BusflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when a mediator cannot be constructed or fails while mediating.
///
/// Aborts mediation of the current message only.
#[derive(Debug, Clone, Error)]
#[error("Mediation failed in '{mediator}': {message}")]
pub struct MediationError {
    /// Name or logical type of the mediator that failed.
    pub mediator: String,
    /// What went wrong.
    pub message: String,
}

impl MediationError {
    /// Creates a new mediation error.
    #[must_use]
    pub fn new(mediator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            mediator: mediator.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a condition cannot be evaluated against the message.
#[derive(Debug, Clone, Error)]
#[error("Condition '{condition}' could not be evaluated: {message}")]
pub struct ConditionEvaluationError {
    /// Description of the condition.
    pub condition: String,
    /// Evaluation failure detail.
    pub message: String,
}

impl ConditionEvaluationError {
    /// Creates a new condition evaluation error.
    #[must_use]
    pub fn new(condition: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            message: message.into(),
        }
    }
}

/// Error raised when registering a correlation key that is already pending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Correlation key '{key}' is already pending")]
pub struct DuplicateCorrelationError {
    /// The duplicated key.
    pub key: String,
}

impl DuplicateCorrelationError {
    /// Creates a new duplicate correlation error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Delivered to a suspended continuation whose response never arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Callback '{key}' timed out after {timeout_ms}ms")]
pub struct CallbackTimeoutError {
    /// The expired correlation key.
    pub key: String,
    /// The timeout the callback was registered with.
    pub timeout_ms: u64,
}

impl CallbackTimeoutError {
    /// Creates a new callback timeout error.
    #[must_use]
    pub fn new(key: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            key: key.into(),
            timeout_ms,
        }
    }
}

/// Errors from the persistent message store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A transient I/O failure; safe to retry.
    #[error("Store I/O error: {0}")]
    Io(String),

    /// A non-transient backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// No message with the given id exists.
    #[error("Stored message {0} not found")]
    NotFound(i64),

    /// The requested status transition is not allowed.
    #[error("Stored message {id} cannot be {action} while {status}")]
    InvalidTransition {
        /// The message id.
        id: i64,
        /// The current status.
        status: String,
        /// The attempted action.
        action: &'static str,
    },

    /// A payload or row could not be (de)serialized.
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::CannotOpen
                ) =>
            {
                Self::Io(err.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => Self::Serialization(err.to_string()),
            _ => Self::Backend(err.to_string()),
        }
    }
}

/// Why the worker pool refused a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Queue full and all workers busy under the reject policy.
    Saturated,
    /// The pool has been shut down.
    ShutDown,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Saturated => write!(f, "saturated"),
            Self::ShutDown => write!(f, "shut down"),
        }
    }
}

/// Error returned by `WorkerPool::submit` when a work item is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Work item rejected: pool {reason}")]
pub struct PoolRejection {
    /// The rejection reason.
    pub reason: RejectionReason,
}

impl PoolRejection {
    /// Rejection because the pool is saturated.
    #[must_use]
    pub fn saturated() -> Self {
        Self {
            reason: RejectionReason::Saturated,
        }
    }

    /// Rejection because the pool is shut down.
    #[must_use]
    pub fn shut_down() -> Self {
        Self {
            reason: RejectionReason::ShutDown,
        }
    }
}

/// Error reported by the outbound transport collaborator.
#[derive(Debug, Clone, Error)]
#[error("Transport error: {message}")]
pub struct TransportError {
    /// Failure detail.
    pub message: String,
}

impl TransportError {
    /// Creates a new transport error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
