//! # Busflow
//!
//! The mediation core of a service bus.
//!
//! Busflow routes each inbound message through a tree of mediators that
//! inspect, transform and route it, with support for:
//!
//! - **Composable pipelines**: sequences, filters, exactly-one switches,
//!   named sequence references and late-bound dynamic mediators
//! - **Asynchronous correlation**: outbound calls suspend the message and a
//!   correlated response resumes it, with timeouts swept in the background
//! - **Durable handoff**: a persistent message store with exclusive-lock
//!   retrieval, retry counting and dead-lettering
//! - **Bounded execution**: a worker pool with a configurable saturation
//!   policy for concurrent delivery
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use busflow::prelude::*;
//!
//! let env = MediationEnvironment::builder(transport).build();
//! let root = Sequence::new(vec![
//!     Arc::new(LogMediator::new()),
//!     Arc::new(SendAsyncMediator::new().to(Destination::new("http://quotes"))),
//! ]);
//! let engine = MediationEngine::new(Arc::new(root), env);
//!
//! // Suspended until the transport resolves the correlation key.
//! let outcome = engine.inject(MediationContext::new(Payload::text("getQuote"))).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod callback;
pub mod conditions;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod events;
pub mod mediators;
pub mod metrics;
pub mod observability;
pub mod pool;
pub mod retry;
pub mod store;
pub mod testing;
pub mod transport;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::callback::{CallbackStore, CallbackSweeper, Continuation, Resolution};
    pub use crate::conditions::{
        All, Always, Any, Condition, ConditionMode, ConditionRef, Never, Not, PathCondition,
        PatternCondition, PredicateCondition,
    };
    pub use crate::config::{
        BusConfig, CallbackConfig, PoolConfig, RetryMode, SaturationPolicy, StoreConfig,
    };
    pub use crate::context::{ContextState, Destination, MediationContext, Payload, PropertyMap};
    pub use crate::engine::{MediationEngine, MediationEnvironment, MediationOutcome, Monitor};
    pub use crate::errors::{
        BusflowError, CallbackTimeoutError, ConditionEvaluationError, DuplicateCorrelationError,
        MediationError, PoolRejection, StoreError, TransportError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::mediators::{
        Case, DropMediator, DynamicMediator, ExactlyOne, Filter, LogMediator, Mediator,
        MediatorRef, MediatorRegistry, PropertyMediator, SendAsyncMediator, Sequence,
        SequenceReference, SequenceRegistry, StoreMediator,
    };
    pub use crate::metrics::{BusMetrics, Counter};
    pub use crate::pool::{
        ForwardHandler, MediationHandler, StoreProcessor, WorkHandler, WorkItem, WorkTarget,
        WorkerPool,
    };
    #[cfg(feature = "sqlite")]
    pub use crate::store::SqliteMessageStore;
    pub use crate::store::{InMemoryMessageStore, MessageStore, NewMessage, StoredMessage};
    pub use crate::transport::Transport;
    pub use crate::utils::{generate_correlation_key, generate_message_id, Timestamp};
}
