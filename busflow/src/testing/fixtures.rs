//! Ready-made environments for tests.

use std::sync::Arc;

use crate::engine::MediationEnvironment;
use crate::events::{CollectingEventSink, NoOpEventSink};
use crate::transport::{NullTransport, Transport};

/// An environment with a discarding transport and no store.
#[must_use]
pub fn test_env() -> MediationEnvironment {
    test_env_with_transport(Arc::new(NullTransport))
}

/// An environment over `transport`.
#[must_use]
pub fn test_env_with_transport(transport: Arc<dyn Transport>) -> MediationEnvironment {
    MediationEnvironment::builder(transport)
        .events(Arc::new(NoOpEventSink))
        .build()
}

/// An environment that collects lifecycle events into `events`.
#[must_use]
pub fn test_env_with_events(events: Arc<CollectingEventSink>) -> MediationEnvironment {
    MediationEnvironment::builder(Arc::new(NullTransport))
        .events(events)
        .build()
}
