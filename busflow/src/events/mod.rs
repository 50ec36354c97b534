//! Event sink system for observability.
//!
//! Sinks are handed explicitly to the components that emit lifecycle events
//! (engine, callback store, store processor); there is no ambient sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Returns the sink used when none is configured.
#[must_use]
pub fn default_event_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
