//! Shared collaborators handed to every mediator.

use crate::callback::CallbackStore;
use crate::config::CallbackConfig;
use crate::events::{default_event_sink, EventSink};
use crate::mediators::{MediatorRegistry, SequenceRegistry};
use crate::metrics::BusMetrics;
use crate::store::MessageStore;
use crate::transport::Transport;
use std::sync::Arc;

/// Everything a mediator may need besides the message itself.
///
/// Cheap to clone; every member is shared.
#[derive(Clone)]
pub struct MediationEnvironment {
    callbacks: Arc<CallbackStore>,
    transport: Arc<dyn Transport>,
    mediators: Arc<MediatorRegistry>,
    sequences: Arc<SequenceRegistry>,
    store: Option<Arc<dyn MessageStore>>,
    metrics: Arc<BusMetrics>,
    events: Arc<dyn EventSink>,
    callback_config: CallbackConfig,
}

impl std::fmt::Debug for MediationEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediationEnvironment")
            .field("callbacks", &self.callbacks)
            .field("mediators", &self.mediators)
            .field("has_store", &self.store.is_some())
            .field("callback_config", &self.callback_config)
            .finish_non_exhaustive()
    }
}

impl MediationEnvironment {
    /// Starts building an environment around a transport.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> EnvironmentBuilder {
        EnvironmentBuilder::new(transport)
    }

    /// Returns the callback store.
    #[must_use]
    pub fn callbacks(&self) -> &Arc<CallbackStore> {
        &self.callbacks
    }

    /// Returns the outbound transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Returns the dynamic mediator registry.
    #[must_use]
    pub fn mediators(&self) -> &Arc<MediatorRegistry> {
        &self.mediators
    }

    /// Returns the named sequence registry.
    #[must_use]
    pub fn sequences(&self) -> &Arc<SequenceRegistry> {
        &self.sequences
    }

    /// Returns the message store, if one is configured.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn MessageStore>> {
        self.store.as_ref()
    }

    /// Returns the counter registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Returns the callback settings.
    #[must_use]
    pub fn callback_config(&self) -> &CallbackConfig {
        &self.callback_config
    }
}

/// Builder for [`MediationEnvironment`].
pub struct EnvironmentBuilder {
    transport: Arc<dyn Transport>,
    callbacks: Option<Arc<CallbackStore>>,
    mediators: Option<Arc<MediatorRegistry>>,
    sequences: Option<Arc<SequenceRegistry>>,
    store: Option<Arc<dyn MessageStore>>,
    metrics: Option<Arc<BusMetrics>>,
    events: Option<Arc<dyn EventSink>>,
    callback_config: CallbackConfig,
}

impl EnvironmentBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            callbacks: None,
            mediators: None,
            sequences: None,
            store: None,
            metrics: None,
            events: None,
            callback_config: CallbackConfig::default(),
        }
    }

    /// Uses an existing callback store. Otherwise one is created over the
    /// builder's metrics and event sink.
    #[must_use]
    pub fn callbacks(mut self, callbacks: Arc<CallbackStore>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Sets the dynamic mediator registry.
    #[must_use]
    pub fn mediators(mut self, registry: Arc<MediatorRegistry>) -> Self {
        self.mediators = Some(registry);
        self
    }

    /// Sets the named sequence registry.
    #[must_use]
    pub fn sequences(mut self, registry: Arc<SequenceRegistry>) -> Self {
        self.sequences = Some(registry);
        self
    }

    /// Sets the message store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the counter registry.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the callback settings.
    #[must_use]
    pub fn callback_config(mut self, config: CallbackConfig) -> Self {
        self.callback_config = config;
        self
    }

    /// Builds the environment.
    #[must_use]
    pub fn build(self) -> MediationEnvironment {
        let metrics = self.metrics.unwrap_or_default();
        let events = self.events.unwrap_or_else(default_event_sink);
        let callbacks = self
            .callbacks
            .unwrap_or_else(|| Arc::new(CallbackStore::new(metrics.clone(), events.clone())));

        MediationEnvironment {
            callbacks,
            transport: self.transport,
            mediators: self.mediators.unwrap_or_default(),
            sequences: self.sequences.unwrap_or_default(),
            store: self.store,
            metrics,
            events,
            callback_config: self.callback_config,
        }
    }
}
