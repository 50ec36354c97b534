//! Read-only monitoring view.

use crate::callback::CallbackStore;
use crate::errors::StoreError;
use crate::metrics::{BusMetrics, MetricsSnapshot};
use crate::pool::{PoolStats, WorkerPool};
use crate::store::{MessageStore, StoreStats};
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time view of the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringSnapshot {
    /// Number of pending callbacks.
    pub pending_callbacks: usize,
    /// Pending correlation keys.
    pub pending_keys: Vec<String>,
    /// Store depth per status, when a store is attached.
    pub store: Option<StoreStats>,
    /// Pool utilization, when a pool is attached.
    pub pool: Option<PoolStats>,
    /// Counter values.
    pub metrics: MetricsSnapshot,
}

/// Collects monitoring data from the core's components.
#[derive(Debug, Clone)]
pub struct Monitor {
    callbacks: Arc<CallbackStore>,
    metrics: Arc<BusMetrics>,
    store: Option<Arc<dyn MessageStore>>,
    pool: Option<Arc<WorkerPool>>,
}

impl Monitor {
    /// Creates a monitor over the callback store and counters.
    #[must_use]
    pub fn new(callbacks: Arc<CallbackStore>, metrics: Arc<BusMetrics>) -> Self {
        Self {
            callbacks,
            metrics,
            store: None,
            pool: None,
        }
    }

    /// Includes store depth in snapshots.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Includes pool utilization in snapshots.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Takes a snapshot.
    pub async fn snapshot(&self) -> Result<MonitoringSnapshot, StoreError> {
        let store = match &self.store {
            Some(store) => Some(store.stats().await?),
            None => None,
        };

        Ok(MonitoringSnapshot {
            pending_callbacks: self.callbacks.pending_count(),
            pending_keys: self.callbacks.pending_keys(),
            store,
            pool: self.pool.as_ref().map(|pool| pool.stats()),
            metrics: self.metrics.snapshot(),
        })
    }
}
