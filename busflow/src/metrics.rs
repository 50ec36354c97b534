//! Process-scoped counters.
//!
//! One [`BusMetrics`] is created at startup and shared by `Arc` with every
//! component that counts something. Nothing here is global.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Named counters maintained by the mediation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Messages injected into the pipeline.
    Injected,
    /// Mediations that ran to the end of the tree (either result).
    Completed,
    /// Mediations explicitly terminated by a mediator.
    Terminated,
    /// Mediations suspended on an outbound call.
    Suspended,
    /// Mediations aborted by an error.
    Failed,
    /// Suspended mediations resumed by a response.
    Resumed,
    /// Responses whose correlation key was unknown or already resolved.
    OrphanedResponses,
    /// Callbacks expired by the sweeper.
    TimedOutCallbacks,
    /// Messages persisted to the store.
    Persisted,
    /// Stored messages acknowledged.
    Delivered,
    /// Stored messages moved to the dead state.
    DeadLettered,
    /// Work items refused by the pool.
    PoolRejections,
}

/// Atomic counter registry.
#[derive(Debug, Default)]
pub struct BusMetrics {
    injected: AtomicU64,
    completed: AtomicU64,
    terminated: AtomicU64,
    suspended: AtomicU64,
    failed: AtomicU64,
    resumed: AtomicU64,
    orphaned_responses: AtomicU64,
    timed_out_callbacks: AtomicU64,
    persisted: AtomicU64,
    delivered: AtomicU64,
    dead_lettered: AtomicU64,
    pool_rejections: AtomicU64,
}

impl BusMetrics {
    /// Creates a registry with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Injected => &self.injected,
            Counter::Completed => &self.completed,
            Counter::Terminated => &self.terminated,
            Counter::Suspended => &self.suspended,
            Counter::Failed => &self.failed,
            Counter::Resumed => &self.resumed,
            Counter::OrphanedResponses => &self.orphaned_responses,
            Counter::TimedOutCallbacks => &self.timed_out_callbacks,
            Counter::Persisted => &self.persisted,
            Counter::Delivered => &self.delivered,
            Counter::DeadLettered => &self.dead_lettered,
            Counter::PoolRejections => &self.pool_rejections,
        }
    }

    /// Increments a counter by one.
    pub fn incr(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current value of a counter.
    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    /// Returns a serializable copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            injected: self.get(Counter::Injected),
            completed: self.get(Counter::Completed),
            terminated: self.get(Counter::Terminated),
            suspended: self.get(Counter::Suspended),
            failed: self.get(Counter::Failed),
            resumed: self.get(Counter::Resumed),
            orphaned_responses: self.get(Counter::OrphanedResponses),
            timed_out_callbacks: self.get(Counter::TimedOutCallbacks),
            persisted: self.get(Counter::Persisted),
            delivered: self.get(Counter::Delivered),
            dead_lettered: self.get(Counter::DeadLettered),
            pool_rejections: self.get(Counter::PoolRejections),
        }
    }
}

/// Point-in-time copy of [`BusMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub injected: u64,
    pub completed: u64,
    pub terminated: u64,
    pub suspended: u64,
    pub failed: u64,
    pub resumed: u64,
    pub orphaned_responses: u64,
    pub timed_out_callbacks: u64,
    pub persisted: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub pool_rejections: u64,
}

impl MetricsSnapshot {
    /// Converts to a JSON value.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_metrics_default_zero() {
        let metrics = BusMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_incr_is_per_counter() {
        let metrics = BusMetrics::new();
        metrics.incr(Counter::Injected);
        metrics.incr(Counter::Injected);
        metrics.incr(Counter::DeadLettered);

        assert_eq!(metrics.get(Counter::Injected), 2);
        assert_eq!(metrics.get(Counter::DeadLettered), 1);
        assert_eq!(metrics.get(Counter::Failed), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(BusMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.incr(Counter::OrphanedResponses);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.get(Counter::OrphanedResponses), 8000);
    }

    #[test]
    fn test_snapshot_to_dict() {
        let metrics = BusMetrics::new();
        metrics.incr(Counter::Resumed);
        let dict = metrics.snapshot().to_dict();
        assert_eq!(dict["resumed"], 1);
        assert_eq!(dict["failed"], 0);
    }
}
