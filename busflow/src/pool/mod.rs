//! Bounded worker pool.
//!
//! Work items carry either a live context or a locked stored message and
//! the handler to run them with. Items from one submitter may complete in
//! any order.

mod handlers;
mod processor;

pub use handlers::{ForwardHandler, MediationHandler};
pub use processor::{ProcessorHandle, StoreProcessor};

use crate::config::{PoolConfig, SaturationPolicy};
use crate::context::MediationContext;
use crate::errors::{BusflowError, PoolRejection};
use crate::metrics::{BusMetrics, Counter};
use crate::store::StoredMessage;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// What a work item operates on.
#[derive(Debug, Clone)]
pub enum WorkTarget {
    /// A live context.
    Context(MediationContext),
    /// A message locked from the store.
    Stored(StoredMessage),
}

impl WorkTarget {
    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Context(ctx) => ctx.message_id().to_string(),
            Self::Stored(message) => format!("store:{}", message.id),
        }
    }

    /// Returns the context, deserializing a stored message if needed.
    pub fn into_context(self) -> Result<MediationContext, BusflowError> {
        match self {
            Self::Context(ctx) => Ok(ctx),
            Self::Stored(message) => Ok(message.to_context()?),
        }
    }
}

/// Processes one work target.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Handles `target`. An error is logged by the pool; handlers that need
    /// to react to failure do so themselves.
    async fn handle(&self, target: WorkTarget) -> Result<(), BusflowError>;
}

/// A unit of work for the pool.
pub struct WorkItem {
    /// The target.
    pub target: WorkTarget,
    /// The handler to run it with.
    pub handler: Arc<dyn WorkHandler>,
}

impl WorkItem {
    /// Creates a work item.
    #[must_use]
    pub fn new(target: WorkTarget, handler: Arc<dyn WorkHandler>) -> Self {
        Self { target, handler }
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("target", &self.target.label())
            .finish_non_exhaustive()
    }
}

/// Pool utilization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Workers running an item.
    pub active: usize,
    /// Workers waiting for an item.
    pub idle: usize,
    /// Items waiting in the queue.
    pub queued: usize,
    /// Live workers.
    pub workers: usize,
}

struct Shared {
    config: PoolConfig,
    receiver: tokio::sync::Mutex<mpsc::Receiver<WorkItem>>,
    workers: AtomicUsize,
    active: AtomicUsize,
    queued: AtomicUsize,
    abandon: AtomicBool,
}

impl Shared {
    async fn next(&self) -> Option<WorkItem> {
        self.receiver.lock().await.recv().await
    }

    /// Retires one worker if the pool is above its core size.
    fn try_retire(&self) -> bool {
        let core = self.config.core_workers;
        self.workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| (w > core).then(|| w - 1))
            .is_ok()
    }

    /// Brings a just-retired worker back if work arrived while it retired.
    fn try_rejoin(&self) -> bool {
        let max = self.config.max_workers;
        self.queued.load(Ordering::SeqCst) > 0
            && self
                .workers
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| (w < max).then_some(w + 1))
                .is_ok()
    }

    async fn run(&self, item: WorkItem) {
        self.active.fetch_add(1, Ordering::SeqCst);
        run_item(item).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_item(item: WorkItem) {
    let WorkItem { target, handler } = item;
    let label = target.label();
    match AssertUnwindSafe(handler.handle(target)).catch_unwind().await {
        Ok(Ok(())) => debug!(target = %label, "Work item finished"),
        Ok(Err(err)) => warn!(target = %label, error = %err, "Work item failed"),
        Err(_) => error!(target = %label, "Work item panicked"),
    }
}

async fn worker_loop(shared: Arc<Shared>, first: Option<WorkItem>) {
    if let Some(item) = first {
        shared.run(item).await;
    }

    loop {
        let above_core = shared.workers.load(Ordering::SeqCst) > shared.config.core_workers;
        let received = if above_core {
            match tokio::time::timeout(shared.config.keep_alive(), shared.next()).await {
                Ok(received) => received,
                Err(_) => {
                    if !shared.try_retire() {
                        continue;
                    }
                    // A submitter may have queued an item after seeing this
                    // worker alive and so not spawned a new one.
                    if shared.try_rejoin() {
                        continue;
                    }
                    debug!("Idle worker retired");
                    return;
                }
            }
        } else {
            shared.next().await
        };

        let Some(item) = received else { break };
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        if shared.abandon.load(Ordering::SeqCst) {
            debug!(target = %item.target.label(), "Discarding queued work item");
            continue;
        }
        shared.run(item).await;
    }

    shared.workers.fetch_sub(1, Ordering::SeqCst);
}

/// Runs work items on tokio tasks with a bounded queue.
///
/// Submission starts a new worker while fewer than `core_workers` exist,
/// otherwise queues the item, otherwise grows the pool up to
/// `max_workers`, and otherwise applies the configured
/// [`SaturationPolicy`]. Workers above the core size retire after
/// `keep_alive` without work.
pub struct WorkerPool {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::Sender<WorkItem>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    metrics: Option<Arc<BusMetrics>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a pool. Workers are started lazily by `submit`.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                receiver: tokio::sync::Mutex::new(receiver),
                workers: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                abandon: AtomicBool::new(false),
            }),
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(Vec::new()),
            metrics: None,
        }
    }

    /// Counts rejections in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Returns true once `shutdown` has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Submits a work item.
    ///
    /// Under [`SaturationPolicy::Block`] this waits for queue space; under
    /// [`SaturationPolicy::CallerRuns`] the item runs on the caller's task
    /// before this returns.
    pub async fn submit(&self, item: WorkItem) -> Result<(), PoolRejection> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(PoolRejection::shut_down());
        };
        let config = &self.shared.config;

        if self.reserve_worker(config.core_workers) {
            self.spawn_worker(Some(item));
            return Ok(());
        }

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        let item = match sender.try_send(item) {
            Ok(()) => {
                let idle_pool = self.shared.workers.load(Ordering::SeqCst) == 0;
                if idle_pool && self.reserve_worker(config.max_workers) {
                    self.spawn_worker(None);
                }
                return Ok(());
            }
            Err(TrySendError::Closed(_)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(PoolRejection::shut_down());
            }
            Err(TrySendError::Full(item)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                item
            }
        };

        if self.reserve_worker(config.max_workers) {
            self.spawn_worker(Some(item));
            return Ok(());
        }

        match config.saturation {
            SaturationPolicy::Reject => {
                if let Some(metrics) = &self.metrics {
                    metrics.incr(Counter::PoolRejections);
                }
                warn!(target = %item.target.label(), "Worker pool saturated, rejecting work item");
                Err(PoolRejection::saturated())
            }
            SaturationPolicy::Block => {
                self.shared.queued.fetch_add(1, Ordering::SeqCst);
                if sender.send(item).await.is_err() {
                    self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                    return Err(PoolRejection::shut_down());
                }
                Ok(())
            }
            SaturationPolicy::CallerRuns => {
                debug!(target = %item.target.label(), "Worker pool saturated, running on caller");
                run_item(item).await;
                Ok(())
            }
        }
    }

    /// Current utilization.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let workers = self.shared.workers.load(Ordering::SeqCst);
        let active = self.shared.active.load(Ordering::SeqCst);
        PoolStats {
            active,
            idle: workers.saturating_sub(active),
            queued: self.queue_depth(),
            workers,
        }
    }

    /// Stops accepting work and waits for the workers to exit.
    ///
    /// With `drain_on_shutdown` queued items still run; otherwise they are
    /// discarded. Items already running always finish.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        if !self.shared.config.drain_on_shutdown {
            self.shared.abandon.store(true, Ordering::SeqCst);
        }

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Worker task ended abnormally");
            }
        }
        debug!("Worker pool shut down");
    }

    /// Items sitting in the channel. Submitters blocked waiting for space are
    /// not counted.
    fn queue_depth(&self) -> usize {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.max_capacity() - sender.capacity(),
            None => self.shared.queued.load(Ordering::SeqCst),
        }
    }

    fn reserve_worker(&self, limit: usize) -> bool {
        self.shared
            .workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| (w < limit).then_some(w + 1))
            .is_ok()
    }

    fn spawn_worker(&self, first: Option<WorkItem>) {
        let handle = tokio::spawn(worker_loop(self.shared.clone(), first));
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}
