//! Delivery of stored messages through the worker pool.

use super::{WorkHandler, WorkItem, WorkTarget, WorkerPool};
use crate::config::StoreConfig;
use crate::errors::{BusflowError, MediationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::metrics::{BusMetrics, Counter};
use crate::store::{FailOutcome, MessageStore, StoreId};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Runs a delivery handler and settles the stored message with its result.
struct Settling {
    store: Arc<dyn MessageStore>,
    inner: Arc<dyn WorkHandler>,
    metrics: Arc<BusMetrics>,
    events: Arc<dyn EventSink>,
}

impl Settling {
    async fn settle(
        &self,
        id: StoreId,
        result: Result<(), BusflowError>,
    ) -> Result<(), BusflowError> {
        match result {
            Ok(()) => {
                self.store.acknowledge(id).await?;
                self.metrics.incr(Counter::Delivered);
                debug!(store_id = id, "Stored message delivered");
                self.events.try_emit("store.delivered", Some(json!({"id": id})));
                Ok(())
            }
            Err(cause) => {
                match self.store.fail(id).await? {
                    FailOutcome::Requeued {
                        attempts,
                        available_at,
                    } => {
                        warn!(
                            store_id = id,
                            attempts,
                            error = %cause,
                            "Delivery failed, message requeued"
                        );
                        self.events.try_emit(
                            "store.retry",
                            Some(json!({
                                "id": id,
                                "attempts": attempts,
                                "available_at": available_at,
                                "error": cause.to_dict(),
                            })),
                        );
                    }
                    FailOutcome::DeadLettered { attempts } => {
                        self.metrics.incr(Counter::DeadLettered);
                        warn!(
                            store_id = id,
                            attempts,
                            error = %cause,
                            "Delivery failed, message dead-lettered"
                        );
                        self.events.try_emit(
                            "store.dead_lettered",
                            Some(json!({"id": id, "attempts": attempts, "error": cause.to_dict()})),
                        );
                    }
                }
                Err(cause)
            }
        }
    }
}

#[async_trait]
impl WorkHandler for Settling {
    async fn handle(&self, target: WorkTarget) -> Result<(), BusflowError> {
        let message = match target {
            WorkTarget::Stored(message) => message,
            other => return self.inner.handle(other).await,
        };
        let id = message.id;
        let result = AssertUnwindSafe(self.inner.handle(WorkTarget::Stored(message)))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(MediationError::new("delivery", "handler panicked").into()));
        self.settle(id, result).await
    }
}

/// Pulls locked batches from a store and delivers them through a pool.
///
/// Each message is acknowledged when the handler succeeds and failed
/// otherwise. A message the pool refuses is failed as well, so its lock is
/// released.
pub struct StoreProcessor {
    store: Arc<dyn MessageStore>,
    pool: Arc<WorkerPool>,
    settling: Arc<Settling>,
    queue: Option<String>,
    batch_size: usize,
    poll_interval: Duration,
}

impl std::fmt::Debug for StoreProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreProcessor")
            .field("queue", &self.queue)
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl StoreProcessor {
    /// Creates a processor delivering with `handler`.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        pool: Arc<WorkerPool>,
        handler: Arc<dyn WorkHandler>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            settling: Arc::new(Settling {
                store: store.clone(),
                inner: handler,
                metrics: Arc::new(BusMetrics::new()),
                events: Arc::new(NoOpEventSink),
            }),
            store,
            pool,
            queue: None,
            batch_size: config.lock_batch_size.max(1),
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
        }
    }

    /// Restricts delivery to one queue.
    #[must_use]
    pub fn for_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Records delivery counters in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.rebuild(|s| s.metrics = metrics);
        self
    }

    /// Emits delivery events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.rebuild(|s| s.events = events);
        self
    }

    fn rebuild(&mut self, update: impl FnOnce(&mut Settling)) {
        let mut settling = Settling {
            store: self.settling.store.clone(),
            inner: self.settling.inner.clone(),
            metrics: self.settling.metrics.clone(),
            events: self.settling.events.clone(),
        };
        update(&mut settling);
        self.settling = Arc::new(settling);
    }

    /// Locks one batch and submits it to the pool. Returns the number of
    /// messages locked.
    pub async fn poll_once(&self) -> Result<usize, BusflowError> {
        let batch = self
            .store
            .lock_queue(self.queue.as_deref(), self.batch_size)
            .await?;
        let locked = batch.len();
        let handler: Arc<dyn WorkHandler> = self.settling.clone();

        for message in batch {
            let id = message.id;
            let item = WorkItem::new(WorkTarget::Stored(message), handler.clone());
            if let Err(rejection) = self.pool.submit(item).await {
                warn!(store_id = id, error = %rejection, "Pool refused stored message");
                if let Err(err) = self.settling.settle(id, Err(rejection.into())).await {
                    debug!(store_id = id, error = %err, "Refused message settled");
                }
            }
        }

        if locked > 0 {
            debug!(locked, "Stored messages submitted");
        }
        Ok(locked)
    }

    /// Polls until a batch comes back short. Returns the total locked.
    pub async fn drain(&self) -> Result<usize, BusflowError> {
        let mut total = 0;
        loop {
            let locked = self.poll_once().await?;
            total += locked;
            if locked < self.batch_size {
                return Ok(total);
            }
        }
    }

    /// Spawns a background loop draining the store every poll interval.
    ///
    /// A zero poll interval is treated as one millisecond.
    #[must_use]
    pub fn start(self: Arc<Self>) -> ProcessorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.drain().await {
                            error!(error = %err, "Store poll failed");
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            info!("Store processor stopped");
        });

        ProcessorHandle {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

/// Handle to a running [`StoreProcessor`] loop.
pub struct ProcessorHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessorHandle {
    /// Returns true while the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the loop after its current poll and waits for it.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::events::CollectingEventSink;
    use crate::store::{InMemoryMessageStore, MessageStatus, NewMessage};
    use crate::testing::CountingHandler;

    struct Fixture {
        store: Arc<InMemoryMessageStore>,
        pool: Arc<WorkerPool>,
        metrics: Arc<BusMetrics>,
        events: Arc<CollectingEventSink>,
    }

    impl Fixture {
        fn new(config: &StoreConfig) -> Self {
            Self {
                store: Arc::new(InMemoryMessageStore::with_config(config)),
                pool: Arc::new(WorkerPool::new(PoolConfig::default().with_workers(2, 2))),
                metrics: Arc::new(BusMetrics::new()),
                events: Arc::new(CollectingEventSink::new()),
            }
        }

        fn processor(&self, handler: Arc<dyn WorkHandler>, config: &StoreConfig) -> StoreProcessor {
            StoreProcessor::new(self.store.clone(), self.pool.clone(), handler, config)
                .with_metrics(self.metrics.clone())
                .with_events(self.events.clone())
        }
    }

    #[tokio::test]
    async fn test_successful_delivery_acknowledges() {
        let config = StoreConfig::default().with_lock_batch_size(2);
        let fx = Fixture::new(&config);
        for i in 0..5u8 {
            fx.store.persist(NewMessage::new(vec![i])).await.unwrap();
        }
        let handler = Arc::new(CountingHandler::new());
        let processor = fx.processor(handler.clone(), &config);

        assert_eq!(processor.drain().await.unwrap(), 5);
        fx.pool.shutdown().await;

        assert_eq!(handler.count(), 5);
        assert_eq!(fx.store.stats().await.unwrap().delivered, 5);
        assert_eq!(fx.metrics.get(Counter::Delivered), 5);
        assert_eq!(fx.events.count("store.delivered"), 5);
    }

    #[tokio::test]
    async fn test_failing_delivery_dead_letters_after_retries() {
        let config = StoreConfig::default().with_max_retries(1);
        let fx = Fixture::new(&config);
        let id = fx.store.persist(NewMessage::new(vec![1])).await.unwrap();
        let handler = Arc::new(CountingHandler::failing());
        let processor = fx.processor(handler.clone(), &config);

        processor.poll_once().await.unwrap();
        wait_until_unlocked(&fx.store).await;
        assert_eq!(fx.events.count("store.retry"), 1);

        processor.poll_once().await.unwrap();
        fx.pool.shutdown().await;

        assert_eq!(handler.count(), 2);
        let message = fx.store.get(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Dead);
        assert_eq!(fx.metrics.get(Counter::DeadLettered), 1);
        assert_eq!(fx.events.count("store.dead_lettered"), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_message() {
        let config = StoreConfig::default();
        let fx = Fixture::new(&config);
        let id = fx.store.persist(NewMessage::new(vec![1])).await.unwrap();
        let processor = fx.processor(Arc::new(CountingHandler::panicking_on(0)), &config);

        processor.poll_once().await.unwrap();
        fx.pool.shutdown().await;

        let message = fx.store.get(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Queued);
        assert_eq!(message.attempts, 1);
    }

    #[tokio::test]
    async fn test_background_loop_delivers() {
        let config = StoreConfig::default().with_poll_interval_ms(5);
        let fx = Fixture::new(&config);
        let processor = Arc::new(fx.processor(Arc::new(CountingHandler::new()), &config));
        let mut handle = processor.start();
        assert!(handle.is_running());

        fx.store.persist(NewMessage::new(vec![1])).await.unwrap();
        for _ in 0..200 {
            if fx.store.stats().await.unwrap().delivered == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.stop().await;

        assert_eq!(fx.store.stats().await.unwrap().delivered, 1);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_delivers() {
        let config = StoreConfig::default().with_poll_interval_ms(0);
        let fx = Fixture::new(&config);
        let processor = Arc::new(fx.processor(Arc::new(CountingHandler::new()), &config));
        let mut handle = processor.start();

        fx.store.persist(NewMessage::new(vec![1])).await.unwrap();
        for _ in 0..200 {
            if fx.store.stats().await.unwrap().delivered == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(handle.is_running());
        handle.stop().await;
        assert_eq!(fx.store.stats().await.unwrap().delivered, 1);
    }

    async fn wait_until_unlocked(store: &InMemoryMessageStore) {
        for _ in 0..200 {
            if store.stats().await.unwrap().locked == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("message stayed locked");
    }
}
