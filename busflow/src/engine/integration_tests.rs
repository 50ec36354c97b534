//! End-to-end scenarios across the engine, callback store, store and pool.

use super::*;
use crate::callback::Resolution;
use crate::conditions::{Always, PathCondition};
use crate::config::{PoolConfig, StoreConfig};
use crate::context::{ContextState, Destination, Payload};
use crate::mediators::{
    DynamicMediator, ExactlyOne, Filter, LogMediator, PropertyMediator, SendAsyncMediator,
    Sequence, StoreMediator,
};
use crate::metrics::BusMetrics;
use crate::pool::{MediationHandler, StoreProcessor, WorkerPool};
use crate::store::{InMemoryMessageStore, MessageStatus, MessageStore};
use crate::testing::{
    assert_completed, assert_failed_with, assert_suspended, assert_terminated,
    test_env_with_transport, CountingHandler, MediationTrace, RecordingMediator,
    RecordingTransport,
};
use crate::utils::now_utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn quote_pipeline(trace: &MediationTrace) -> MediatorRef {
    let send = SendAsyncMediator::new()
        .to(Destination::new("http://quotes"))
        .on_response(Arc::new(RecordingMediator::new("reply", trace)))
        .on_timeout(Arc::new(RecordingMediator::new("timeout", trace)));
    Arc::new(Sequence::new(vec![Arc::new(Filter::new(
        Arc::new(Always),
        vec![Arc::new(LogMediator::new()), Arc::new(send)],
    ))]))
}

#[tokio::test]
async fn test_request_response_round_trip() {
    let trace = MediationTrace::new();
    let transport = Arc::new(RecordingTransport::new());
    let env = test_env_with_transport(transport.clone());
    transport.watch(env.callbacks().clone());
    let engine = MediationEngine::new(quote_pipeline(&trace), env.clone());

    let outcome = engine
        .inject(MediationContext::with_message_id("m-1", Payload::text("getQuote")))
        .await;
    let key = assert_suspended(&outcome);

    assert_eq!(transport.last_key(), Some(key.clone()));
    assert_eq!(transport.pending_at_send(), vec![true]);
    let (sent, _) = &transport.sent()[0];
    assert_eq!(sent.destination().map(Destination::address), Some("http://quotes"));
    assert!(trace.is_empty());

    let response = MediationContext::response(Payload::text("42.0"));
    let resolution = env.callbacks().resolve(&key, response).await;

    let Resolution::Resumed(resumed) = resolution else {
        panic!("expected resumption, got {resolution:?}");
    };
    assert!(assert_completed(&resumed));
    assert_eq!(resumed.message_id(), "m-1");
    assert_eq!(trace.names(), vec!["reply"]);
    let seen = &trace.contexts()[0];
    assert_eq!(seen.payload().as_text().as_deref(), Some("42.0"));
    assert_eq!(seen.state(), ContextState::Continuing);
    assert!(seen.is_response());

    let metrics = env.metrics();
    assert_eq!(metrics.get(Counter::Injected), 1);
    assert_eq!(metrics.get(Counter::Suspended), 1);
    assert_eq!(metrics.get(Counter::Resumed), 1);
    assert_eq!(metrics.get(Counter::Completed), 1);
    assert_eq!(env.callbacks().pending_count(), 0);
}

#[tokio::test]
async fn test_late_and_unknown_responses_are_orphaned() {
    let trace = MediationTrace::new();
    let transport = Arc::new(RecordingTransport::new());
    let env = test_env_with_transport(transport.clone());
    let engine = MediationEngine::new(quote_pipeline(&trace), env.clone());

    let key = assert_suspended(&engine.inject(MediationContext::new(Payload::Empty)).await);
    let first = env
        .callbacks()
        .resolve(&key, MediationContext::response(Payload::text("a")))
        .await;
    assert!(matches!(first, Resolution::Resumed(_)));

    let again = env
        .callbacks()
        .resolve(&key, MediationContext::response(Payload::text("b")))
        .await;
    let unknown = env
        .callbacks()
        .resolve("no-such-key", MediationContext::response(Payload::Empty))
        .await;

    assert_eq!(again, Resolution::Orphaned);
    assert_eq!(unknown, Resolution::Orphaned);
    assert_eq!(trace.len(), 1);
    assert_eq!(env.metrics().get(Counter::OrphanedResponses), 2);
    assert_eq!(env.callbacks().orphan_count(), 2);
}

#[tokio::test]
async fn test_unanswered_call_times_out_on_sweep() {
    let trace = MediationTrace::new();
    let env = test_env_with_transport(Arc::new(RecordingTransport::new()));
    let send = SendAsyncMediator::new()
        .with_timeout(Duration::from_secs(5))
        .on_response(Arc::new(RecordingMediator::new("reply", &trace)))
        .on_timeout(Arc::new(RecordingMediator::new("timeout", &trace)));
    let engine = MediationEngine::new(Arc::new(send), env.clone());

    let key = assert_suspended(&engine.inject(MediationContext::new(Payload::Empty)).await);
    assert!(env.callbacks().sweep(now_utc()).await.is_empty());

    let expired = env
        .callbacks()
        .sweep(now_utc() + chrono::Duration::seconds(10))
        .await;
    assert_eq!(expired, vec![key.clone()]);
    assert_eq!(trace.names(), vec!["timeout"]);
    assert_eq!(trace.contexts()[0].property("callback.timed_out"), Some(&json!(true)));

    let late = env
        .callbacks()
        .resolve(&key, MediationContext::response(Payload::Empty))
        .await;
    assert_eq!(late, Resolution::Orphaned);
    assert_eq!(env.metrics().get(Counter::TimedOutCallbacks), 1);
    assert_eq!(env.metrics().get(Counter::Failed), 1);
}

#[tokio::test]
async fn test_failure_is_isolated_to_one_message() {
    let trace = MediationTrace::new();
    let env = test_env_with_transport(Arc::new(RecordingTransport::new()));
    let root = ExactlyOne::new(Vec::new())
        .case(
            Arc::new(PathCondition::equals("/kind", "broken")),
            Arc::new(DynamicMediator::new("unregistered")),
        )
        .with_default(Arc::new(RecordingMediator::new("ok", &trace)));
    let engine = MediationEngine::new(Arc::new(root), env.clone());

    let broken = engine
        .inject(MediationContext::new(Payload::json(json!({"kind": "broken"}))))
        .await;
    let healthy = engine
        .inject(MediationContext::new(Payload::json(json!({"kind": "order"}))))
        .await;

    assert_failed_with(&broken, "no factory registered");
    assert!(assert_completed(&healthy));
    assert_eq!(trace.names(), vec!["ok"]);
    assert_eq!(env.metrics().get(Counter::Failed), 1);
    assert_eq!(env.metrics().get(Counter::Completed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_resume_exactly_once() {
    let trace = MediationTrace::new();
    let transport = Arc::new(RecordingTransport::new());
    let env = test_env_with_transport(transport.clone());
    let engine = MediationEngine::new(quote_pipeline(&trace), env.clone());

    let mut injections = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        injections.push(tokio::spawn(async move {
            let ctx = MediationContext::with_message_id(format!("m-{i}"), Payload::Empty);
            engine.inject(ctx).await
        }));
    }
    let mut keys = Vec::new();
    for injection in injections {
        keys.push(assert_suspended(&injection.await.unwrap()));
    }
    assert_eq!(env.callbacks().pending_count(), 32);

    let mut resolutions = Vec::new();
    for key in keys.iter().chain(keys.iter()) {
        let callbacks = env.callbacks().clone();
        let key = key.clone();
        resolutions.push(tokio::spawn(async move {
            callbacks
                .resolve(&key, MediationContext::response(Payload::Empty))
                .await
        }));
    }
    let mut resumed = 0;
    for resolution in resolutions {
        if let Resolution::Resumed(outcome) = resolution.await.unwrap() {
            assert!(assert_completed(&outcome));
            resumed += 1;
        }
    }

    assert_eq!(resumed, 32);
    assert_eq!(trace.len(), 32);
    assert_eq!(env.metrics().get(Counter::OrphanedResponses), 32);
    assert_eq!(env.callbacks().pending_count(), 0);
}

#[tokio::test]
async fn test_stored_message_is_delivered_through_second_pipeline() {
    let store = Arc::new(InMemoryMessageStore::new());
    let metrics = Arc::new(BusMetrics::new());
    let inbound_env = MediationEnvironment::builder(Arc::new(RecordingTransport::new()))
        .store(store.clone())
        .metrics(metrics.clone())
        .build();
    let inbound = MediationEngine::new(
        Arc::new(Sequence::new(vec![
            Arc::new(PropertyMediator::set("stage", "accepted")),
            Arc::new(StoreMediator::new("orders")),
        ])),
        inbound_env,
    );

    let outcome = inbound
        .inject(MediationContext::with_message_id("m-9", Payload::text("order")))
        .await;
    assert_terminated(&outcome);
    assert_eq!(store.stats().await.unwrap().queued, 1);

    let trace = MediationTrace::new();
    let outbound_env = MediationEnvironment::builder(Arc::new(RecordingTransport::new()))
        .metrics(metrics.clone())
        .build();
    let outbound = MediationEngine::new(Arc::new(RecordingMediator::new("deliver", &trace)), outbound_env);
    let pool = Arc::new(WorkerPool::new(PoolConfig::default().with_workers(1, 2)));
    let processor = StoreProcessor::new(
        store.clone(),
        pool.clone(),
        Arc::new(MediationHandler::new(outbound)),
        &StoreConfig::default(),
    )
    .for_queue("orders")
    .with_metrics(metrics.clone());

    assert_eq!(processor.drain().await.unwrap(), 1);
    pool.shutdown().await;

    let delivered = &trace.contexts()[0];
    assert_eq!(delivered.message_id(), "m-9");
    assert_eq!(delivered.property("stage"), Some(&json!("accepted")));
    assert_eq!(delivered.payload().as_text().as_deref(), Some("order"));
    assert_eq!(store.stats().await.unwrap().delivered, 1);
    assert_eq!(metrics.get(Counter::Persisted), 1);
    assert_eq!(metrics.get(Counter::Delivered), 1);
}

#[tokio::test]
async fn test_persistently_failing_message_is_dead_lettered() {
    let config = StoreConfig::default().with_max_retries(2);
    let store = Arc::new(InMemoryMessageStore::with_config(&config));
    let metrics = Arc::new(BusMetrics::new());
    let id = store
        .persist(crate::store::NewMessage::new(b"poison".to_vec()))
        .await
        .unwrap();
    let handler = Arc::new(CountingHandler::failing());

    for _ in 0..3 {
        let pool = Arc::new(WorkerPool::new(PoolConfig::default().with_workers(1, 1)));
        let processor = StoreProcessor::new(store.clone(), pool.clone(), handler.clone(), &config)
            .with_metrics(metrics.clone());
        assert_eq!(processor.poll_once().await.unwrap(), 1);
        pool.shutdown().await;
    }

    let message = store.get(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Dead);
    assert_eq!(message.attempts, 3);
    assert_eq!(handler.count(), 3);
    assert_eq!(metrics.get(Counter::DeadLettered), 1);
    assert!(store.lock(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_monitor_reports_pending_and_store_depth() {
    let store = Arc::new(InMemoryMessageStore::new());
    let env = MediationEnvironment::builder(Arc::new(RecordingTransport::new()))
        .store(store.clone())
        .build();
    let engine = MediationEngine::new(quote_pipeline(&MediationTrace::new()), env.clone());
    let key = assert_suspended(&engine.inject(MediationContext::new(Payload::Empty)).await);
    store
        .persist(crate::store::NewMessage::new(vec![1]))
        .await
        .unwrap();
    let pool = Arc::new(WorkerPool::new(PoolConfig::default().with_workers(1, 3)));

    let snapshot = Monitor::new(env.callbacks().clone(), env.metrics().clone())
        .with_store(store)
        .with_pool(pool.clone())
        .snapshot()
        .await
        .unwrap();

    assert_eq!(snapshot.pending_callbacks, 1);
    assert_eq!(snapshot.pending_keys, vec![key]);
    assert_eq!(snapshot.store.map(|s| s.queued), Some(1));
    assert_eq!(snapshot.pool.map(|p| p.active), Some(0));
    assert_eq!(snapshot.metrics.suspended, 1);
    pool.shutdown().await;
}

fn suspending_processor(
    store: Arc<InMemoryMessageStore>,
    transport: Arc<RecordingTransport>,
    metrics: Arc<BusMetrics>,
) -> (StoreProcessor, Arc<WorkerPool>, MediationEnvironment) {
    let env = MediationEnvironment::builder(transport)
        .metrics(metrics.clone())
        .build();
    let send = SendAsyncMediator::new()
        .to(Destination::new("http://quotes"))
        .with_timeout(Duration::from_millis(1));
    let engine = MediationEngine::new(Arc::new(send), env.clone());
    let pool = Arc::new(WorkerPool::new(PoolConfig::default().with_workers(1, 1)));
    let processor = StoreProcessor::new(
        store,
        pool.clone(),
        Arc::new(MediationHandler::new(engine)),
        &StoreConfig::default(),
    )
    .with_metrics(metrics);
    (processor, pool, env)
}

async fn wait_for_send(transport: &RecordingTransport) -> String {
    for _ in 0..200 {
        if let Some(key) = transport.last_key() {
            return key;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stored message was never dispatched");
}

#[tokio::test]
async fn test_stored_message_requeued_when_callback_times_out() {
    let store = Arc::new(InMemoryMessageStore::new());
    let transport = Arc::new(RecordingTransport::new());
    let metrics = Arc::new(BusMetrics::new());
    let id = store
        .persist(
            crate::store::NewMessage::from_context(&MediationContext::with_message_id(
                "m-20",
                Payload::text("quote?"),
            ))
            .unwrap(),
        )
        .await
        .unwrap();
    let (processor, pool, env) = suspending_processor(store.clone(), transport.clone(), metrics.clone());

    assert_eq!(processor.poll_once().await.unwrap(), 1);
    wait_for_send(&transport).await;
    let expired = env.callbacks().sweep(now_utc() + chrono::Duration::seconds(5)).await;
    pool.shutdown().await;

    assert_eq!(expired.len(), 1);
    let message = store.get(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Queued);
    assert_eq!(message.attempts, 1);
    assert_eq!(metrics.get(Counter::Delivered), 0);
}

#[tokio::test]
async fn test_stored_message_delivered_after_response() {
    let store = Arc::new(InMemoryMessageStore::new());
    let transport = Arc::new(RecordingTransport::new());
    let metrics = Arc::new(BusMetrics::new());
    let id = store
        .persist(
            crate::store::NewMessage::from_context(&MediationContext::with_message_id(
                "m-21",
                Payload::text("quote?"),
            ))
            .unwrap(),
        )
        .await
        .unwrap();
    let (processor, pool, env) = suspending_processor(store.clone(), transport.clone(), metrics.clone());

    assert_eq!(processor.poll_once().await.unwrap(), 1);
    let key = wait_for_send(&transport).await;
    let resolution = env
        .callbacks()
        .resolve(&key, MediationContext::response(Payload::text("42")))
        .await;
    pool.shutdown().await;

    assert!(matches!(resolution, Resolution::Resumed(_)));
    let message = store.get(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Delivered);
    assert_eq!(metrics.get(Counter::Delivered), 1);
}

#[tokio::test]
async fn test_sequence_error_handler_runs_and_message_fails() {
    let trace = MediationTrace::new();
    let env = test_env_with_transport(Arc::new(RecordingTransport::new()));
    let root = Sequence::new(vec![Arc::new(DynamicMediator::new("missing"))])
        .with_on_error(Arc::new(RecordingMediator::new("fault", &trace)));
    let engine = MediationEngine::new(Arc::new(root), env.clone());

    let outcome = engine.inject(MediationContext::new(Payload::Empty)).await;

    assert_failed_with(&outcome, "no factory registered");
    assert_eq!(trace.names(), vec!["fault"]);
    assert_eq!(trace.contexts()[0].property("error.kind"), Some(&json!("MediationError")));
    assert_eq!(env.metrics().get(Counter::Failed), 1);
}
