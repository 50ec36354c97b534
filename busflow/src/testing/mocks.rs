//! Test doubles for mediators, transports, continuations and work handlers.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::callback::{CallbackStore, Continuation};
use crate::context::MediationContext;
use crate::engine::{MediationEnvironment, MediationOutcome};
use crate::errors::{BusflowError, CallbackTimeoutError, MediationError, TransportError};
use crate::mediators::Mediator;
use crate::pool::{WorkHandler, WorkTarget};
use crate::transport::Transport;

/// Shared log of which mediators ran, in order, and what they saw.
#[derive(Debug, Clone, Default)]
pub struct MediationTrace {
    entries: Arc<Mutex<Vec<(String, MediationContext)>>>,
}

impl MediationTrace {
    /// Creates an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, name: impl Into<String>, ctx: &MediationContext) {
        self.entries.lock().push((name.into(), ctx.clone()));
    }

    /// Names of the mediators that ran.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Contexts as each mediator saw them.
    #[must_use]
    pub fn contexts(&self) -> Vec<MediationContext> {
        self.entries.lock().iter().map(|(_, ctx)| ctx.clone()).collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing ran.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// A mediator that records itself in a trace and returns a fixed result.
#[derive(Debug)]
pub struct RecordingMediator {
    name: String,
    trace: MediationTrace,
    result: bool,
}

impl RecordingMediator {
    /// Creates a recorder returning `true`.
    #[must_use]
    pub fn new(name: impl Into<String>, trace: &MediationTrace) -> Self {
        Self {
            name: name.into(),
            trace: trace.clone(),
            result: true,
        }
    }

    /// Sets the result.
    #[must_use]
    pub fn returning(mut self, result: bool) -> Self {
        self.result = result;
        self
    }
}

#[async_trait]
impl Mediator for RecordingMediator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        _env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        self.trace.record(&self.name, ctx);
        Ok(self.result)
    }
}

/// A mediator that returns a fixed result.
#[derive(Debug)]
pub struct FixedMediator {
    name: String,
    result: bool,
}

impl FixedMediator {
    /// Creates a fixed mediator.
    #[must_use]
    pub fn new(name: impl Into<String>, result: bool) -> Self {
        Self {
            name: name.into(),
            result,
        }
    }
}

#[async_trait]
impl Mediator for FixedMediator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        _ctx: &mut MediationContext,
        _env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        Ok(self.result)
    }
}

/// A mediator that always fails.
#[derive(Debug)]
pub struct FailingMediator {
    message: String,
}

impl FailingMediator {
    /// Creates a mediator failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Mediator for FailingMediator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn mediate(
        &self,
        _ctx: &mut MediationContext,
        _env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        Err(MediationError::new("failing", self.message.clone()).into())
    }
}

/// A transport that records what it sends.
///
/// When watching a callback store it also records whether the correlation
/// key was already pending at the moment of sending.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(MediationContext, Option<String>)>>,
    pending_at_send: Mutex<Vec<bool>>,
    callbacks: Mutex<Option<Arc<CallbackStore>>>,
}

impl RecordingTransport {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks key registration against `callbacks` on every send.
    pub fn watch(&self, callbacks: Arc<CallbackStore>) {
        *self.callbacks.lock() = Some(callbacks);
    }

    /// Messages sent so far with their correlation keys.
    #[must_use]
    pub fn sent(&self) -> Vec<(MediationContext, Option<String>)> {
        self.sent.lock().clone()
    }

    /// For each keyed send while watching, whether the key was pending.
    #[must_use]
    pub fn pending_at_send(&self) -> Vec<bool> {
        self.pending_at_send.lock().clone()
    }

    /// Correlation key of the most recent send.
    #[must_use]
    pub fn last_key(&self) -> Option<String> {
        self.sent.lock().last().and_then(|(_, key)| key.clone())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        ctx: &MediationContext,
        correlation_key: Option<String>,
    ) -> Result<(), TransportError> {
        if let (Some(callbacks), Some(key)) = (self.callbacks.lock().as_ref(), &correlation_key) {
            self.pending_at_send.lock().push(callbacks.is_pending(key));
        }
        self.sent.lock().push((ctx.clone(), correlation_key));
        Ok(())
    }
}

/// Outcomes delivered to a [`ScriptedContinuation`].
#[derive(Debug, Clone, Default)]
pub struct ResumeLog {
    seen: Arc<Mutex<Vec<Result<MediationContext, CallbackTimeoutError>>>>,
}

impl ResumeLog {
    /// Drains the recorded outcomes.
    #[must_use]
    pub fn take(&self) -> Vec<Result<MediationContext, CallbackTimeoutError>> {
        std::mem::take(&mut *self.seen.lock())
    }
}

/// A continuation that records how it was resumed.
#[derive(Debug)]
pub struct ScriptedContinuation {
    message_id: String,
    log: ResumeLog,
    panics: bool,
}

impl ScriptedContinuation {
    /// Creates a continuation and the log it writes to.
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> (Self, ResumeLog) {
        let log = ResumeLog::default();
        let continuation = Self {
            message_id: message_id.into(),
            log: log.clone(),
            panics: false,
        };
        (continuation, log)
    }

    /// Creates a continuation that panics when resumed.
    #[must_use]
    pub fn panicking(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            log: ResumeLog::default(),
            panics: true,
        }
    }
}

#[async_trait]
impl Continuation for ScriptedContinuation {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    async fn resume(
        self: Box<Self>,
        outcome: Result<MediationContext, CallbackTimeoutError>,
    ) -> MediationOutcome {
        assert!(!self.panics, "scripted continuation panicked");
        let result = match &outcome {
            Ok(_) => MediationOutcome::Completed {
                message_id: self.message_id.clone(),
                proceed: true,
            },
            Err(err) => MediationOutcome::Failed {
                message_id: self.message_id.clone(),
                error: err.to_string(),
            },
        };
        self.log.seen.lock().push(outcome);
        result
    }
}

/// A work handler that counts calls and can fail or panic.
#[derive(Debug, Default)]
pub struct CountingHandler {
    calls: AtomicUsize,
    fail: bool,
    panic_on: Option<usize>,
}

impl CountingHandler {
    /// Creates a handler that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Creates a handler that panics on call number `call` (0-based).
    #[must_use]
    pub fn panicking_on(call: usize) -> Self {
        Self {
            panic_on: Some(call),
            ..Self::default()
        }
    }

    /// Number of calls so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkHandler for CountingHandler {
    async fn handle(&self, target: WorkTarget) -> Result<(), BusflowError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(self.panic_on != Some(call), "work handler panicked on call {call}");
        if self.fail {
            return Err(MediationError::new("counting", format!("failed {}", target.label())).into());
        }
        Ok(())
    }
}

/// A work handler that waits until released.
#[derive(Debug)]
pub struct BlockingHandler {
    gate: watch::Sender<bool>,
    finished: AtomicUsize,
}

impl Default for BlockingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingHandler {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate,
            finished: AtomicUsize::new(0),
        }
    }

    /// Opens the gate for current and future calls.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Number of calls that have passed the gate.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkHandler for BlockingHandler {
    async fn handle(&self, _target: WorkTarget) -> Result<(), BusflowError> {
        let mut gate = self.gate.subscribe();
        loop {
            let open = *gate.borrow_and_update();
            if open || gate.changed().await.is_err() {
                break;
            }
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
