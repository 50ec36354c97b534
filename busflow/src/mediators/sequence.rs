//! Ordered composition of mediators.

use super::{Mediator, MediatorRef};
use crate::context::MediationContext;
use crate::engine::MediationEnvironment;
use crate::errors::{BusflowError, MediationError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

const HANDLED_BY: &str = "error.handled_by";

/// Runs children in order until one returns `false`.
///
/// The children that ran are exactly the prefix ending at the first `false`
/// (inclusive). An empty sequence returns `true`.
///
/// With an error handler, a child error runs the handler against the same
/// context and the error is then returned, so the message still ends as
/// failed. The error kind and message are exposed to the handler as the
/// `error.kind` and `error.message` properties. Only the innermost handler
/// runs: enclosing sequences see `error.handled_by` and pass the error on.
#[derive(Debug, Clone)]
pub struct Sequence {
    name: String,
    children: Vec<MediatorRef>,
    on_error: Option<MediatorRef>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Sequence {
    /// Creates an anonymous sequence.
    #[must_use]
    pub fn new(children: Vec<MediatorRef>) -> Self {
        Self::named("sequence", children)
    }

    /// Creates a named sequence.
    #[must_use]
    pub fn named(name: impl Into<String>, children: Vec<MediatorRef>) -> Self {
        Self {
            name: name.into(),
            children,
            on_error: None,
        }
    }

    /// Appends a child.
    #[must_use]
    pub fn then(mut self, child: impl Mediator + 'static) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    /// Sets the error handler.
    #[must_use]
    pub fn with_on_error(mut self, handler: MediatorRef) -> Self {
        self.on_error = Some(handler);
        self
    }

    /// Returns the children.
    #[must_use]
    pub fn children(&self) -> &[MediatorRef] {
        &self.children
    }

    /// Returns the number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns true if the sequence has no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait]
impl Mediator for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        for child in &self.children {
            match child.mediate(ctx, env).await {
                Ok(true) => {}
                Ok(false) => {
                    trace!(
                        sequence = %self.name,
                        mediator = %child.name(),
                        message_id = %ctx.message_id(),
                        "Sequence stopped"
                    );
                    return Ok(false);
                }
                Err(err) => {
                    let Some(handler) = &self.on_error else {
                        return Err(err);
                    };
                    if ctx.property(HANDLED_BY).is_some() {
                        return Err(err);
                    }
                    warn!(
                        sequence = %self.name,
                        mediator = %child.name(),
                        message_id = %ctx.message_id(),
                        error = %err,
                        "Running error handler"
                    );
                    ctx.set_property("error.kind", err.kind());
                    ctx.set_property("error.message", err.to_string());
                    ctx.set_property(HANDLED_BY, self.name.as_str());
                    if let Err(handler_err) = handler.mediate(ctx, env).await {
                        warn!(
                            sequence = %self.name,
                            message_id = %ctx.message_id(),
                            error = %handler_err,
                            "Error handler failed"
                        );
                    }
                    return Err(err);
                }
            }
        }
        Ok(true)
    }
}

/// Named sequences that can be referenced from anywhere in the tree.
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    sequences: RwLock<HashMap<String, MediatorRef>>,
}

impl SequenceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sequence under `key`, replacing any previous one.
    pub fn register(&self, key: impl Into<String>, sequence: MediatorRef) {
        self.sequences.write().insert(key.into(), sequence);
    }

    /// Looks up a sequence.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<MediatorRef> {
        self.sequences.read().get(key).cloned()
    }

    /// Lists registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.sequences.read().keys().cloned().collect()
    }
}

/// Runs the sequence registered under a key, resolved at invocation time.
#[derive(Debug, Clone)]
pub struct SequenceReference {
    key: String,
}

impl SequenceReference {
    /// Creates a reference to `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl Mediator for SequenceReference {
    fn name(&self) -> &str {
        &self.key
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        let target = env.sequences().get(&self.key).ok_or_else(|| {
            MediationError::new(&self.key, format!("no sequence registered as '{}'", self.key))
        })?;
        target.mediate(ctx, env).await
    }
}
