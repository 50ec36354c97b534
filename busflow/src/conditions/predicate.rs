//! Closure-backed conditions.

use super::Condition;
use crate::context::MediationContext;
use crate::errors::ConditionEvaluationError;
use std::sync::Arc;

type PredicateFn = dyn Fn(&MediationContext) -> Result<bool, String> + Send + Sync;

/// A named custom predicate.
#[derive(Clone)]
pub struct PredicateCondition {
    name: String,
    predicate: Arc<PredicateFn>,
}

impl PredicateCondition {
    /// Wraps an infallible predicate.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&MediationContext) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(move |ctx| Ok(predicate(ctx))),
        }
    }

    /// Wraps a predicate that can fail to evaluate.
    pub fn fallible<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&MediationContext) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl std::fmt::Debug for PredicateCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateCondition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Condition for PredicateCondition {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn evaluate(&self, ctx: &MediationContext) -> Result<bool, ConditionEvaluationError> {
        (self.predicate)(ctx).map_err(|message| ConditionEvaluationError::new(&self.name, message))
    }
}
