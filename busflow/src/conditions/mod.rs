//! Stateless predicates evaluated by branching mediators.
//!
//! A condition never mutates the context and returns the same answer for the
//! same context state. Evaluation can fail (for instance a path expression
//! applied to a byte payload); what a failure means is decided by the
//! [`ConditionMode`] of the mediator doing the evaluating.

mod path;
mod pattern;
mod predicate;

pub(crate) use path::select;
pub use path::{PathCheck, PathCondition};
pub use pattern::PatternCondition;
pub use predicate::PredicateCondition;

use crate::context::MediationContext;
use crate::errors::{BusflowError, ConditionEvaluationError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A pure predicate over a mediation context.
pub trait Condition: Send + Sync + std::fmt::Debug {
    /// Human-readable form, used in errors and logs.
    fn describe(&self) -> String;

    /// Evaluates the condition.
    fn evaluate(&self, ctx: &MediationContext) -> Result<bool, ConditionEvaluationError>;
}

/// Shared handle to a condition.
pub type ConditionRef = Arc<dyn Condition>;

/// How evaluation errors are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    /// An evaluation error counts as a non-match.
    #[default]
    Lenient,
    /// An evaluation error aborts mediation.
    Strict,
}

impl ConditionMode {
    /// Evaluates `condition` under this mode.
    pub fn evaluate(
        self,
        condition: &dyn Condition,
        ctx: &MediationContext,
    ) -> Result<bool, BusflowError> {
        match condition.evaluate(ctx) {
            Ok(matched) => Ok(matched),
            Err(err) if self == Self::Lenient => {
                debug!(
                    message_id = %ctx.message_id(),
                    condition = %err.condition,
                    error = %err.message,
                    "Condition error treated as non-match"
                );
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Always matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl Condition for Always {
    fn describe(&self) -> String {
        "true".to_string()
    }

    fn evaluate(&self, _ctx: &MediationContext) -> Result<bool, ConditionEvaluationError> {
        Ok(true)
    }
}

/// Never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Condition for Never {
    fn describe(&self) -> String {
        "false".to_string()
    }

    fn evaluate(&self, _ctx: &MediationContext) -> Result<bool, ConditionEvaluationError> {
        Ok(false)
    }
}

/// Negates a condition. Errors pass through unchanged.
#[derive(Debug, Clone)]
pub struct Not(pub ConditionRef);

impl Condition for Not {
    fn describe(&self) -> String {
        format!("not({})", self.0.describe())
    }

    fn evaluate(&self, ctx: &MediationContext) -> Result<bool, ConditionEvaluationError> {
        self.0.evaluate(ctx).map(|matched| !matched)
    }
}

/// Matches when every inner condition matches. Short-circuits on the first
/// non-match; an empty list matches.
#[derive(Debug, Clone, Default)]
pub struct All(pub Vec<ConditionRef>);

impl Condition for All {
    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|c| c.describe()).collect();
        format!("all({})", parts.join(", "))
    }

    fn evaluate(&self, ctx: &MediationContext) -> Result<bool, ConditionEvaluationError> {
        for condition in &self.0 {
            if !condition.evaluate(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Matches when any inner condition matches. Short-circuits on the first
/// match; an empty list does not match.
#[derive(Debug, Clone, Default)]
pub struct Any(pub Vec<ConditionRef>);

impl Condition for Any {
    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|c| c.describe()).collect();
        format!("any({})", parts.join(", "))
    }

    fn evaluate(&self, ctx: &MediationContext) -> Result<bool, ConditionEvaluationError> {
        for condition in &self.0 {
            if condition.evaluate(ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Payload;
    use serde_json::json;

    fn ctx() -> MediationContext {
        MediationContext::new(Payload::json(json!({"kind": "order"})))
    }

    fn broken() -> ConditionRef {
        Arc::new(PredicateCondition::fallible("broken", |_| Err("boom".into())))
    }

    #[test]
    fn test_constants() {
        assert!(Always.evaluate(&ctx()).unwrap());
        assert!(!Never.evaluate(&ctx()).unwrap());
        assert!(Not(Arc::new(Never)).evaluate(&ctx()).unwrap());
    }

    #[test]
    fn test_all_any_short_circuit() {
        let all = All(vec![Arc::new(Never), broken()]);
        assert!(!all.evaluate(&ctx()).unwrap());

        let any = Any(vec![Arc::new(Always), broken()]);
        assert!(any.evaluate(&ctx()).unwrap());

        assert!(All(vec![]).evaluate(&ctx()).unwrap());
        assert!(!Any(vec![]).evaluate(&ctx()).unwrap());
    }

    #[test]
    fn test_mode_lenient_maps_error_to_false() {
        let cond = broken();
        let result = ConditionMode::Lenient.evaluate(cond.as_ref(), &ctx());
        assert!(!result.unwrap());
    }

    #[test]
    fn test_mode_strict_propagates() {
        let cond = broken();
        let err = ConditionMode::Strict.evaluate(cond.as_ref(), &ctx()).unwrap_err();
        assert_eq!(err.kind(), "ConditionEvaluationError");
    }

    #[test]
    fn test_describe_nests() {
        let cond = Not(Arc::new(All(vec![Arc::new(Always), Arc::new(Never)])));
        assert_eq!(cond.describe(), "not(all(true, false))");
    }
}
