//! First-match-wins branching.

use super::{Mediator, MediatorRef};
use crate::conditions::{ConditionMode, ConditionRef};
use crate::context::MediationContext;
use crate::engine::MediationEnvironment;
use crate::errors::BusflowError;
use async_trait::async_trait;
use tracing::trace;

/// One branch of an [`ExactlyOne`].
#[derive(Debug, Clone)]
pub struct Case {
    name: Option<String>,
    condition: ConditionRef,
    target: MediatorRef,
}

impl Case {
    /// Creates a case.
    #[must_use]
    pub fn new(condition: ConditionRef, target: MediatorRef) -> Self {
        Self {
            name: None,
            condition,
            target,
        }
    }

    /// Names the case for tracing.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Runs the branch of the first matching case, or the default.
///
/// Conditions are evaluated in order and evaluation stops at the first
/// match. With no match and no default, nothing runs and the result is
/// `true`. At most one branch runs per invocation.
#[derive(Debug, Clone)]
pub struct ExactlyOne {
    name: String,
    cases: Vec<Case>,
    default: Option<MediatorRef>,
    mode: ConditionMode,
}

impl ExactlyOne {
    /// Creates a switch over `cases`.
    #[must_use]
    pub fn new(cases: Vec<Case>) -> Self {
        Self {
            name: "switch".to_string(),
            cases,
            default: None,
            mode: ConditionMode::default(),
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends a case.
    #[must_use]
    pub fn case(mut self, condition: ConditionRef, target: MediatorRef) -> Self {
        self.cases.push(Case::new(condition, target));
        self
    }

    /// Sets the default branch.
    #[must_use]
    pub fn with_default(mut self, default: MediatorRef) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets how condition errors are treated.
    #[must_use]
    pub fn with_mode(mut self, mode: ConditionMode) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
impl Mediator for ExactlyOne {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        for (index, case) in self.cases.iter().enumerate() {
            if self.mode.evaluate(case.condition.as_ref(), ctx)? {
                trace!(
                    switch = %self.name,
                    case = case.name.as_deref().unwrap_or_default(),
                    index,
                    message_id = %ctx.message_id(),
                    "Case matched"
                );
                return case.target.mediate(ctx, env).await;
            }
        }

        match &self.default {
            Some(default) => default.mediate(ctx, env).await,
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{Always, Never, PathCondition, PredicateCondition};
    use crate::context::Payload;
    use crate::testing::{test_env, MediationTrace, RecordingMediator};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lowest_index_match_wins() {
        let env = test_env();
        let trace = MediationTrace::new();
        let switch = ExactlyOne::new(vec![])
            .case(Arc::new(Never), Arc::new(RecordingMediator::new("c0", &trace)))
            .case(Arc::new(Always), Arc::new(RecordingMediator::new("c1", &trace).returning(false)))
            .case(Arc::new(Always), Arc::new(RecordingMediator::new("c2", &trace)))
            .with_default(Arc::new(RecordingMediator::new("default", &trace)));

        let mut ctx = MediationContext::new(Payload::Empty);
        assert!(!switch.mediate(&mut ctx, &env).await.unwrap());
        assert_eq!(trace.names(), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_evaluation_short_circuits() {
        let env = test_env();
        let evaluated = Arc::new(AtomicUsize::new(0));
        let counter = evaluated.clone();
        let counting = Arc::new(PredicateCondition::new("counting", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        }));

        let trace = MediationTrace::new();
        let switch = ExactlyOne::new(vec![
            Case::new(Arc::new(Always), Arc::new(RecordingMediator::new("hit", &trace))),
            Case::new(counting, Arc::new(RecordingMediator::new("never", &trace))),
        ]);

        let mut ctx = MediationContext::new(Payload::Empty);
        switch.mediate(&mut ctx, &env).await.unwrap();
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_default_and_no_default() {
        let env = test_env();
        let trace = MediationTrace::new();
        let mut ctx = MediationContext::new(Payload::json(json!({"type": "refund"})));

        let no_default = ExactlyOne::new(vec![Case::new(
            Arc::new(PathCondition::equals("/type", "order")),
            Arc::new(RecordingMediator::new("order", &trace).returning(false)),
        )]);
        assert!(no_default.mediate(&mut ctx, &env).await.unwrap());
        assert!(trace.is_empty());

        let with_default =
            no_default.with_default(Arc::new(RecordingMediator::new("default", &trace).returning(false)));
        assert!(!with_default.mediate(&mut ctx, &env).await.unwrap());
        assert_eq!(trace.names(), vec!["default"]);
    }
}
