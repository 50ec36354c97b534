//! Conditional execution of a nested sequence.

use super::{Mediator, MediatorRef, Sequence};
use crate::conditions::{ConditionMode, ConditionRef};
use crate::context::MediationContext;
use crate::engine::MediationEnvironment;
use crate::errors::BusflowError;
use async_trait::async_trait;
use tracing::trace;

/// Runs its children as a nested [`Sequence`] when the condition matches.
///
/// When the condition does not match, the else branch runs if there is one;
/// otherwise nothing runs and the filter returns `true`.
#[derive(Debug, Clone)]
pub struct Filter {
    name: String,
    condition: ConditionRef,
    then: Sequence,
    otherwise: Option<MediatorRef>,
    mode: ConditionMode,
}

impl Filter {
    /// Creates a filter over `children`.
    #[must_use]
    pub fn new(condition: ConditionRef, children: Vec<MediatorRef>) -> Self {
        Self {
            name: "filter".to_string(),
            condition,
            then: Sequence::named("filter.then", children),
            otherwise: None,
            mode: ConditionMode::default(),
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the branch run when the condition does not match.
    #[must_use]
    pub fn with_else(mut self, otherwise: MediatorRef) -> Self {
        self.otherwise = Some(otherwise);
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
impl Mediator for Filter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        let matched = self.mode.evaluate(self.condition.as_ref(), ctx)?;
        trace!(filter = %self.name, matched, message_id = %ctx.message_id(), "Filter evaluated");

        if matched {
            return self.then.mediate(ctx, env).await;
        }
        match &self.otherwise {
            Some(branch) => branch.mediate(ctx, env).await,
            None => Ok(true),
        }
    }
}
