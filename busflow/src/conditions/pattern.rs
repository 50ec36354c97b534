//! Regular-expression conditions.

use super::path::select;
use super::Condition;
use crate::context::MediationContext;
use crate::errors::ConditionEvaluationError;
use regex::Regex;
use serde_json::Value;

/// Matches when a text value fully matches a regular expression.
///
/// The text is either the string at a source path (see
/// [`PathCondition`](super::PathCondition) for path syntax) or, without a
/// source, the whole payload in text form.
#[derive(Debug, Clone)]
pub struct PatternCondition {
    pattern: String,
    regex: Regex,
    source: Option<String>,
}

impl PatternCondition {
    /// Compiles a pattern that is matched against the payload text.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&format!("^(?:{pattern})$"))?,
            source: None,
        })
    }

    /// Matches against the value at `path` instead of the payload.
    #[must_use]
    pub fn on(mut self, path: impl Into<String>) -> Self {
        self.source = Some(path.into());
        self
    }

    fn text(&self, ctx: &MediationContext) -> Result<Option<String>, String> {
        match &self.source {
            None => ctx
                .payload()
                .as_text()
                .map(Some)
                .ok_or_else(|| "payload has no text form".to_string()),
            Some(path) => Ok(select(ctx, path)?.map(|value| match value {
                Value::String(s) => s,
                other => other.to_string(),
            })),
        }
    }
}

impl Condition for PatternCondition {
    fn describe(&self) -> String {
        match &self.source {
            Some(path) => format!("{path} =~ /{}/", self.pattern),
            None => format!("payload =~ /{}/", self.pattern),
        }
    }

    fn evaluate(&self, ctx: &MediationContext) -> Result<bool, ConditionEvaluationError> {
        let text = self
            .text(ctx)
            .map_err(|message| ConditionEvaluationError::new(self.describe(), message))?;
        Ok(text.is_some_and(|t| self.regex.is_match(&t)))
    }
}
