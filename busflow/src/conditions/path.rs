//! Structural path conditions.
//!
//! Paths are RFC 6901 JSON pointers applied to the payload, or to a property
//! when prefixed with `$prop/<name>`:
//!
//! - `/order/id` selects `id` inside `order` in a JSON payload
//! - `$prop/tenant` selects the `tenant` property
//! - `$prop/route/0` selects the first element of the `route` property

use super::Condition;
use crate::context::{MediationContext, Payload};
use crate::errors::ConditionEvaluationError;
use serde_json::Value;

const PROPERTY_PREFIX: &str = "$prop/";

/// What a [`PathCondition`] checks at the selected location.
#[derive(Debug, Clone, PartialEq)]
pub enum PathCheck {
    /// Something is present at the path.
    Exists,
    /// The value at the path equals this value.
    Equals(Value),
}

/// Matches on the value found at a path.
#[derive(Debug, Clone)]
pub struct PathCondition {
    path: String,
    check: PathCheck,
}

impl PathCondition {
    /// Matches when the path selects a value.
    #[must_use]
    pub fn exists(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            check: PathCheck::Exists,
        }
    }

    /// Matches when the path selects a value equal to `expected`.
    #[must_use]
    pub fn equals(path: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            check: PathCheck::Equals(expected.into()),
        }
    }

    /// Returns the path expression.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Condition for PathCondition {
    fn describe(&self) -> String {
        match &self.check {
            PathCheck::Exists => format!("exists({})", self.path),
            PathCheck::Equals(v) => format!("{} == {v}", self.path),
        }
    }

    fn evaluate(&self, ctx: &MediationContext) -> Result<bool, ConditionEvaluationError> {
        let found = select(ctx, &self.path)
            .map_err(|message| ConditionEvaluationError::new(self.describe(), message))?;

        Ok(match (&self.check, found) {
            (_, None) => false,
            (PathCheck::Exists, Some(_)) => true,
            (PathCheck::Equals(expected), Some(actual)) => &actual == expected,
        })
    }
}

/// Resolves `path` against the context.
///
/// `Ok(None)` means the document has the right shape but nothing is at the
/// path. `Err` means the path cannot be applied at all.
pub(crate) fn select(ctx: &MediationContext, path: &str) -> Result<Option<Value>, String> {
    if let Some(rest) = path.strip_prefix(PROPERTY_PREFIX) {
        let (name, pointer) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if name.is_empty() {
            return Err("empty property name".to_string());
        }
        return Ok(ctx
            .property(name)
            .and_then(|value| value.pointer(pointer))
            .cloned());
    }

    if !path.is_empty() && !path.starts_with('/') {
        return Err(format!("'{path}' is not a JSON pointer"));
    }

    match ctx.payload() {
        Payload::Json(doc) => Ok(doc.pointer(path).cloned()),
        Payload::Bytes(bytes) => {
            let doc: Value = serde_json::from_slice(bytes)
                .map_err(|e| format!("payload is not structured: {e}"))?;
            Ok(doc.pointer(path).cloned())
        }
        Payload::Empty => Err("payload is empty".to_string()),
    }
}
