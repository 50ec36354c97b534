//! Leaf mediators that ship with the core.

use super::Mediator;
use crate::conditions::select;
use crate::context::MediationContext;
use crate::engine::MediationEnvironment;
use crate::errors::{BusflowError, MediationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{debug, info, trace, warn};

/// Level used by [`LogMediator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
}

/// Logs the message and continues.
#[derive(Debug, Clone)]
pub struct LogMediator {
    name: String,
    level: LogLevel,
    include_payload: bool,
}

impl Default for LogMediator {
    fn default() -> Self {
        Self::new()
    }
}

impl LogMediator {
    /// Creates an info-level log mediator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "log".to_string(),
            level: LogLevel::Info,
            include_payload: false,
        }
    }

    /// Sets the name, also used as the log label.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the level.
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Includes the payload text in the log line.
    #[must_use]
    pub fn with_payload(mut self) -> Self {
        self.include_payload = true;
        self
    }
}

#[async_trait]
impl Mediator for LogMediator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        _env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        let destination = ctx.destination().map(ToString::to_string).unwrap_or_default();
        let properties = serde_json::to_string(ctx.properties()).unwrap_or_default();
        let payload = if self.include_payload {
            ctx.payload().as_text().unwrap_or_default()
        } else {
            String::new()
        };

        macro_rules! log_at {
            ($mac:ident) => {
                $mac!(
                    label = %self.name,
                    message_id = %ctx.message_id(),
                    destination = %destination,
                    response = ctx.is_response(),
                    properties = %properties,
                    payload = %payload,
                    "Mediating message"
                )
            };
        }

        match self.level {
            LogLevel::Trace => log_at!(trace),
            LogLevel::Debug => log_at!(debug),
            LogLevel::Info => log_at!(info),
            LogLevel::Warn => log_at!(warn),
        }
        Ok(true)
    }
}

/// What a [`PropertyMediator`] does.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyAction {
    /// Sets a constant value.
    Set(serde_json::Value),
    /// Copies the value found at a path (see `PathCondition` for syntax).
    /// A path that selects nothing removes the property.
    SetFromPath(String),
    /// Removes the property.
    Remove,
}

/// Sets or removes one property and continues.
#[derive(Debug, Clone)]
pub struct PropertyMediator {
    key: String,
    action: PropertyAction,
}

impl PropertyMediator {
    /// Sets `key` to a constant.
    #[must_use]
    pub fn set(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            action: PropertyAction::Set(value.into()),
        }
    }

    /// Sets `key` from the value at `path`.
    #[must_use]
    pub fn set_from(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            action: PropertyAction::SetFromPath(path.into()),
        }
    }

    /// Removes `key`.
    #[must_use]
    pub fn remove(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            action: PropertyAction::Remove,
        }
    }
}

#[async_trait]
impl Mediator for PropertyMediator {
    fn name(&self) -> &str {
        &self.key
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        _env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        match &self.action {
            PropertyAction::Set(value) => {
                ctx.set_property(self.key.clone(), value.clone());
            }
            PropertyAction::SetFromPath(path) => {
                let value = select(ctx, path)
                    .map_err(|message| MediationError::new(&self.key, message))?;
                match value {
                    Some(value) => ctx.set_property(self.key.clone(), value),
                    None => {
                        ctx.properties_mut().remove(&self.key);
                    }
                }
            }
            PropertyAction::Remove => {
                ctx.properties_mut().remove(&self.key);
            }
        }
        Ok(true)
    }
}

/// Marks the message terminated and stops mediation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropMediator;

#[async_trait]
impl Mediator for DropMediator {
    fn name(&self) -> &str {
        "drop"
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        _env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        debug!(message_id = %ctx.message_id(), "Dropping message");
        ctx.terminate();
        Ok(false)
    }
}

/// A simple function-based mediator.
pub struct FnMediator<F>
where
    F: Fn(&mut MediationContext) -> Result<bool, BusflowError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnMediator<F>
where
    F: Fn(&mut MediationContext) -> Result<bool, BusflowError> + Send + Sync,
{
    /// Creates a new function-based mediator.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnMediator<F>
where
    F: Fn(&mut MediationContext) -> Result<bool, BusflowError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMediator").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Mediator for FnMediator<F>
where
    F: Fn(&mut MediationContext) -> Result<bool, BusflowError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        _env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        (self.func)(ctx)
    }
}
