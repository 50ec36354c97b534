//! Late-bound mediators constructed by logical type name.

use super::Mediator;
use crate::context::MediationContext;
use crate::engine::MediationEnvironment;
use crate::errors::{BusflowError, MediationError};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Constructs a fresh mediator instance.
pub type MediatorFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Mediator>> + Send + Sync>;

/// Registry mapping logical type names to factories.
#[derive(Default)]
pub struct MediatorRegistry {
    factories: RwLock<HashMap<String, MediatorFactory>>,
}

impl std::fmt::Debug for MediatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediatorRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

impl MediatorRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the same name.
    pub fn register<F>(&self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> anyhow::Result<Box<dyn Mediator>> + Send + Sync + 'static,
    {
        self.factories.write().insert(type_name.into(), Arc::new(factory));
    }

    /// Removes a factory.
    pub fn unregister(&self, type_name: &str) -> bool {
        self.factories.write().remove(type_name).is_some()
    }

    /// Checks if a factory is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.read().contains_key(type_name)
    }

    /// Lists registered type names.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Constructs a fresh instance of `type_name`.
    ///
    /// The factory runs outside the registry lock. Unknown names, factory
    /// errors and factory panics all become a [`MediationError`].
    pub fn create(&self, type_name: &str) -> Result<Box<dyn Mediator>, MediationError> {
        let factory = self
            .factories
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| MediationError::new(type_name, "no factory registered"))?;

        match std::panic::catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(err)) => Err(MediationError::new(
                type_name,
                format!("construction failed: {err:#}"),
            )),
            Err(_) => Err(MediationError::new(type_name, "factory panicked")),
        }
    }
}

/// Holds a logical type name and builds a new instance on every invocation.
///
/// Both construction and mediation failures are reported as a
/// [`MediationError`] naming the type.
#[derive(Debug, Clone)]
pub struct DynamicMediator {
    type_name: String,
}

impl DynamicMediator {
    /// Creates a dynamic mediator for `type_name`.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

#[async_trait]
impl Mediator for DynamicMediator {
    fn name(&self) -> &str {
        &self.type_name
    }

    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        env: &MediationEnvironment,
    ) -> Result<bool, BusflowError> {
        let instance = env.mediators().create(&self.type_name).map_err(|err| {
            error!(
                type_name = %self.type_name,
                message_id = %ctx.message_id(),
                error = %err,
                "Dynamic mediator construction failed"
            );
            err
        })?;
        debug!(type_name = %self.type_name, instance = %instance.name(), "Dynamic mediator constructed");

        let outcome = AssertUnwindSafe(instance.mediate(ctx, env)).catch_unwind().await;
        match outcome {
            Ok(Ok(proceed)) => Ok(proceed),
            Ok(Err(err)) => Err(MediationError::new(&self.type_name, err.to_string()).into()),
            Err(_) => Err(MediationError::new(&self.type_name, "mediator panicked").into()),
        }
    }
}
