//! Mediator trait and implementations.
//!
//! Mediators are the nodes of the pipeline tree. Each returns `Ok(true)` to
//! let mediation continue with the next sibling and `Ok(false)` to stop
//! mediation of the message. Trees are assembled by the caller and assumed
//! acyclic.

mod builtin;
mod dynamic;
mod filter;
mod send;
mod sequence;
mod store;
mod switch;

pub use builtin::{DropMediator, FnMediator, LogLevel, LogMediator, PropertyAction, PropertyMediator};
pub use dynamic::{DynamicMediator, MediatorFactory, MediatorRegistry};
pub use filter::Filter;
pub use send::SendAsyncMediator;
pub use sequence::{Sequence, SequenceReference, SequenceRegistry};
pub use store::StoreMediator;
pub use switch::{Case, ExactlyOne};

use crate::context::MediationContext;
use crate::engine::MediationEnvironment;
use crate::errors::BusflowError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// A pipeline node that inspects, transforms or routes a message.
#[async_trait]
pub trait Mediator: Send + Sync + Debug {
    /// Returns the name of the mediator, used in logs and errors.
    fn name(&self) -> &str;

    /// Mediates the message.
    ///
    /// # Returns
    ///
    /// `Ok(true)` to continue, `Ok(false)` to stop mediation of this message.
    /// An error aborts mediation of this message only.
    async fn mediate(
        &self,
        ctx: &mut MediationContext,
        env: &MediationEnvironment,
    ) -> Result<bool, BusflowError>;
}

/// Shared handle to a mediator.
pub type MediatorRef = Arc<dyn Mediator>;

