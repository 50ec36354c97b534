//! The message carrier threaded through the pipeline.
//!
//! This module provides:
//! - `MediationContext`, one per inbound message
//! - `Payload`, the opaque body
//! - `PropertyMap`, the mutable message properties

mod message;
mod payload;
mod properties;

pub use message::{ContextState, Destination, MediationContext};
pub use payload::Payload;
pub use properties::PropertyMap;
