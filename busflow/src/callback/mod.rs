//! Callback correlation.
//!
//! When a mediator dispatches an outbound call it suspends the message and
//! registers a [`Continuation`] under a correlation key. The continuation is
//! resumed by whichever task delivers the response through
//! [`CallbackStore::resolve`], or with a timeout error by
//! [`CallbackStore::sweep`]. Each key is resolved at most once.

mod continuation;
mod store;
mod sweeper;

pub use continuation::{Continuation, PipelineContinuation};
pub use store::{CallbackStore, PendingCallbackInfo, Resolution};
pub use sweeper::CallbackSweeper;
