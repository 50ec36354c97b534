//! Testing utilities for mediation pipelines.
//!
//! This module provides:
//! - Recording and fixed-result mediators with a shared trace
//! - A recording transport and continuation continuations
//! - Counting and blocking work handlers for pool tests
//! - Ready-made environments and outcome assertions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_completed, assert_failed_with, assert_suspended, assert_terminated};
pub use fixtures::{test_env, test_env_with_events, test_env_with_transport};
pub use mocks::{
    BlockingHandler, CountingHandler, FailingMediator, FixedMediator, MediationTrace, ScriptedContinuation,
    ResumeLog, RecordingMediator, RecordingTransport,
};
