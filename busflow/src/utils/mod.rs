//! Utility functions for identifier generation and timestamp handling.

pub mod timestamps;
mod uuid_utils;

pub use timestamps::{from_millis, now_utc, to_millis, Timestamp};
pub use uuid_utils::{generate_correlation_key, generate_message_id};
