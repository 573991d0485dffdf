//! Shared types for the Floe dataflow runtime.
//!
//! This crate holds the vocabulary used on both sides of the driver/executor
//! boundary: the common error type, runtime configuration, and the hash-key
//! ranges that shuffle distributions are expressed in.

pub mod config;
pub mod error;
pub mod key_range;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError, TaskGroupFailureCause};
pub use key_range::{bucket_of, HashRange};
