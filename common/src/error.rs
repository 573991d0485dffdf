//! Error handling for the Floe runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime error type shared across the workspace.
///
/// Block I/O failures keep their underlying cause as a source so that callers
/// deciding between retry and abort can still log the full chain.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Block write failed: {message}")]
    BlockWrite {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Block fetch failed: {message}")]
    BlockFetch {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Invalid state transition: {message}")]
    InvalidState { message: String },

    #[error("Malformed physical plan: {message}")]
    Plan { message: String },

    #[error("IO operation failed: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    /// Create a block write error with a custom message.
    pub fn block_write<S: Into<String>>(message: S) -> Self {
        Self::BlockWrite {
            message: message.into(),
            source: None,
        }
    }

    /// Create a block write error with a custom message and source error.
    pub fn block_write_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::BlockWrite {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a block fetch error with a custom message.
    pub fn block_fetch<S: Into<String>>(message: S) -> Self {
        Self::BlockFetch {
            message: message.into(),
            source: None,
        }
    }

    /// Create a block fetch error with a custom message and source error.
    pub fn block_fetch_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::BlockFetch {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an invalid state error with a custom message.
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a plan error with a custom message.
    pub fn plan<S: Into<String>>(message: S) -> Self {
        Self::Plan {
            message: message.into(),
        }
    }

    /// Create an IO error with a custom message and source error.
    pub fn io_with_source<S: Into<String>, E: Into<anyhow::Error>>(message: S, source: E) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The task-group failure cause this error maps to: block fetch errors
    /// are input-read failures, block write errors are output-write
    /// failures, everything else is unrecoverable.
    pub fn failure_cause(&self) -> TaskGroupFailureCause {
        match self {
            RuntimeError::BlockFetch { .. } => TaskGroupFailureCause::InputReadFailure,
            RuntimeError::BlockWrite { .. } => TaskGroupFailureCause::OutputWriteFailure,
            _ => TaskGroupFailureCause::Unrecoverable,
        }
    }
}

/// Cause attached to a recoverable task-group failure.
///
/// The scheduler resubmits recoverable causes up to the configured retry
/// bound; `Unrecoverable` fails the job immediately. `ContainerFailure` is
/// the cause attached when a whole executor is lost and its running task
/// groups are resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskGroupFailureCause {
    InputReadFailure,
    OutputWriteFailure,
    ContainerFailure,
    Unrecoverable,
}

impl TaskGroupFailureCause {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TaskGroupFailureCause::Unrecoverable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::error::Error;

    #[test]
    fn test_error_creation() {
        let write_error = RuntimeError::block_write("append failed");
        assert!(matches!(write_error, RuntimeError::BlockWrite { .. }));

        let fetch_error =
            RuntimeError::block_fetch_with_source("seek failed", anyhow!("disk unplugged"));
        assert!(matches!(fetch_error, RuntimeError::BlockFetch { .. }));
        assert!(fetch_error.source().is_some());
    }

    #[test]
    fn test_error_display_includes_message() {
        let err = RuntimeError::invalid_state("commit after commit");
        assert!(format!("{}", err).contains("commit after commit"));
    }

    #[test]
    fn test_errors_map_to_failure_causes() {
        assert_eq!(
            RuntimeError::block_fetch("gone").failure_cause(),
            TaskGroupFailureCause::InputReadFailure
        );
        assert_eq!(
            RuntimeError::block_write("full").failure_cause(),
            TaskGroupFailureCause::OutputWriteFailure
        );
        assert_eq!(
            RuntimeError::invalid_state("bad").failure_cause(),
            TaskGroupFailureCause::Unrecoverable
        );
    }

    #[test]
    fn test_failure_cause_recoverability() {
        assert!(TaskGroupFailureCause::InputReadFailure.is_recoverable());
        assert!(TaskGroupFailureCause::OutputWriteFailure.is_recoverable());
        assert!(TaskGroupFailureCause::ContainerFailure.is_recoverable());
        assert!(!TaskGroupFailureCause::Unrecoverable.is_recoverable());
    }
}
