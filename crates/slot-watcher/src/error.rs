//! Unified error type for the watcher.
//!
//! Variants follow the failure taxonomy of a check cycle: target-scoped
//! scrape failures, notification delivery failures, persistence failures and
//! configuration errors. Only persistence failures abort a cycle; everything
//! else is reduced to a logged outcome at the boundary of its unit of work.

use shared_types::TargetId;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// A slot source failed to produce data for one target
    #[error("{target}: {reason}")]
    Target { target: TargetId, reason: String },

    /// A slot source call ran past its deadline
    #[error("{target}: timed out after {after:?}")]
    Timeout { target: TargetId, after: Duration },

    /// A notification could not be delivered
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The state store could not be read or written
    #[error("State store error at {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// Malformed or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WatchError {
    pub fn target(target: &TargetId, reason: impl Into<String>) -> Self {
        WatchError::Target {
            target: target.clone(),
            reason: reason.into(),
        }
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        WatchError::Delivery(message.into())
    }

    pub fn persistence(path: &Path, reason: impl ToString) -> Self {
        WatchError::Persistence {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        WatchError::Config(message.into())
    }

    /// Errors that only affect a single target and can be isolated
    pub fn is_target_scoped(&self) -> bool {
        matches!(self, WatchError::Target { .. } | WatchError::Timeout { .. })
    }

    /// Target this error belongs to, if it is target-scoped
    pub fn failed_target(&self) -> Option<&TargetId> {
        match self {
            WatchError::Target { target, .. } | WatchError::Timeout { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl From<shared_types::ParseError> for WatchError {
    fn from(err: shared_types::ParseError) -> Self {
        WatchError::Config(err.to_string())
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
