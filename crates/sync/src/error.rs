//! Sync Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Each pipeline stage has its own
//! error module; errors leaving a stage are raised into one of these kinds,
//! which name the folder or path that was being worked on.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Change detection for a folder failed; nothing was mutated.
    #[display("change detection failed for folder {_0}")]
    Detect(#[error(not(source))] String),
    /// Executing the change for a single path failed.
    #[display("applying {_1} change to {_0} failed")]
    Execute(#[error(not(source))] String, crate::Action),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Every failure is retried by the next cycle anyway; within a cycle
    /// nothing is.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// The folder or path the failure belongs to.
    pub fn subject(&self) -> &str {
        match self {
            Self::Detect(folder) => folder,
            Self::Execute(path, _) => path,
        }
    }
}
