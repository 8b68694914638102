//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A remote access error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote server did not answer.
    #[display("remote {_0} is unreachable")]
    Unreachable(#[error(not(source))] String),
    /// The program is not installed or not on `PATH`.
    #[display("command not found: {_0}")]
    CommandNotFound(#[error(not(source))] String),
    /// The program was found but could not be started.
    #[display("failed to run {_0}")]
    Spawn(#[error(not(source))] String),
    #[display("listing remote directory {_0} failed")]
    Listing(#[error(not(source))] String),
    #[display("fetching remote file {_0} failed")]
    Fetch(#[error(not(source))] String),
    /// The dry-run scan exited unsuccessfully.
    #[display("filtered scan of {_0} exited with code {_1}")]
    Scan(#[error(not(source))] String, i32),
    /// A data line of the dry-run scan did not look like itemized output.
    #[display("unexpected scan output line: {_0:?}")]
    Parse(#[error(not(source))] String),
    /// The local staging area could not be prepared.
    #[display("local staging error")]
    Staging,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Listing(_) | Self::Fetch(_) | Self::Scan(..))
    }
}
