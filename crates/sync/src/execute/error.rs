//! Error types for the [`execute`](super) module.

use derive_more::{Display, Error};

/// An execution error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for execution operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The step of a path's execution that failed.
///
/// Whatever completed before the failing step stays done; there is no
/// rollback across steps.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote path has no valid object key.
    #[display("path cannot be stored")]
    InvalidPath,
    /// Fetching into the staging area failed; nothing was mutated.
    #[display("fetching from the remote failed")]
    Fetch,
    /// A version store lookup failed.
    #[display("version store lookup failed")]
    Versions,
    /// The path is in the mirror but has no live version record.
    #[display("no live version recorded for {_0}")]
    MissingLiveVersion(#[error(not(source))] String),
    /// Archiving the superseded version failed.
    #[display("archiving the live version failed")]
    Archive,
    /// Deleting the live object failed.
    #[display("deleting the live object failed")]
    Delete,
    /// Uploading the staged copy failed.
    #[display("uploading the staged copy failed")]
    Upload,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch | Self::Versions | Self::Delete | Self::Upload)
    }

    pub fn is_inconsistency(&self) -> bool {
        matches!(self, Self::MissingLiveVersion(_))
    }
}
