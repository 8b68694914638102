//! Error types for the [`detect`](super) module.

use derive_more::{Display, Error};

/// A detection error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for detection operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a detection failure.
///
/// ### Previous State
/// - [`ErrorKind::Storage`]
///
/// ### Current State
/// - [`ErrorKind::Scan`]
/// - [`ErrorKind::Connect`]
/// - [`ErrorKind::Listing`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Listing the folder's live objects failed.
    #[display("listing the object store failed")]
    Storage,
    /// The filtered scan failed or produced output that could not be parsed.
    #[display("filtered scan failed")]
    Scan,
    /// The remote could not be connected to.
    #[display("connecting to the remote failed")]
    Connect,
    /// Listing a remote directory failed.
    #[display("listing remote directory {_0} failed")]
    Listing(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect | Self::Listing(_))
    }
}
