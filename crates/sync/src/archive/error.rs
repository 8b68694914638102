//! Error types for the [`archive`](super) module.

use derive_more::{Display, Error};

/// An archival error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archival operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies an archival failure by the step that failed.
///
/// ### Inconsistencies
/// The version store and the object store disagree; logged at error level
/// and left for an operator.
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::AlreadyArchived`]
/// - [`ErrorKind::Stamp`]
///
/// ### Operational Errors
/// Nothing was stamped; the next cycle tries again.
/// - [`ErrorKind::Versions`]
/// - [`ErrorKind::Read`]
/// - [`ErrorKind::Relocate`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("no previous unarchived version {_1} found for {_0}")]
    NotFound(#[error(not(source))] String, u32),
    #[display("version {_1} of {_0} is already archived")]
    AlreadyArchived(#[error(not(source))] String, u32),
    /// Looking up the version record failed.
    #[display("version store lookup failed")]
    Versions,
    /// The live object could not be read for hashing.
    #[display("reading the live object failed")]
    Read,
    /// Neither the copy nor the bulk move put the bytes at the archive key.
    #[display("relocating the live object to archive/{_0} failed")]
    Relocate(#[error(not(source))] String),
    /// The bytes were relocated but the record was not stamped.
    #[display("archived bytes under {_0} but could not stamp the version record")]
    Stamp(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Versions | Self::Read | Self::Relocate(_))
    }

    /// Returns `true` when the stores disagree with each other.
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, Self::NotFound(..) | Self::AlreadyArchived(..) | Self::Stamp(_))
    }
}
