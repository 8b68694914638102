//! Version Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A version store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for version store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The database could not be reached or rejected a statement.
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// No record exists for the requested path and version.
    #[display("no version {_1} recorded for {_0}")]
    NotFound(#[error(not(source))] String, u32),
    /// The record already carries an archive key.
    #[display("version {_1} of {_0} is already archived")]
    AlreadyArchived(#[error(not(source))] String, u32),
    /// A different record already claims this archive key.
    #[display("archive key {_0} is already in use")]
    KeyCollision(#[error(not(source))] String),
    /// Stored data could not be converted into a model.
    #[display("invalid version data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }

    /// Returns `true` when the stored history disagrees with what the caller
    /// expected. Retrying the same call will fail the same way.
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, Self::NotFound(..) | Self::AlreadyArchived(..) | Self::KeyCollision(_))
    }
}
