//! Errors raised by object store backends.
//!
//! Every backend maps its native failures onto [`ErrorKind`], so callers can
//! decide between retrying, skipping and giving up without knowing which
//! store they are talking to.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No object under this key.
    #[display("no object at {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The store refused the credentials or the key's permissions.
    #[display("access to {} denied", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    #[display("filesystem error: {_0}")]
    Io(IoError),
    /// The store could not be reached.
    #[display("object store unreachable: {_0}")]
    Network(#[error(not(source))] String),
    /// Key would escape the store root, or is otherwise malformed.
    #[display("invalid object key: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Remote path whose key would land in the archive namespace.
    #[display("{} is reserved for archived objects", _0.display())]
    Reserved(#[error(not(source))] PathBuf),
    /// Any other failure reported by the store's API.
    #[display("object store error: {_0}")]
    Backend(#[error(not(source))] String),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Transient failures; the same call may succeed next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::Backend(_))
    }

    /// Deleting an object that is already gone counts as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
