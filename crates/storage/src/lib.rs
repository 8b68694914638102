//! Object store backends for the mirror.
//!
//! Live objects are addressed by their remote path (without the leading
//! slash) and archived objects by their archive key under the
//! [`ARCHIVE_PREFIX`] namespace. Backends only deal in keys; the meaning of
//! a key belongs to the sync pipeline.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::{ARCHIVE_PREFIX, archive_key_path, key_for_remote, remote_for_key, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
