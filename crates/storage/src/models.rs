//! Storage models.

use std::path::PathBuf;
use time::OffsetDateTime;

/// Object metadata returned by storage backends.
///
/// Used for prefix listings (previous-state construction) and for head
/// requests deciding between in-service copies and bulk moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Object key, relative to the backend root
    pub path: PathBuf,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp as reported by the backend
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        Self {
            path: path.into(),
            size,
            modified: modified.into(),
        }
    }

    /// Zero-byte objects are treated as non-existent by change detection.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
