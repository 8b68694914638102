use crate::VersionRecord;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn VersionStore + Send + Sync>;

/// Version bookkeeping consumed by change detection and archival.
///
/// Paths are absolute remote paths (`/pub/data/a.nc`). Version numbers start
/// at 1; "no version" is expressed as `None`, never as a sentinel.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Highest version number recorded for `path`.
    ///
    /// With `include_archived = false` only the live (unarchived) record is
    /// considered.
    async fn latest_version(&self, path: &str, include_archived: bool) -> Result<Option<u32>>;

    /// Most recent non-null modification time recorded for `path`, or an
    /// empty string when there is none. "No rows" is not an error.
    async fn record_mod_time(&self, path: &str) -> Result<String>;

    /// Append the next version for `path` and return its number.
    ///
    /// An empty `mod_time` is stored as NULL.
    async fn append_version(&self, path: &str, mod_time: &str) -> Result<u32>;

    /// Stamp the live record `(path, version)` with the key its bytes were
    /// archived under.
    ///
    /// # Errors
    /// - [`NotFound`](crate::error::ErrorKind::NotFound) when no such record exists.
    /// - [`AlreadyArchived`](crate::error::ErrorKind::AlreadyArchived) when it
    ///   already carries a key.
    async fn mark_archived(&self, archive_key: &str, path: &str, version: u32) -> Result<()>;

    async fn get(&self, path: &str, version: u32) -> Result<Option<VersionRecord>>;

    /// Every version of `path`, oldest first.
    async fn history(&self, path: &str) -> Result<Vec<VersionRecord>>;

    /// The newest record of every path at or below `prefix` (all paths when
    /// `None`), ordered by path. Prefix matching is component-based.
    async fn latest_per_path(&self, prefix: Option<&str>) -> Result<Vec<VersionRecord>>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<()>;
}
