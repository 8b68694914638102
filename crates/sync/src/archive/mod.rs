//! Content-addressed archival of superseded versions.
//!
//! Before a live object is overwritten or deleted, its bytes are moved to
//! `archive/<key>`, where the key is the BLAKE3 digest of the path, the
//! version number and the content. The same bytes of the same version
//! always land at the same key, so re-archiving after a partial failure
//! overwrites identical data instead of piling up copies.
//!
//! Archival happens in three steps, and nothing is mutated until the first
//! two have succeeded:
//!
//! 1. hash the live object, streamed chunk by chunk;
//! 2. relocate it: an in-service copy below the large object threshold, the
//!    external bulk-move command at or above it;
//! 3. stamp the key onto the version record.

pub mod error;

use crate::archive::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::TryStreamExt;
use hoard_remote::RunnerHandle;
use hoard_storage::{BackendHandle, archive_key_path, key_for_remote};
use hoard_versions::StoreHandle;
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};

/// Largest object S3 copies in a single request (5 GiB).
pub const DEFAULT_LARGE_OBJECT_THRESHOLD: u64 = 5 * 1024 * 1024 * 1024;
/// Bulk-move command used unless configured otherwise.
pub const DEFAULT_BULK_MOVE: [&str; 3] = ["aws", "s3", "mv"];

/// Moves superseded live objects into the archive and stamps their records.
#[derive(Clone)]
pub struct Archiver {
    storage: BackendHandle,
    versions: StoreHandle,
    runner: RunnerHandle,
    threshold: u64,
    bulk_move: Vec<String>,
}

impl Archiver {
    pub fn new(storage: BackendHandle, versions: StoreHandle, runner: RunnerHandle) -> Self {
        Self {
            storage,
            versions,
            runner,
            threshold: DEFAULT_LARGE_OBJECT_THRESHOLD,
            bulk_move: DEFAULT_BULK_MOVE.map(String::from).to_vec(),
        }
    }

    /// Objects of at least `threshold` bytes are relocated with the bulk-move
    /// command instead of an in-service copy.
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Program and leading arguments of the bulk-move command; the source
    /// and destination locations are appended.
    pub fn with_bulk_move(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.bulk_move = command.into_iter().map(Into::into).collect();
        self
    }

    /// Archive the live `version` of `path`, returning its archive key.
    ///
    /// # Errors
    /// - [`NotFound`](ErrorKind::NotFound) or
    ///   [`AlreadyArchived`](ErrorKind::AlreadyArchived) when the record is
    ///   missing or already stamped; nothing is touched.
    /// - [`Read`](ErrorKind::Read) when hashing fails; nothing is touched.
    /// - [`Relocate`](ErrorKind::Relocate) when the bytes could not be moved;
    ///   the record stays live.
    /// - [`Stamp`](ErrorKind::Stamp) when the bytes were moved but the record
    ///   could not be updated.
    #[instrument(skip(self))]
    pub async fn archive(&self, path: &str, version: u32) -> Result<String> {
        match self.versions.get(path, version).await.or_raise(|| ErrorKind::Versions)? {
            None => exn::bail!(ErrorKind::NotFound(path.to_string(), version)),
            Some(record) if !record.is_live() => exn::bail!(ErrorKind::AlreadyArchived(path.to_string(), version)),
            Some(_) => {},
        }
        let live = key_for_remote(path).or_raise(|| ErrorKind::Read)?;
        let key = self.content_key(path, version, &live).await?;
        self.relocate(&live, &key).await?;
        self.versions
            .mark_archived(&key, path, version)
            .await
            .inspect_err(|e| error!(path, version, %key, error = ?e, "archived bytes but the version record is still live"))
            .or_raise(|| ErrorKind::Stamp(key.clone()))?;
        info!(path, version, %key, "archived version");
        Ok(key)
    }

    async fn content_key(&self, path: &str, version: u32, live: &Path) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{path} -- Version {version} -- ").as_bytes());
        let mut chunks = self.storage.read_stream(live);
        while let Some(chunk) = chunks.try_next().await.or_raise(|| ErrorKind::Read)? {
            hasher.update(&chunk);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    async fn relocate(&self, live: &Path, key: &str) -> Result<()> {
        let destination = archive_key_path(key);
        let size = self.storage.stat(live).await.or_raise(|| ErrorKind::Relocate(key.to_string()))?.size;
        if size < self.threshold {
            debug!(live = %live.display(), size, "copying to archive");
            self.storage.copy(live, &destination).await.or_raise(|| ErrorKind::Relocate(key.to_string()))?;
            return Ok(());
        }
        let Some((program, leading)) = self.bulk_move.split_first() else {
            exn::bail!(ErrorKind::Relocate(key.to_string()));
        };
        let mut args = leading.to_vec();
        args.push(self.storage.locate(live).or_raise(|| ErrorKind::Relocate(key.to_string()))?);
        args.push(self.storage.locate(&destination).or_raise(|| ErrorKind::Relocate(key.to_string()))?);
        debug!(live = %live.display(), size, program, "moving large object to archive");
        let output = self.runner.run(program, &args).await.or_raise(|| ErrorKind::Relocate(key.to_string()))?;
        if !output.success() {
            warn!(program, code = output.code_or_signal(), stderr = %output.stderr.trim(), "bulk move failed");
            exn::bail!(ErrorKind::Relocate(key.to_string()));
        }
        Ok(())
    }
}
