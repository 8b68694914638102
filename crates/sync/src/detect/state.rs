use crate::detect::changes::{ChangeSet, FileState, Snapshot, detect};
use crate::detect::error::{ErrorKind, Result as DetectResult};
use crate::error::{ErrorKind as SyncErrorKind, Result as SyncResult};
use exn::ResultExt;
use futures::TryStreamExt;
use hoard_remote::{FilteredScan, RemoteHandle, ScanResult, SyncFolder};
use hoard_storage::{ARCHIVE_PREFIX, BackendHandle, key_for_remote, remote_for_key};
use hoard_versions::StoreHandle;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Outcome of detecting one folder.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub changes: ChangeSet,
    /// The remote's current state; recording takes each new version's
    /// modification time from here.
    pub current: Snapshot,
}

/// Builds both snapshots of a folder and compares them.
#[derive(Clone)]
pub struct Detector {
    remote: RemoteHandle,
    scanner: FilteredScan,
    storage: BackendHandle,
    versions: StoreHandle,
}

impl Detector {
    pub fn new(remote: RemoteHandle, scanner: FilteredScan, storage: BackendHandle, versions: StoreHandle) -> Self {
        Self {
            remote,
            scanner,
            storage,
            versions,
        }
    }

    /// Detect what changed in `folder` since the last cycle.
    ///
    /// # Errors
    /// Returns [`Exn<SyncErrorKind::Detect>`](SyncErrorKind::Detect) raised
    /// from an inner [`Exn<ErrorKind>`](ErrorKind). Nothing has been mutated
    /// when detection fails.
    #[instrument(skip(self), fields(folder = %folder.source))]
    pub async fn detect_folder(&self, folder: &SyncFolder) -> SyncResult<Detection> {
        self.detect_folder_inner(folder).await.or_raise(|| SyncErrorKind::Detect(folder.source.clone()))
    }

    async fn detect_folder_inner(&self, folder: &SyncFolder) -> DetectResult<Detection> {
        let previous = self.previous_state(folder).await?;
        let current = self.current_state(folder).await?;
        let changes = detect(&previous, &current);
        debug!(
            previous = previous.len(),
            current = current.len(),
            new = changes.new.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "folder detection complete"
        );
        Ok(Detection { changes, current })
    }

    /// What the mirror holds for `folder`: every non-empty live object, with
    /// the modification time recorded for its path.
    ///
    /// Zero-byte objects are left out so that a file that gains content is
    /// treated as new. A failed modification time lookup degrades to the
    /// empty string.
    pub async fn previous_state(&self, folder: &SyncFolder) -> DetectResult<Snapshot> {
        let prefix = folder_prefix(folder)?;
        let archive = Path::new(ARCHIVE_PREFIX);
        let mut objects = self.storage.list_stream(prefix.as_deref());
        let mut snapshot = Snapshot::new();
        while let Some(info) = objects.try_next().await.or_raise(|| ErrorKind::Storage)? {
            if info.path.starts_with(archive) || info.is_empty() {
                continue;
            }
            let Some(path) = remote_for_key(&info.path) else {
                debug!(key = %info.path.display(), "skipping object that cannot be a remote path");
                continue;
            };
            let mod_time = match self.versions.record_mod_time(&path).await {
                Ok(mod_time) => mod_time,
                Err(e) => {
                    warn!(%path, error = ?e, "could not look up recorded modification time");
                    String::new()
                },
            };
            snapshot.insert(path.clone(), FileState::new(path, mod_time, info.size));
        }
        Ok(snapshot)
    }

    /// What the remote holds for `folder`, restricted to the files that
    /// survive its filter rules.
    ///
    /// The remote is connected for the duration of the directory listings
    /// and disconnected afterwards whether or not they succeeded. Remote
    /// files under `/archive` are left out: their live keys would land in
    /// the archive namespace.
    pub async fn current_state(&self, folder: &SyncFolder) -> DetectResult<Snapshot> {
        let scan = self.scanner.scan(folder).await.or_raise(|| ErrorKind::Scan)?;
        self.remote.connect().await.or_raise(|| ErrorKind::Connect)?;
        let listed = self.list_scanned(&scan).await;
        if let Err(e) = self.remote.disconnect().await {
            warn!(remote = self.remote.name(), error = ?e, "disconnecting from the remote failed");
        }
        listed
    }

    async fn list_scanned(&self, scan: &ScanResult) -> DetectResult<Snapshot> {
        let mut snapshot = Snapshot::new();
        for directory in &scan.directories {
            let entries = self.remote.list(directory).await.or_raise(|| ErrorKind::Listing(directory.clone()))?;
            for entry in entries.into_iter().filter(|e| e.is_file()) {
                let path = match directory.as_str() {
                    "/" => format!("/{}", entry.name),
                    _ => format!("{directory}/{}", entry.name),
                };
                if !scan.inspect.contains(&path) {
                    continue;
                }
                // Only reachable when mirroring the remote root.
                if let Err(e) = key_for_remote(&path) {
                    warn!(%path, error = ?e, "skipping remote file with no live object key");
                    continue;
                }
                snapshot.insert(path.clone(), FileState::new(path, entry.mod_time, entry.size));
            }
        }
        Ok(snapshot)
    }
}

/// Object-store prefix holding `folder`'s live objects; `None` for the
/// remote root.
fn folder_prefix(folder: &SyncFolder) -> DetectResult<Option<PathBuf>> {
    match folder.root() {
        "" => Ok(None),
        root => Ok(Some(key_for_remote(root).or_raise(|| ErrorKind::Storage)?)),
    }
}
