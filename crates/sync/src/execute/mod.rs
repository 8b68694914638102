//! Applying a [`ChangeSet`] to the mirror.
//!
//! Paths are handled strictly one at a time: every new path, then every
//! modified path, then every deleted path, each list in lexicographic
//! order. A failure is logged and the next path proceeds; the failed path is
//! picked up again by the next cycle's detection.
//!
//! Per path, the order of operations is always archive, then delete, then
//! upload, so the previous bytes are safe before anything replaces them:
//!
//! | Change   | Steps                                                        |
//! |----------|--------------------------------------------------------------|
//! | new      | fetch, archive a stale live version if any, upload           |
//! | modified | fetch, archive the live version, delete, upload              |
//! | deleted  | archive the live version, delete                             |
//!
//! Fetching first means a path whose fetch fails never touches the object
//! store or the version store.

pub mod error;

use crate::Archiver;
use crate::detect::ChangeSet;
use crate::error::{ErrorKind as SyncErrorKind, Result as SyncResult};
use crate::execute::error::{ErrorKind, Result as ExecuteResult};
use async_stream::stream;
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use hoard_remote::RemoteHandle;
use hoard_storage::{BackendHandle, key_for_remote};
use hoard_versions::StoreHandle;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What a path needs, as classified by detection.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    #[display("new")]
    New,
    #[display("modified")]
    Modified,
    #[display("deleted")]
    Deleted,
}

/// Progress events emitted by [`Executor::execute_stream`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started): exactly once, with the number of paths.
/// 2. [`Executed`](Self::Executed): once per path that succeeded.
/// 3. [`Complete`](Self::Complete): exactly once.
///
/// Paths that fail are yielded as `Err` items in between, without ending the
/// stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteEvent {
    Started(u64),
    Executed(Action, String),
    Complete,
}

/// Paths that completed, per classification, and paths that did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl ExecutionReport {
    fn succeeded(&mut self, action: Action, path: String) {
        match action {
            Action::New => self.new.push(path),
            Action::Modified => self.modified.push(path),
            Action::Deleted => self.deleted.push(path),
        }
    }
}

/// Drives the fetch, archive, delete and upload sequence for each path.
#[derive(Clone)]
pub struct Executor {
    remote: RemoteHandle,
    storage: BackendHandle,
    versions: StoreHandle,
    archiver: Archiver,
    staging: PathBuf,
}

impl Executor {
    /// Fetched files are staged under `staging`, at the same relative path
    /// as their object key.
    pub fn new(
        remote: RemoteHandle,
        storage: BackendHandle,
        versions: StoreHandle,
        archiver: Archiver,
        staging: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote,
            storage,
            versions,
            archiver,
            staging: staging.into(),
        }
    }

    /// Apply every change, collecting the outcome per path.
    pub async fn execute(&self, changes: &ChangeSet) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let events = self.execute_stream(changes);
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(ExecuteEvent::Executed(action, path)) => report.succeeded(action, path),
                Ok(ExecuteEvent::Started(_) | ExecuteEvent::Complete) => {},
                Err(e) => {
                    error!(path = e.subject(), error = ?e, "change could not be applied");
                    report.failed.push(e.subject().to_string());
                },
            }
        }
        report
    }

    /// Streams [`ExecuteEvent`]s while applying `changes` in order.
    pub fn execute_stream<'a>(&'a self, changes: &'a ChangeSet) -> impl Stream<Item = SyncResult<ExecuteEvent>> + 'a {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield Ok(ExecuteEvent::Started(u64::try_from(changes.len()).unwrap_or(0)));
            let work = (changes.new.iter().map(|path| (Action::New, path)))
                .chain(changes.modified.iter().map(|path| (Action::Modified, path)))
                .chain(changes.deleted.iter().map(|path| (Action::Deleted, path)));
            for (action, path) in work {
                let result = self.execute_path(action, path).await;
                yield match result.or_raise(|| SyncErrorKind::Execute(path.clone(), action)) {
                    Ok(()) => {
                        info!(%path, %action, "applied change");
                        Ok(ExecuteEvent::Executed(action, path.clone()))
                    },
                    Err(e) => Err(e),
                };
            }
            yield Ok(ExecuteEvent::Complete);
        })
    }

    async fn execute_path(&self, action: Action, path: &str) -> ExecuteResult<()> {
        let key = key_for_remote(path).or_raise(|| ErrorKind::InvalidPath)?;
        match action {
            Action::New | Action::Modified => {
                let staged = self.staging.join(&key);
                self.remote.fetch(path, &staged).await.or_raise(|| ErrorKind::Fetch)?;
                let result = match action {
                    Action::New => self.store_new(path, &key, &staged).await,
                    _ => self.replace(path, &key, &staged).await,
                };
                self.discard(&staged).await;
                result
            },
            Action::Deleted => self.remove(path, &key).await,
        }
    }

    async fn store_new(&self, path: &str, key: &Path, staged: &Path) -> ExecuteResult<()> {
        // A path can be new to detection yet still have a live record, e.g.
        // when its object was empty until now.
        if let Some(stale) = self.versions.latest_version(path, false).await.or_raise(|| ErrorKind::Versions)? {
            debug!(path, version = stale, "archiving stale live version");
            self.archiver.archive(path, stale).await.or_raise(|| ErrorKind::Archive)?;
        }
        self.storage.upload(key, staged).await.or_raise(|| ErrorKind::Upload)
    }

    async fn replace(&self, path: &str, key: &Path, staged: &Path) -> ExecuteResult<()> {
        self.archive_live(path).await?;
        self.delete_live(key).await?;
        self.storage.upload(key, staged).await.or_raise(|| ErrorKind::Upload)
    }

    async fn remove(&self, path: &str, key: &Path) -> ExecuteResult<()> {
        self.archive_live(path).await?;
        self.delete_live(key).await
    }

    async fn archive_live(&self, path: &str) -> ExecuteResult<()> {
        let live = self
            .versions
            .latest_version(path, false)
            .await
            .or_raise(|| ErrorKind::Versions)?
            .ok_or_raise(|| ErrorKind::MissingLiveVersion(path.to_string()))
            .inspect_err(|_| error!(path, "object is mirrored but has no live version record"))?;
        self.archiver.archive(path, live).await.or_raise(|| ErrorKind::Archive)?;
        Ok(())
    }

    /// A bulk move already removed the live object, so it may be gone.
    async fn delete_live(&self, key: &Path) -> ExecuteResult<()> {
        match self.storage.delete(key).await {
            Err(e) if e.is_not_found() => {
                debug!(key = %key.display(), "live object already moved");
                Ok(())
            },
            other => other.or_raise(|| ErrorKind::Delete),
        }
    }

    async fn discard(&self, staged: &Path) {
        if let Err(e) = tokio::fs::remove_file(staged).await {
            warn!(staged = %staged.display(), error = %e, "could not remove staged copy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_remote::{MockRemote, MockRunner};
    use hoard_storage::archive_key_path;
    use hoard_storage::backend::{MockBackend, StorageBackend};
    use hoard_versions::{Database, Repository, VersionStore};
    use futures::TryStreamExt;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _db: Database,
        staging: TempDir,
        remote: Arc<MockRemote>,
        storage: Arc<MockBackend>,
        versions: Arc<Repository>,
        executor: Executor,
    }

    async fn fixture(remote: MockRemote, storage: MockBackend) -> Fixture {
        let db = Database::connect_in_memory().await.unwrap();
        let versions = Arc::new(Repository::from(&db));
        let remote = Arc::new(remote);
        let storage = Arc::new(storage);
        let staging = tempfile::tempdir().unwrap();
        let archiver = Archiver::new(storage.clone(), versions.clone(), Arc::new(MockRunner::succeeding()));
        let executor = Executor::new(remote.clone(), storage.clone(), versions.clone(), archiver, staging.path());
        Fixture {
            _db: db,
            staging,
            remote,
            storage,
            versions,
            executor,
        }
    }

    fn changes(new: &[&str], modified: &[&str], deleted: &[&str]) -> ChangeSet {
        let owned = |paths: &[&str]| paths.iter().map(|p| p.to_string()).collect();
        ChangeSet {
            new: owned(new),
            modified: owned(modified),
            deleted: owned(deleted),
        }
    }

    fn staged_files(staging: &TempDir) -> usize {
        fn count(dir: &Path) -> usize {
            std::fs::read_dir(dir)
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .map(|path| if path.is_dir() { count(&path) } else { 1 })
                .sum()
        }
        count(staging.path())
    }

    #[tokio::test]
    async fn test_new_path_is_uploaded() {
        let remote = MockRemote::with_files([("/pub/data/a.nc", "t1", b"fresh".as_slice())]);
        let f = fixture(remote, MockBackend::default()).await;
        let report = f.executor.execute(&changes(&["/pub/data/a.nc"], &[], &[])).await;
        assert_eq!(report.new, vec!["/pub/data/a.nc"]);
        assert!(report.failed.is_empty());
        assert_eq!(f.storage.read(Path::new("pub/data/a.nc")).await.unwrap(), b"fresh");
        assert_eq!(staged_files(&f.staging), 0);
        // Recording is not the executor's job.
        assert_eq!(f.versions.latest_version("/pub/data/a.nc", true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_new_path_archives_stale_live_version() {
        let remote = MockRemote::with_files([("/pub/data/a.nc", "t2", b"content".as_slice())]);
        let f = fixture(remote, MockBackend::with_files([("pub/data/a.nc", Vec::new())])).await;
        f.versions.append_version("/pub/data/a.nc", "t1").await.unwrap();
        let report = f.executor.execute(&changes(&["/pub/data/a.nc"], &[], &[])).await;
        assert_eq!(report.new, vec!["/pub/data/a.nc"]);
        let record = f.versions.get("/pub/data/a.nc", 1).await.unwrap().unwrap();
        let key = record.archive_key.unwrap();
        assert_eq!(f.storage.read(&archive_key_path(&key)).await.unwrap(), b"");
        assert_eq!(f.storage.read(Path::new("pub/data/a.nc")).await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_modified_path_archives_then_replaces() {
        let remote = MockRemote::with_files([("/pub/data/a.nc", "t2", b"version two".as_slice())]);
        let f = fixture(remote, MockBackend::with_files([("pub/data/a.nc", b"version one".to_vec())])).await;
        f.versions.append_version("/pub/data/a.nc", "t1").await.unwrap();
        let report = f.executor.execute(&changes(&[], &["/pub/data/a.nc"], &[])).await;
        assert_eq!(report.modified, vec!["/pub/data/a.nc"]);
        let key = f.versions.get("/pub/data/a.nc", 1).await.unwrap().unwrap().archive_key.unwrap();
        assert_eq!(f.storage.read(&archive_key_path(&key)).await.unwrap(), b"version one");
        assert_eq!(f.storage.read(Path::new("pub/data/a.nc")).await.unwrap(), b"version two");
        assert_eq!(staged_files(&f.staging), 0);
    }

    #[tokio::test]
    async fn test_modified_without_live_version_is_inconsistent() {
        let remote = MockRemote::with_files([("/pub/data/a.nc", "t2", b"version two".as_slice())]);
        let f = fixture(remote, MockBackend::with_files([("pub/data/a.nc", b"version one".to_vec())])).await;
        let report = f.executor.execute(&changes(&[], &["/pub/data/a.nc"], &[])).await;
        assert_eq!(report.failed, vec!["/pub/data/a.nc"]);
        assert!(report.modified.is_empty());
        assert_eq!(f.storage.read(Path::new("pub/data/a.nc")).await.unwrap(), b"version one");
        assert_eq!(f.storage.keys().await.len(), 1);
        assert_eq!(staged_files(&f.staging), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_mutates_nothing() {
        let remote = MockRemote::with_files([("/pub/data/a.nc", "t2", b"version two".as_slice())]);
        remote.fail_fetch("/pub/data/a.nc");
        let f = fixture(remote, MockBackend::with_files([("pub/data/a.nc", b"version one".to_vec())])).await;
        f.versions.append_version("/pub/data/a.nc", "t1").await.unwrap();
        let report = f.executor.execute(&changes(&[], &["/pub/data/a.nc"], &[])).await;
        assert_eq!(report.failed, vec!["/pub/data/a.nc"]);
        assert_eq!(f.storage.keys().await, vec![PathBuf::from("pub/data/a.nc")]);
        assert!(f.versions.get("/pub/data/a.nc", 1).await.unwrap().unwrap().is_live());
        assert_eq!(f.versions.latest_version("/pub/data/a.nc", true).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_deleted_path_is_archived_and_removed() {
        let f = fixture(MockRemote::default(), MockBackend::with_files([("pub/data/gone.nc", b"bye".to_vec())])).await;
        f.versions.append_version("/pub/data/gone.nc", "t1").await.unwrap();
        let report = f.executor.execute(&changes(&[], &[], &["/pub/data/gone.nc"])).await;
        assert_eq!(report.deleted, vec!["/pub/data/gone.nc"]);
        assert!(report.new.is_empty() && report.modified.is_empty());
        let key = f.versions.get("/pub/data/gone.nc", 1).await.unwrap().unwrap().archive_key.unwrap();
        assert_eq!(f.storage.keys().await, vec![archive_key_path(&key)]);
        assert_eq!(f.remote.connection_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_paths() {
        let remote = MockRemote::with_files([
            ("/pub/a.nc", "t1", b"a".as_slice()),
            ("/pub/b.nc", "t1", b"b".as_slice()),
        ]);
        remote.fail_fetch("/pub/a.nc");
        let f = fixture(remote, MockBackend::default()).await;
        let set = changes(&["/pub/a.nc", "/pub/b.nc"], &[], &[]);
        let events: Vec<_> = f.executor.execute_stream(&set).collect().await;
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], Ok(ExecuteEvent::Started(2))));
        let err = events[1].as_ref().unwrap_err();
        assert!(matches!(&**err, SyncErrorKind::Execute(path, Action::New) if path == "/pub/a.nc"));
        assert_eq!(events[2].as_ref().unwrap(), &ExecuteEvent::Executed(Action::New, "/pub/b.nc".to_string()));
        assert!(matches!(events[3], Ok(ExecuteEvent::Complete)));
    }

    #[tokio::test]
    async fn test_actions_run_new_then_modified_then_deleted() {
        let remote = MockRemote::with_files([("/pub/z.nc", "t1", b"z".as_slice()), ("/pub/m.nc", "t2", b"mm".as_slice())]);
        let f = fixture(
            remote,
            MockBackend::with_files([("pub/m.nc", b"m".to_vec()), ("pub/a.nc", b"a".to_vec())]),
        )
        .await;
        f.versions.append_version("/pub/m.nc", "t1").await.unwrap();
        f.versions.append_version("/pub/a.nc", "t1").await.unwrap();
        let set = changes(&["/pub/z.nc"], &["/pub/m.nc"], &["/pub/a.nc"]);
        let executed: Vec<ExecuteEvent> = f.executor.execute_stream(&set).try_collect().await.unwrap();
        assert_eq!(
            executed[1..4],
            [
                ExecuteEvent::Executed(Action::New, "/pub/z.nc".to_string()),
                ExecuteEvent::Executed(Action::Modified, "/pub/m.nc".to_string()),
                ExecuteEvent::Executed(Action::Deleted, "/pub/a.nc".to_string()),
            ]
        );
    }
}
