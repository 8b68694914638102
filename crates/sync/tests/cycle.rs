//! Full sync cycles against in-memory collaborators.

use hoard_remote::{FilteredScan, MockRemote, MockRunner, SyncFolder};
use hoard_storage::archive_key_path;
use hoard_storage::backend::{MockBackend, StorageBackend};
use hoard_sync::archive::error::ErrorKind as ArchiveErrorKind;
use hoard_sync::{Archiver, CycleReport, Detector, Executor, Orchestrator, State};
use hoard_versions::{Database, Repository, VersionStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    db: Database,
    _staging: TempDir,
    remote: Arc<MockRemote>,
    storage: Arc<MockBackend>,
    versions: Arc<Repository>,
    bulk_move: Arc<MockRunner>,
    archiver: Archiver,
    orchestrator: Orchestrator,
}

impl Harness {
    async fn new(remote: MockRemote, folders: Vec<SyncFolder>) -> Self {
        Self::build(remote, MockBackend::default(), folders, u64::MAX).await
    }

    async fn build(remote: MockRemote, storage: MockBackend, folders: Vec<SyncFolder>, threshold: u64) -> Self {
        let db = Database::connect_in_memory().await.unwrap();
        let versions = Arc::new(Repository::from(&db));
        let remote = Arc::new(remote);
        let storage = Arc::new(storage);
        let staging = tempfile::tempdir().unwrap();
        let bulk_move = Arc::new(MockRunner::succeeding());
        let scanner = FilteredScan::new("mock", "rsync", Arc::new(remote.scan_runner()));
        let archiver = Archiver::new(storage.clone(), versions.clone(), bulk_move.clone()).with_threshold(threshold);
        let detector = Detector::new(remote.clone(), scanner, storage.clone(), versions.clone());
        let executor =
            Executor::new(remote.clone(), storage.clone(), versions.clone(), archiver.clone(), staging.path());
        let orchestrator = Orchestrator::new(versions.clone(), detector, executor, folders);
        Self {
            db,
            _staging: staging,
            remote,
            storage,
            versions,
            bulk_move,
            archiver,
            orchestrator,
        }
    }

    async fn object(&self, key: impl AsRef<Path>) -> Vec<u8> {
        self.storage.read(key.as_ref()).await.unwrap()
    }
}

fn data_folder() -> Vec<SyncFolder> {
    vec![SyncFolder::new("/pub/data", ["- *.tmp", "+ *"])]
}

fn counts(report: &CycleReport) -> (usize, usize, usize) {
    (report.new, report.modified, report.deleted)
}

#[tokio::test]
async fn test_new_file_is_mirrored_and_recorded() {
    let remote = MockRemote::with_files([
        ("/pub/data/a.nc", "2024/01/01 00:00:00", b"first".as_slice()),
        ("/pub/data/skip.tmp", "2024/01/01 00:00:00", b"scratch".as_slice()),
    ]);
    let h = Harness::new(remote, data_folder()).await;
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.state, State::Idle);
    assert_eq!(counts(&report), (1, 0, 0));
    assert_eq!(h.storage.keys().await, vec![PathBuf::from("pub/data/a.nc")]);
    assert_eq!(h.object("pub/data/a.nc").await, b"first");
    let history = h.versions.history("/pub/data/a.nc").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[0].modified.as_deref(), Some("2024/01/01 00:00:00"));
    assert!(history[0].is_live());

    // Nothing changed: the next cycle has nothing to do.
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (0, 0, 0));
    assert_eq!(h.versions.history("/pub/data/a.nc").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_modified_by_size_archives_previous_version() {
    let remote = MockRemote::with_files([("/pub/data/a.nc", "t1", b"short".as_slice())]);
    let h = Harness::new(remote, data_folder()).await;
    h.orchestrator.run_cycle().await;

    h.remote.set_file("/pub/data/a.nc", "t2", b"much longer");
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (0, 1, 0));

    let history = h.versions.history("/pub/data/a.nc").await.unwrap();
    assert_eq!(history.len(), 2);
    let key = history[0].archive_key.clone().expect("version 1 is archived");
    assert_eq!(key.len(), 64);
    assert!(history[1].is_live());
    assert_eq!(history[1].modified.as_deref(), Some("t2"));
    assert_eq!(h.object(archive_key_path(&key)).await, b"short");
    assert_eq!(h.object("pub/data/a.nc").await, b"much longer");
}

#[tokio::test]
async fn test_new_and_modified_in_one_cycle() {
    let remote = MockRemote::with_files([
        ("/pub/data/a.nc", "t1", b"short".as_slice()),
        ("/pub/data/b.nc", "t1", b"bb".as_slice()),
    ]);
    let h = Harness::new(remote, data_folder()).await;
    h.orchestrator.run_cycle().await;

    h.remote.set_file("/pub/data/a.nc", "t2", b"much longer");
    h.remote.set_file("/pub/data/c.nc", "t2", b"cc");
    h.remote.set_file("/pub/data/d.nc", "t2", b"dd");
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (2, 1, 0));
    assert!(report.failed.is_empty());
    assert_eq!(h.versions.latest_version("/pub/data/a.nc", true).await.unwrap(), Some(2));
    assert_eq!(h.versions.latest_version("/pub/data/c.nc", true).await.unwrap(), Some(1));
    assert_eq!(h.versions.latest_version("/pub/data/b.nc", true).await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_remote_archive_directory_is_not_mirrored() {
    let remote = MockRemote::with_files([
        ("/top.nc", "t1", b"top".as_slice()),
        ("/archive/x.nc", "t1", b"x".as_slice()),
    ]);
    let h = Harness::new(remote, vec![SyncFolder::new("/", ["+ *"])]).await;
    for _ in 0..3 {
        h.orchestrator.run_cycle().await;
    }
    assert_eq!(h.storage.keys().await, vec![PathBuf::from("top.nc")]);
    assert_eq!(h.versions.history("/top.nc").await.unwrap().len(), 1);
    assert!(h.versions.history("/archive/x.nc").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_checksum_sidecar_modified_by_time() {
    let remote = MockRemote::with_files([
        ("/pub/data/a.nc", "t1", b"0123456789".as_slice()),
        ("/pub/data/a.nc.md5", "t1", b"d41d8cd98f00b204".as_slice()),
    ]);
    let h = Harness::new(remote, data_folder()).await;
    h.orchestrator.run_cycle().await;

    // Same sizes, new times: only the sidecar counts as modified.
    h.remote.set_file("/pub/data/a.nc", "t2", b"9876543210");
    h.remote.set_file("/pub/data/a.nc.md5", "t2", b"0f343b0931126a20");
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (0, 1, 0));
    assert_eq!(h.versions.latest_version("/pub/data/a.nc.md5", true).await.unwrap(), Some(2));
    assert_eq!(h.versions.latest_version("/pub/data/a.nc", true).await.unwrap(), Some(1));
    assert_eq!(h.object("pub/data/a.nc.md5").await, b"0f343b0931126a20");
}

#[tokio::test]
async fn test_deleted_file_is_archived() {
    let remote = MockRemote::with_files([
        ("/pub/data/a.nc", "t1", b"keep".as_slice()),
        ("/pub/data/b.nc", "t1", b"remove".as_slice()),
    ]);
    let h = Harness::new(remote, data_folder()).await;
    h.orchestrator.run_cycle().await;

    h.remote.remove_file("/pub/data/b.nc");
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (0, 0, 1));
    assert_eq!(h.versions.latest_version("/pub/data/b.nc", false).await.unwrap(), None);
    let key = h.versions.get("/pub/data/b.nc", 1).await.unwrap().unwrap().archive_key.unwrap();
    let mut expected = vec![archive_key_path(&key), PathBuf::from("pub/data/a.nc")];
    expected.sort();
    assert_eq!(h.storage.keys().await, expected);
    assert_eq!(h.object(archive_key_path(&key)).await, b"remove");

    // Archiving the same version again is an inconsistency.
    let err = h.archiver.archive("/pub/data/b.nc", 1).await.unwrap_err();
    assert!(matches!(&*err, ArchiveErrorKind::AlreadyArchived(_, 1)));
    assert_eq!(h.storage.keys().await, expected);
}

#[tokio::test]
async fn test_failed_fetch_leaves_both_stores_untouched() {
    let remote = MockRemote::with_files([("/pub/data/a.nc", "t1", b"v1".as_slice())]);
    let h = Harness::new(remote, data_folder()).await;
    h.orchestrator.run_cycle().await;
    let keys = h.storage.keys().await;

    h.remote.set_file("/pub/data/a.nc", "t2", b"v2 is longer");
    h.remote.fail_fetch("/pub/data/a.nc");
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.state, State::Idle);
    assert_eq!(report.failed, vec!["/pub/data/a.nc"]);
    assert_eq!(counts(&report), (0, 0, 0));
    assert_eq!(h.storage.keys().await, keys);
    assert_eq!(h.object("pub/data/a.nc").await, b"v1");
    let history = h.versions.history("/pub/data/a.nc").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_live());

    // The next cycle picks it up again.
    h.remote.allow_fetch("/pub/data/a.nc");
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (0, 1, 0));
    assert_eq!(h.versions.history("/pub/data/a.nc").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_file_gaining_content_is_new() {
    let remote = MockRemote::with_files([("/pub/data/a.nc", "t1", b"".as_slice())]);
    let h = Harness::new(remote, data_folder()).await;
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (1, 0, 0));

    h.remote.set_file("/pub/data/a.nc", "t2", b"content");
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (1, 0, 0));
    let history = h.versions.history("/pub/data/a.nc").await.unwrap();
    assert_eq!(history.len(), 2);
    // The empty predecessor was archived rather than left live.
    assert!(!history[0].is_live());
    assert!(history[1].is_live());
    assert_eq!(h.object("pub/data/a.nc").await, b"content");
}

#[tokio::test]
async fn test_large_objects_use_bulk_move() {
    let remote = MockRemote::with_files([("/pub/data/big.nc", "t1", b"0123".as_slice())]);
    let h = Harness::build(remote, MockBackend::default(), data_folder(), 4).await;
    h.orchestrator.run_cycle().await;
    h.remote.set_file("/pub/data/big.nc", "t2", b"01234567");
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(counts(&report), (0, 1, 0));
    let key = h.versions.get("/pub/data/big.nc", 1).await.unwrap().unwrap().archive_key.unwrap();
    let calls = h.bulk_move.calls_to("aws");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][3..], ["mock://pub/data/big.nc".to_string(), format!("mock://archive/{key}")]);
    assert_eq!(h.object("pub/data/big.nc").await, b"01234567");
}

#[tokio::test]
async fn test_unreachable_store_aborts_before_detection() {
    let remote = MockRemote::with_files([("/pub/data/a.nc", "t1", b"a".as_slice())]);
    let h = Harness::new(remote, data_folder()).await;
    h.db.close().await;
    let report = h.orchestrator.run_cycle().await;
    assert!(report.is_aborted());
    assert_eq!(h.remote.connection_counts(), (0, 0));
    assert!(h.storage.keys().await.is_empty());
}

#[tokio::test]
async fn test_unreachable_remote_aborts_cycle() {
    let remote = MockRemote::with_files([("/pub/data/a.nc", "t1", b"a".as_slice())]);
    remote.set_unreachable(true);
    let h = Harness::new(remote, data_folder()).await;
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.state, State::Aborted);
    assert_eq!(report.failed_folders, vec!["/pub/data"]);
    assert!(h.storage.keys().await.is_empty());
    assert!(!h.remote.is_connected());
}

#[tokio::test]
async fn test_one_failing_folder_does_not_abort() {
    let remote = MockRemote::with_files([("/pub/data/a.nc", "t1", b"a".as_slice())]);
    let folders = vec![SyncFolder::new("/../outside", ["+ *"]), SyncFolder::new("/pub/data", ["+ *"])];
    let h = Harness::new(remote, folders).await;
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.state, State::Idle);
    assert_eq!(report.failed_folders, vec!["/../outside"]);
    assert_eq!(counts(&report), (1, 0, 0));
}

#[tokio::test]
async fn test_cycles_are_deterministic() {
    let files = [
        ("/pub/b/2.nc", "t1", b"22".as_slice()),
        ("/pub/a/1.nc", "t1", b"1".as_slice()),
        ("/pub/b/1.nc", "t1", b"11".as_slice()),
        ("/pub/a/2.nc", "t1", b"2".as_slice()),
    ];
    let folders = || vec![SyncFolder::new("/pub/b", ["+ *"]), SyncFolder::new("/pub/a", ["+ *"])];
    let first = Harness::new(MockRemote::with_files(files), folders()).await;
    let second = Harness::new(MockRemote::with_files(files.into_iter().rev()), folders()).await;
    let (one, two) = (first.orchestrator.run_cycle().await, second.orchestrator.run_cycle().await);
    assert_eq!(one, two);
    assert_eq!(counts(&one), (4, 0, 0));
    assert_eq!(first.storage.keys().await, second.storage.keys().await);
    assert_eq!(
        first.versions.latest_per_path(None).await.unwrap(),
        second.versions.latest_per_path(None).await.unwrap()
    );
}

#[tokio::test]
async fn test_repeating_stops_on_shutdown() {
    let remote = MockRemote::with_files([("/pub/data/a.nc", "t1", b"a".as_slice())]);
    let h = Harness::new(remote, data_folder()).await;
    // Already resolved: exactly one cycle runs.
    let cycles = h.orchestrator.run_repeating(Duration::from_secs(3600), std::future::ready(())).await;
    assert_eq!(cycles, 1);

    let cycles = h
        .orchestrator
        .run_repeating(Duration::from_millis(10), tokio::time::sleep(Duration::from_millis(50)))
        .await;
    assert!(cycles >= 2, "ran {cycles} cycles");
    assert_eq!(h.versions.history("/pub/data/a.nc").await.unwrap().len(), 1);
}
