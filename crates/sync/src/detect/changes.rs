use std::collections::{BTreeMap, BTreeSet};

/// Suffixes of checksum sidecar files. Their size rarely changes when their
/// content does, so their modification time is compared too.
const CHECKSUM_SIDECAR_SUFFIXES: [&str; 6] = [".md5", ".sha1", ".sha256", ".sha512", ".cksum", ".sum"];

/// Observable state of one file at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    /// Absolute remote path.
    pub path: String,
    /// Modification time as reported by the remote (or as recorded for the
    /// previous state). Opaque: only compared for equality.
    pub mod_time: String,
    pub size: u64,
}

impl FileState {
    pub fn new(path: impl Into<String>, mod_time: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            mod_time: mod_time.into(),
            size,
        }
    }
}

/// Files keyed by absolute remote path.
pub type Snapshot = BTreeMap<String, FileState>;

/// Paths classified by what has to happen to them.
///
/// Every list is sorted and free of duplicates, and no path appears in more
/// than one list. Unchanged paths appear in none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Total number of paths needing work.
    pub fn len(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len()
    }

    /// Fold another folder's changes into this set, keeping every list
    /// sorted.
    pub fn merge(&mut self, other: ChangeSet) {
        for (ours, theirs) in [
            (&mut self.new, other.new),
            (&mut self.modified, other.modified),
            (&mut self.deleted, other.deleted),
        ] {
            ours.extend(theirs);
            ours.sort_unstable();
            ours.dedup();
        }
    }
}

/// Whether `path` names a checksum sidecar file (case-insensitive).
///
/// ```
/// use hoard_sync::detect::is_checksum_sidecar;
/// assert!(is_checksum_sidecar("/pub/data/a.nc.MD5"));
/// assert!(is_checksum_sidecar("/pub/data/SHA256SUMS.sha256"));
/// assert!(!is_checksum_sidecar("/pub/data/a.nc"));
/// ```
pub fn is_checksum_sidecar(path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    CHECKSUM_SIDECAR_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
}

/// Classify every path of `previous` and `current`.
///
/// - only in `current`: new
/// - only in `previous`: deleted
/// - in both with different sizes: modified
/// - in both with equal sizes: modified only for a checksum sidecar whose
///   modification time differs, unchanged otherwise
///
/// An empty previous modification time means "unknown", leaving the size
/// comparison as the only test.
///
/// The previous snapshot never holds zero-byte objects, so an empty remote
/// file is new on every pass and one deleted upstream is never reported.
///
/// Paths are visited in lexicographic order, so the output is deterministic.
pub fn detect(previous: &Snapshot, current: &Snapshot) -> ChangeSet {
    let all: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    let mut changes = ChangeSet::default();
    for path in all {
        match (previous.get(path), current.get(path)) {
            (None, Some(_)) => changes.new.push(path.clone()),
            (Some(_), None) => changes.deleted.push(path.clone()),
            (Some(before), Some(now)) => {
                let time_changed = !before.mod_time.is_empty() && before.mod_time != now.mod_time;
                let modified = before.size != now.size || (is_checksum_sidecar(path) && time_changed);
                if modified {
                    changes.modified.push(path.clone());
                }
            },
            // Every path came from one of the snapshots.
            (None, None) => {},
        }
    }
    changes
}
