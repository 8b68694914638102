//! In-memory remote and command runner for testing.

use crate::error::{ErrorKind, Result};
use crate::{CommandOutput, CommandRunner, EntryKind, RemoteEntry, RemoteSource};
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug, Clone)]
struct MockFile {
    mod_time: String,
    data: Vec<u8>,
}

/// In-memory remote file tree.
///
/// Files are keyed by absolute remote path. Besides being a
/// [`RemoteSource`], the mock can answer filtered dry-run scans of its own
/// tree through [`scan_runner`](Self::scan_runner), so a whole detection pass
/// runs without rsync.
///
/// Locks are synchronous: nothing is held across an await point, and the
/// scan runner's handler has to read the tree from a plain closure.
///
/// # Examples
///
/// ```
/// use hoard_remote::{MockRemote, RemoteSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = MockRemote::with_files([("/pub/data/a.nc", "2024/01/01 00:00:00", b"netcdf")]);
/// let entries = remote.list("/pub/data").await?;
/// assert_eq!(entries[0].name, "a.nc");
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockRemote {
    files: RwLock<BTreeMap<String, MockFile>>,
    failing_fetches: RwLock<HashSet<String>>,
    failing_listings: RwLock<HashSet<String>>,
    unreachable: AtomicBool,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockRemote {
    /// Create a mock remote pre-populated with `(path, mod_time, bytes)`.
    pub fn with_files(
        files: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>, impl AsRef<[u8]>)>,
    ) -> Self {
        let remote = Self::default();
        for (path, mod_time, data) in files {
            remote.set_file(path.as_ref(), mod_time.as_ref(), data.as_ref());
        }
        remote
    }

    /// Create or replace a remote file.
    pub fn set_file(&self, path: &str, mod_time: &str, data: &[u8]) {
        let file = MockFile {
            mod_time: mod_time.to_string(),
            data: data.to_vec(),
        };
        self.files.write().unwrap_or_else(PoisonError::into_inner).insert(path.to_string(), file);
    }

    pub fn remove_file(&self, path: &str) {
        self.files.write().unwrap_or_else(PoisonError::into_inner).remove(path);
    }

    /// Make fetching `path` fail until [`allow_fetch`](Self::allow_fetch)
    /// is called.
    pub fn fail_fetch(&self, path: &str) {
        self.failing_fetches.write().unwrap_or_else(PoisonError::into_inner).insert(path.to_string());
    }

    pub fn allow_fetch(&self, path: &str) {
        self.failing_fetches.write().unwrap_or_else(PoisonError::into_inner).remove(path);
    }

    /// Make listing `directory` fail while the server stays reachable,
    /// until [`allow_list`](Self::allow_list) is called.
    pub fn fail_list(&self, directory: &str) {
        self.failing_listings.write().unwrap_or_else(PoisonError::into_inner).insert(directory.to_string());
    }

    pub fn allow_list(&self, directory: &str) {
        self.failing_listings.write().unwrap_or_else(PoisonError::into_inner).remove(directory);
    }

    /// Simulate the server going away: connecting, listing, fetching and
    /// scanning all fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of `(connect, disconnect)` calls seen so far.
    pub fn connection_counts(&self) -> (usize, usize) {
        (self.connects.load(Ordering::SeqCst), self.disconnects.load(Ordering::SeqCst))
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unreachable("mock".to_string()));
        }
        Ok(())
    }

    /// Itemized dry-run output for `source`, with `filters` applied.
    ///
    /// Filter support is deliberately small: rules are `+ PATTERN` or
    /// `- PATTERN`, patterns match the file name and may contain `*`
    /// wildcards, the first matching rule wins, and directory-only rules
    /// (`*/`) are ignored. Unmatched files are included, as with rsync.
    pub fn itemize(&self, source: &str, filters: &[String]) -> String {
        let root = source.trim_end_matches('/');
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut lines = vec!["receiving incremental file list".to_string(), "cd+++++++++ ./".to_string()];
        let mut directories = BTreeSet::new();
        for path in files.keys() {
            let Some(relative) = path.strip_prefix(root).and_then(|r| r.strip_prefix('/')) else {
                continue;
            };
            let name = relative.rsplit('/').next().unwrap_or(relative);
            if !included(name, filters) {
                continue;
            }
            if let Some((dir, _)) = relative.rsplit_once('/')
                && directories.insert(dir.to_string())
            {
                lines.push(format!("cd+++++++++ {dir}/"));
            }
            lines.push(format!(">f+++++++++ {relative}"));
        }
        lines.push(String::new());
        lines.push("sent 20 bytes  received 1,024 bytes  2,088.00 bytes/sec".to_string());
        lines.push("total size is 10,240  speedup is 9.81 (DRY RUN)".to_string());
        lines.join("\n") + "\n"
    }

    /// A [`MockRunner`] that answers rsync dry-run scans from this tree and
    /// reports success for every other command.
    pub fn scan_runner(self: &Arc<Self>) -> MockRunner {
        let remote = Arc::clone(self);
        MockRunner::new(move |_program, args| {
            if !args.iter().any(|a| a == "--dry-run") {
                return MockRunner::ok();
            }
            if remote.unreachable.load(Ordering::SeqCst) {
                return CommandOutput {
                    code: Some(10),
                    stdout: String::new(),
                    stderr: "rsync: failed to connect to mock".to_string(),
                };
            }
            let source = args
                .iter()
                .find_map(|a| a.strip_prefix("rsync://"))
                .and_then(|rest| rest.split_once('/'))
                .map(|(_server, path)| format!("/{}", path.trim_end_matches('/')))
                .unwrap_or_else(|| "/".to_string());
            let filters: Vec<String> =
                args.iter().filter_map(|a| a.strip_prefix("--filter=")).map(str::to_string).collect();
            CommandOutput {
                code: Some(0),
                stdout: remote.itemize(&source, &filters),
                stderr: String::new(),
            }
        })
    }
}

fn included(name: &str, filters: &[String]) -> bool {
    for rule in filters {
        let Some((action, pattern)) = rule.split_once(' ') else { continue };
        if pattern.ends_with('/') {
            continue;
        }
        if wildcard_match(pattern, name) {
            return action == "+";
        }
    }
    true
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[async_trait]
impl RemoteSource for MockRemote {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>> {
        self.ensure_reachable().or_raise(|| ErrorKind::Listing(directory.to_string()))?;
        if self.failing_listings.read().unwrap_or_else(PoisonError::into_inner).contains(directory) {
            exn::bail!(ErrorKind::Listing(directory.to_string()));
        }
        let root = directory.trim_end_matches('/');
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries = Vec::new();
        let mut subdirectories = BTreeSet::new();
        for (path, file) in files.iter() {
            let Some(relative) = path.strip_prefix(root).and_then(|r| r.strip_prefix('/')) else {
                continue;
            };
            match relative.split_once('/') {
                Some((subdirectory, _)) => {
                    subdirectories.insert(subdirectory.to_string());
                },
                None => entries.push(RemoteEntry {
                    name: relative.to_string(),
                    size: file.data.len() as u64,
                    mod_time: file.mod_time.clone(),
                    kind: EntryKind::File,
                }),
            }
        }
        entries.extend(subdirectories.into_iter().map(|name| RemoteEntry {
            name,
            size: 4096,
            mod_time: "1970/01/01 00:00:00".to_string(),
            kind: EntryKind::Directory,
        }));
        Ok(entries)
    }

    async fn fetch(&self, path: &str, destination: &Path) -> Result<()> {
        self.ensure_reachable().or_raise(|| ErrorKind::Fetch(path.to_string()))?;
        if self.failing_fetches.read().unwrap_or_else(PoisonError::into_inner).contains(path) {
            exn::bail!(ErrorKind::Fetch(path.to_string()));
        }
        let data = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| exn::Exn::from(ErrorKind::Fetch(path.to_string())))?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Staging)?;
        }
        tokio::fs::write(destination, data).await.or_raise(|| ErrorKind::Staging)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

type Handler = dyn Fn(&str, &[String]) -> CommandOutput + Send + Sync;

/// Command runner answering from a closure and recording every call as
/// `[program, args...]`.
pub struct MockRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockRunner {
    pub fn new(handler: impl Fn(&str, &[String]) -> CommandOutput + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command succeeds with no output.
    pub fn succeeding() -> Self {
        Self::new(|_, _| Self::ok())
    }

    /// Every command exits with `code`.
    pub fn failing(code: i32) -> Self {
        Self::new(move |_, _| CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: "mock failure".to_string(),
        })
    }

    fn ok() -> CommandOutput {
        CommandOutput {
            code: Some(0),
            ..CommandOutput::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Calls whose program is `program`.
    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls().into_iter().filter(|c| c.first().is_some_and(|p| p == program)).collect()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut call = vec![program.to_string()];
        call.extend_from_slice(args);
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
        Ok((self.handler)(program, args))
    }
}
