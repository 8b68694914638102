//! rsync daemon access.
//!
//! The daemon protocol is connectionless from our side: every listing and
//! fetch is its own `rsync` invocation, so [`connect`](RemoteSource::connect)
//! is a reachability probe and [`disconnect`](RemoteSource::disconnect) has
//! nothing to release.

use crate::error::{ErrorKind, Result};
use crate::{CommandOutput, EntryKind, RemoteEntry, RemoteSource, RunnerHandle};
use async_trait::async_trait;
use exn::ResultExt;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, instrument};

/// `drwxr-xr-x          4,096 2024/01/02 10:11:12 name`
static LIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<type>[-dlcbps])[-rwxsStT]{9}\s+(?<size>[\d,]+)\s+(?<time>\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2})\s(?<name>.+)$")
        .expect("listing pattern is valid")
});

/// Remote source backed by an rsync daemon (`rsync://server/...`).
#[derive(Clone)]
pub struct RsyncRemote {
    server: String,
    rsync: String,
    runner: RunnerHandle,
}

impl RsyncRemote {
    /// `rsync` is the program to run; a bare name is looked up on `PATH`.
    pub fn new(server: impl Into<String>, rsync: impl Into<String>, runner: RunnerHandle) -> Self {
        Self {
            server: server.into(),
            rsync: rsync.into(),
            runner,
        }
    }

    /// `rsync://server/path`, for an absolute remote path.
    pub fn url(&self, path: &str) -> String {
        format!("rsync://{}/{}", self.server, path.trim_start_matches('/'))
    }

    /// Directory URLs need the trailing slash, otherwise rsync lists the
    /// directory entry itself instead of its contents.
    fn directory_url(&self, directory: &str) -> String {
        let url = self.url(directory);
        match url.ends_with('/') {
            true => url,
            false => url + "/",
        }
    }

    async fn rsync(&self, args: Vec<String>) -> Result<CommandOutput> {
        self.runner.run(&self.rsync, &args).await
    }
}

/// Parse `rsync --list-only` output. Lines that are not entries (a daemon
/// message of the day, the `.` self-entry) are skipped.
pub(crate) fn parse_listing(output: &str) -> Vec<RemoteEntry> {
    output
        .lines()
        .filter_map(|line| {
            let Some(captures) = LIST_LINE.captures(line) else {
                if !line.trim().is_empty() {
                    debug!(line, "skipping non-entry line in remote listing");
                }
                return None;
            };
            let kind = match &captures["type"] {
                "-" => EntryKind::File,
                "d" => EntryKind::Directory,
                "l" => EntryKind::Symlink,
                _ => EntryKind::Other,
            };
            let mut name = captures["name"].to_string();
            if kind == EntryKind::Symlink
                && let Some(arrow) = name.find(" -> ")
            {
                name.truncate(arrow);
            }
            if name == "." {
                return None;
            }
            // Sizes are printed with thousands separators.
            let size = captures["size"].replace(',', "").parse().ok()?;
            Some(RemoteEntry {
                name,
                size,
                mod_time: captures["time"].to_string(),
                kind,
            })
        })
        .collect()
}

#[async_trait]
impl RemoteSource for RsyncRemote {
    fn name(&self) -> &str {
        &self.server
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn connect(&self) -> Result<()> {
        let output = self
            .rsync(vec!["--list-only".to_string(), "--no-motd".to_string(), self.directory_url("/")])
            .await
            .or_raise(|| ErrorKind::Unreachable(self.server.clone()))?;
        if !output.success() {
            exn::bail!(ErrorKind::Unreachable(self.server.clone()));
        }
        Ok(())
    }

    async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>> {
        let output = self
            .rsync(vec!["--list-only".to_string(), "--no-motd".to_string(), self.directory_url(directory)])
            .await
            .or_raise(|| ErrorKind::Listing(directory.to_string()))?;
        if !output.success() {
            debug!(directory, code = output.code_or_signal(), stderr = %output.stderr.trim(), "remote listing failed");
            exn::bail!(ErrorKind::Listing(directory.to_string()));
        }
        Ok(parse_listing(&output.stdout))
    }

    async fn fetch(&self, path: &str, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Staging)?;
        }
        let args = vec![
            // Keep the remote modification time on the staged copy.
            "--times".to_string(),
            "--no-motd".to_string(),
            self.url(path),
            destination.to_string_lossy().into_owned(),
        ];
        let output = self.rsync(args).await.or_raise(|| ErrorKind::Fetch(path.to_string()))?;
        if !output.success() {
            debug!(path, code = output.code_or_signal(), stderr = %output.stderr.trim(), "remote fetch failed");
            exn::bail!(ErrorKind::Fetch(path.to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandRunner;
    use std::sync::{Arc, Mutex};

    /// Answers every invocation with the same output and remembers the
    /// argument lists it saw.
    struct Canned {
        output: CommandOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CommandRunner for Canned {
        async fn run(&self, _program: &str, args: &[String]) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(self.output.clone())
        }
    }

    fn remote(code: i32, stdout: &str) -> (Arc<Canned>, RsyncRemote) {
        let canned = Arc::new(Canned {
            output: CommandOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
            calls: Mutex::new(Vec::new()),
        });
        let remote = RsyncRemote::new("rsync.example.org", "rsync", canned.clone());
        (canned, remote)
    }

    const LISTING: &str = "\
drwxr-xr-x          4,096 2024/01/02 10:11:12 .
-rw-r--r--      1,234,567 2024/01/02 10:11:12 a.nc
-rw-r--r--             32 2024/01/03 08:00:00 a.nc.md5
drwxr-xr-x          4,096 2024/01/01 00:00:00 sub dir
lrwxrwxrwx              8 2024/01/01 00:00:00 latest -> a.nc
";

    #[test]
    fn test_parse_listing() {
        let entries = parse_listing(LISTING);
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[0],
            RemoteEntry {
                name: "a.nc".to_string(),
                size: 1_234_567,
                mod_time: "2024/01/02 10:11:12".to_string(),
                kind: EntryKind::File,
            }
        );
        assert_eq!(entries[2].name, "sub dir");
        assert_eq!(entries[2].kind, EntryKind::Directory);
        assert_eq!(entries[3].name, "latest");
        assert_eq!(entries[3].kind, EntryKind::Symlink);
    }

    #[test]
    fn test_parse_listing_skips_motd() {
        let entries = parse_listing("Welcome to the mirror!\n\n-rw-r--r--  1 2024/01/02 10:11:12 x\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "x");
    }

    #[tokio::test]
    async fn test_list_uses_directory_url() {
        let (canned, remote) = remote(0, LISTING);
        let entries = remote.list("/pub/data").await.unwrap();
        assert_eq!(entries.len(), 4);
        let calls = canned.calls.lock().unwrap();
        assert_eq!(calls[0].last().unwrap(), "rsync://rsync.example.org/pub/data/");
    }

    #[tokio::test]
    async fn test_list_failure() {
        let (_canned, remote) = remote(23, "");
        let err = remote.list("/pub/missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Listing(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_unreachable() {
        let (_canned, remote) = remote(10, "");
        let err = remote.connect().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_fetch_arguments() {
        let staging = tempfile::tempdir().unwrap();
        let destination = staging.path().join("pub/data/a.nc");
        let (canned, remote) = remote(0, "");
        remote.fetch("/pub/data/a.nc", &destination).await.unwrap();
        // The staging directory tree is prepared for rsync.
        assert!(staging.path().join("pub/data").is_dir());
        let calls = canned.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            vec![
                "--times".to_string(),
                "--no-motd".to_string(),
                "rsync://rsync.example.org/pub/data/a.nc".to_string(),
                destination.to_string_lossy().into_owned(),
            ]
        );
    }
}
