//! Filter-aware dry-run scans.
//!
//! Listing every directory of a large tree is slow and ignores the folder's
//! filter rules. Instead, rsync is asked what it *would* transfer from the
//! remote folder into an empty local directory: with the filters applied,
//! that is exactly the set of files worth inspecting. Listing is then
//! restricted to the directories those files live in.

use crate::error::{ErrorKind, Result};
use crate::{RunnerHandle, SyncFolder};
use exn::{OptionExt, ResultExt};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::instrument;

/// Banner line (`receiving incremental file list`) before the data lines.
const LEADING_LINES: usize = 1;
/// Blank line, `sent ... bytes` and `total size is ...` after them.
const TRAILING_LINES: usize = 3;

/// Non-item lines rsync's generator mixes into verbose output, e.g.
/// `skipping non-regular file "sub/link.nc"` for special files.
const INFORMATIONAL_PREFIXES: [&str; 3] = ["skipping non-regular file ", "skipping directory ", "created directory "];

/// `<update><type><9 attribute flags> <relative path>`, e.g. `>f+++++++++ sub/a.nc`.
static ITEMIZED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<flags>[<>ch.*][fdLDS][.+?a-zA-Z ]{9}) (?<path>.+)$").expect("itemize pattern is valid")
});

/// Outcome of a filtered scan, as absolute remote paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Regular files that survive the filter rules.
    pub inspect: BTreeSet<String>,
    /// Every directory directly containing an inspected file; each needs
    /// exactly one listing.
    pub directories: BTreeSet<String>,
}

/// Parse rsync `--itemize-changes` output for a scan of `folder`.
///
/// The first line and the last three lines are framing and are discarded.
/// Every other line must be an itemized entry or one of rsync's known
/// informational lines, which are skipped.
///
/// ```
/// use hoard_remote::{SyncFolder, parse_itemized};
/// let output = "receiving incremental file list\n\
///               cd+++++++++ ./\n\
///               >f+++++++++ a.nc\n\
///               cd+++++++++ sub/\n\
///               >f+++++++++ sub/b.nc\n\
///               \n\
///               sent 12 bytes  received 345 bytes  714.00 bytes/sec\n\
///               total size is 6,789  speedup is 19.02 (DRY RUN)\n";
/// let scan = parse_itemized(&SyncFolder::new("/pub/data", ["+ *"]), output).unwrap();
/// assert!(scan.inspect.contains("/pub/data/sub/b.nc"));
/// assert!(scan.directories.contains("/pub/data/sub"));
/// ```
pub fn parse_itemized(folder: &SyncFolder, output: &str) -> Result<ScanResult> {
    let lines: Vec<&str> = output.lines().collect();
    let end = lines.len().saturating_sub(TRAILING_LINES);
    let mut result = ScanResult::default();
    for line in lines.iter().take(end).skip(LEADING_LINES) {
        if INFORMATIONAL_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
            tracing::debug!(%line, "skipping informational rsync line");
            continue;
        }
        let captures = ITEMIZED_LINE.captures(line).ok_or_raise(|| ErrorKind::Parse(line.to_string()))?;
        // Second flag is the entry type; only regular files are inspected.
        if captures["flags"].as_bytes()[1] != b'f' {
            continue;
        }
        let path = folder.join(&captures["path"]);
        if let Some((parent, _)) = path.rsplit_once('/') {
            result.directories.insert(if parent.is_empty() { "/".to_string() } else { parent.to_string() });
        }
        result.inspect.insert(path);
    }
    Ok(result)
}

/// Runs dry-run scans against the remote.
#[derive(Clone)]
pub struct FilteredScan {
    server: String,
    rsync: String,
    runner: RunnerHandle,
}

impl FilteredScan {
    pub fn new(server: impl Into<String>, rsync: impl Into<String>, runner: RunnerHandle) -> Self {
        Self {
            server: server.into(),
            rsync: rsync.into(),
            runner,
        }
    }

    fn args(&self, folder: &SyncFolder, destination: &str) -> Vec<String> {
        let mut args = vec![
            "--dry-run".to_string(),
            "--itemize-changes".to_string(),
            "--verbose".to_string(),
            "--recursive".to_string(),
            // Symlinks come out as `cL` items instead of warnings.
            "--links".to_string(),
            "--no-motd".to_string(),
        ];
        args.extend(folder.filters.iter().map(|rule| format!("--filter={rule}")));
        args.push(format!("rsync://{}/{}/", self.server, folder.root().trim_start_matches('/')));
        args.push(format!("{}/", destination.trim_end_matches('/')));
        args
    }

    /// Scan `folder` with its filter rules applied.
    ///
    /// # Errors
    /// [`Scan`](ErrorKind::Scan) when rsync exits unsuccessfully and
    /// [`Parse`](ErrorKind::Parse) when its output is not itemized output.
    #[instrument(skip(self), fields(source = %folder.source))]
    pub async fn scan(&self, folder: &SyncFolder) -> Result<ScanResult> {
        // An empty destination makes every remote file show up as a transfer.
        let destination = tempfile::tempdir().or_raise(|| ErrorKind::Staging)?;
        let args = self.args(folder, &destination.path().to_string_lossy());
        let output = self.runner.run(&self.rsync, &args).await?;
        if !output.success() {
            tracing::warn!(code = output.code_or_signal(), stderr = %output.stderr.trim(), "filtered scan failed");
            exn::bail!(ErrorKind::Scan(folder.source.clone(), output.code_or_signal()));
        }
        let result = parse_itemized(folder, &output.stdout)?;
        tracing::debug!(files = result.inspect.len(), directories = result.directories.len(), "filtered scan complete");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandOutput, CommandRunner};
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::{Arc, Mutex};

    fn wrap(data: &[&str]) -> String {
        let mut output = vec!["receiving incremental file list"];
        output.extend_from_slice(data);
        output.extend_from_slice(&[
            "",
            "sent 20 bytes  received 1,024 bytes  2,088.00 bytes/sec",
            "total size is 10,240  speedup is 9.81 (DRY RUN)",
        ]);
        output.join("\n") + "\n"
    }

    #[test]
    fn test_files_and_directories() {
        let folder = SyncFolder::new("/pub/data", ["+ */", "+ *.nc", "- *"]);
        let output = wrap(&[
            "cd+++++++++ ./",
            ">f+++++++++ a.nc",
            "cd+++++++++ sub/",
            ">f+++++++++ sub/b.nc",
            "cd+++++++++ sub/deeper/",
            "cL+++++++++ sub/link.nc -> ../a.nc",
        ]);
        let scan = parse_itemized(&folder, &output).unwrap();
        assert_eq!(
            scan.inspect,
            BTreeSet::from(["/pub/data/a.nc".to_string(), "/pub/data/sub/b.nc".to_string()])
        );
        // Directories without inspected files are not listed.
        assert_eq!(
            scan.directories,
            BTreeSet::from(["/pub/data".to_string(), "/pub/data/sub".to_string()])
        );
    }

    #[test]
    fn test_informational_lines_are_skipped() {
        // Scanning a tree holding a symlink and a FIFO without `--links`.
        let output = wrap(&[
            "cd+++++++++ ./",
            ">f+++++++++ a.nc",
            "skipping non-regular file \"latest.nc\"",
            "cd+++++++++ sub/",
            "skipping non-regular file \"sub/pipe\"",
            ">f+++++++++ sub/b.nc",
        ]);
        let scan = parse_itemized(&SyncFolder::new("/pub/data", ["+ *"]), &output).unwrap();
        assert_eq!(
            scan.inspect,
            BTreeSet::from(["/pub/data/a.nc".to_string(), "/pub/data/sub/b.nc".to_string()])
        );
    }

    #[rstest]
    #[case("")]
    #[case("receiving incremental file list\n")]
    #[case("receiving incremental file list\n\nsent 1 bytes\ntotal size is 0 (DRY RUN)\n")]
    fn test_no_data_lines(#[case] output: &str) {
        let scan = parse_itemized(&SyncFolder::new("/pub", ["+ *"]), output).unwrap();
        assert!(scan.inspect.is_empty());
        assert!(scan.directories.is_empty());
    }

    #[rstest]
    #[case("this is not itemized")]
    #[case(">f+++ short.nc")]
    #[case(">f+++++++++")]
    fn test_malformed_line(#[case] line: &str) {
        let err = parse_itemized(&SyncFolder::new("/pub", ["+ *"]), &wrap(&[line])).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Parse(_)));
    }

    #[test]
    fn test_root_folder() {
        let scan = parse_itemized(&SyncFolder::new("/", ["+ *"]), &wrap(&[">f+++++++++ top.nc"])).unwrap();
        assert!(scan.inspect.contains("/top.nc"));
        assert!(scan.directories.contains("/"));
    }

    struct Recording {
        output: CommandOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CommandRunner for Recording {
        async fn run(&self, _program: &str, args: &[String]) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(self.output.clone())
        }
    }

    #[tokio::test]
    async fn test_scan_passes_filters_in_order() {
        let runner = Arc::new(Recording {
            output: CommandOutput {
                code: Some(0),
                stdout: wrap(&[">f+++++++++ a.nc"]),
                stderr: String::new(),
            },
            calls: Mutex::new(Vec::new()),
        });
        let scanner = FilteredScan::new("rsync.example.org", "rsync", runner.clone());
        let folder = SyncFolder::new("/pub/data", ["- *.tmp", "+ *"]);
        let scan = scanner.scan(&folder).await.unwrap();
        assert_eq!(scan.inspect.len(), 1);
        let calls = runner.calls.lock().unwrap();
        let args = &calls[0];
        let filters: Vec<&String> = args.iter().filter(|a| a.starts_with("--filter=")).collect();
        assert_eq!(filters, vec!["--filter=- *.tmp", "--filter=+ *"]);
        assert_eq!(args[args.len() - 2], "rsync://rsync.example.org/pub/data/");
        assert!(args.contains(&"--dry-run".to_string()));
        assert!(args.contains(&"--links".to_string()));
    }

    #[tokio::test]
    async fn test_scan_failure() {
        let runner = Arc::new(Recording {
            output: CommandOutput {
                code: Some(10),
                stdout: String::new(),
                stderr: "rsync: failed to connect".to_string(),
            },
            calls: Mutex::new(Vec::new()),
        });
        let scanner = FilteredScan::new("rsync.example.org", "rsync", runner);
        let err = scanner.scan(&SyncFolder::new("/pub", ["+ *"])).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Scan(_, 10)));
    }
}
