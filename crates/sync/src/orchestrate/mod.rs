//! The sync cycle and its schedule.
//!
//! A cycle walks a fixed sequence of states:
//!
//! ```text
//! Idle ──ping──▶ Detecting ──▶ Executing ──▶ Recording ──▶ Idle
//!   │                │
//!   └──▶ Aborted ◀───┘ (store unreachable, or every folder failed)
//! ```
//!
//! Detection is the only rollback boundary: a cycle can abort while
//! detecting without having changed anything, but once execution starts
//! every path stands on its own and the cycle always runs to completion.

use crate::detect::{ChangeSet, Detector, Snapshot};
use crate::execute::{ExecutionReport, Executor};
use derive_more::Display;
use hoard_remote::SyncFolder;
use hoard_versions::StoreHandle;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Where a cycle is, or where it ended.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Idle,
    Detecting,
    Executing,
    Recording,
    Aborted,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Paths stored for the first time.
    pub new: usize,
    /// Paths whose previous version was archived and replaced.
    pub modified: usize,
    /// Paths archived and removed from the mirror.
    pub deleted: usize,
    /// Paths whose change could not be applied or recorded.
    pub failed: Vec<String>,
    /// Folders whose detection failed.
    pub failed_folders: Vec<String>,
    /// [`Idle`](State::Idle) after a completed cycle,
    /// [`Aborted`](State::Aborted) otherwise.
    pub state: State,
}

impl CycleReport {
    fn aborted(failed_folders: Vec<String>) -> Self {
        Self {
            failed_folders,
            state: State::Aborted,
            ..Self::default()
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state == State::Aborted
    }
}

/// Runs detect → execute → record cycles over the configured folders.
pub struct Orchestrator {
    versions: StoreHandle,
    detector: Detector,
    executor: Executor,
    folders: Vec<SyncFolder>,
}

impl Orchestrator {
    pub fn new(versions: StoreHandle, detector: Detector, executor: Executor, folders: Vec<SyncFolder>) -> Self {
        Self {
            versions,
            detector,
            executor,
            folders,
        }
    }

    /// Run one complete cycle.
    ///
    /// Never fails: every failure is logged and reflected in the returned
    /// report.
    #[instrument(skip(self), fields(folders = self.folders.len()))]
    pub async fn run_cycle(&self) -> CycleReport {
        let mut state = State::Idle;
        if let Err(e) = self.versions.ping().await {
            error!(error = ?e, "version store unreachable; aborting cycle");
            return CycleReport::aborted(Vec::new());
        }

        transition(&mut state, State::Detecting);
        let Some((changes, current, failed_folders)) = self.detect_all().await else {
            let failed = self.folders.iter().map(|f| f.source.clone()).collect();
            error!("detection failed for every folder; aborting cycle");
            return CycleReport::aborted(failed);
        };
        info!(
            new = changes.new.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "detected changes"
        );

        transition(&mut state, State::Executing);
        let execution = self.executor.execute(&changes).await;

        transition(&mut state, State::Recording);
        let mut report = self.record(&execution, &current).await;
        report.failed_folders = failed_folders;

        transition(&mut state, State::Idle);
        report.state = state;
        info!(
            new = report.new,
            modified = report.modified,
            deleted = report.deleted,
            failed = report.failed.len(),
            failed_folders = report.failed_folders.len(),
            "cycle complete"
        );
        report
    }

    /// Detect every folder in configured order. `None` when every folder
    /// failed; otherwise the merged changes, the merged current state, and
    /// the folders that failed.
    async fn detect_all(&self) -> Option<(ChangeSet, Snapshot, Vec<String>)> {
        let mut changes = ChangeSet::default();
        let mut current = Snapshot::new();
        let mut failed = Vec::new();
        for folder in &self.folders {
            match self.detector.detect_folder(folder).await {
                Ok(detection) => {
                    changes.merge(detection.changes);
                    current.extend(detection.current);
                },
                Err(e) => {
                    warn!(folder = %folder.source, error = ?e, "skipping folder for this cycle");
                    failed.push(folder.source.clone());
                },
            }
        }
        match !self.folders.is_empty() && failed.len() == self.folders.len() {
            true => None,
            false => Some((changes, current, failed)),
        }
    }

    /// Append a version for every path that received a new live object.
    async fn record(&self, execution: &ExecutionReport, current: &Snapshot) -> CycleReport {
        let mut report = CycleReport {
            deleted: execution.deleted.len(),
            failed: execution.failed.clone(),
            ..CycleReport::default()
        };
        for path in &execution.new {
            if self.append(path, current, &mut report.failed).await {
                report.new += 1;
            }
        }
        for path in &execution.modified {
            if self.append(path, current, &mut report.failed).await {
                report.modified += 1;
            }
        }
        report
    }

    /// Record the next version of `path`, adding it to `failed` when the
    /// version store refuses.
    async fn append(&self, path: &str, current: &Snapshot, failed: &mut Vec<String>) -> bool {
        let mod_time = current.get(path).map(|state| state.mod_time.as_str()).unwrap_or_default();
        match self.versions.append_version(path, mod_time).await {
            Ok(version) => {
                info!(%path, version, "recorded version");
                true
            },
            Err(e) => {
                error!(%path, error = ?e, "stored new object but could not record its version");
                failed.push(path.to_string());
                false
            },
        }
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// The next cycle is armed only once the previous one has finished
    /// recording, `interval` after it finished. A shutdown that arrives
    /// mid-cycle lets that cycle complete and stops the loop before the next
    /// one. Returns the number of cycles run.
    pub async fn run_repeating(&self, interval: Duration, shutdown: impl Future<Output = ()>) -> usize {
        tokio::pin!(shutdown);
        let mut cycles = 0;
        loop {
            let report = self.run_cycle().await;
            cycles += 1;
            info!(state = %report.state, next_in = ?interval, "cycle finished; next cycle scheduled");
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(cycles, "shutdown requested; not scheduling another cycle");
                    return cycles;
                },
                () = tokio::time::sleep(interval) => {},
            }
        }
    }
}

fn transition(state: &mut State, next: State) {
    tracing::debug!(from = %state, to = %next, "cycle state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_aborted_report() {
        let report = CycleReport::aborted(vec!["/pub/data".to_string()]);
        assert!(report.is_aborted());
        assert_eq!(report.new + report.modified + report.deleted, 0);
    }

    #[rstest]
    #[case(State::Idle, "Idle")]
    #[case(State::Aborted, "Aborted")]
    fn test_state_display(#[case] state: State, #[case] expected: &str) {
        assert_eq!(state.to_string(), expected);
    }
}
