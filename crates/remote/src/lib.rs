//! Access to the remote file tree being mirrored.
//!
//! The remote is an rsync daemon. Three capabilities are exposed, each
//! behind a trait so the sync pipeline can be driven by in-memory doubles:
//! - [`RemoteSource`]: list one directory, fetch one file.
//! - [`CommandRunner`]: run an external program and capture its output.
//! - [`FilteredScan`]: a dry, filter-aware walk of a [`SyncFolder`] that
//!   yields the files worth inspecting and the directories holding them.

pub mod error;
mod folder;
#[cfg(feature = "mock")]
mod mock;
mod rsync;
mod runner;
mod scan;
mod source;

pub use crate::folder::SyncFolder;
#[cfg(feature = "mock")]
pub use crate::mock::{MockRemote, MockRunner};
pub use crate::rsync::RsyncRemote;
pub use crate::runner::{CommandOutput, CommandRunner, RunnerHandle, SystemRunner};
pub use crate::scan::{FilteredScan, ScanResult, parse_itemized};
pub use crate::source::{EntryKind, RemoteEntry, RemoteHandle, RemoteSource};
