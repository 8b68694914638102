//! The sync pipeline: what changed on the remote, what to do about it, and
//! the cycle that ties the two together.
//!
//! - [`detect`] compares the mirror's previous state with the remote's
//!   current state and classifies every path.
//! - [`archive`] moves superseded bytes to a content-addressed key before
//!   anything overwrites or deletes them.
//! - [`execute`] applies a [`ChangeSet`](detect::ChangeSet) one path at a
//!   time.
//! - [`orchestrate`] runs detect → execute → record cycles, once or on a
//!   schedule.

pub mod archive;
pub mod detect;
pub mod error;
pub mod execute;
pub mod orchestrate;

pub use crate::archive::Archiver;
pub use crate::detect::{ChangeSet, Detection, Detector, FileState};
pub use crate::execute::{Action, ExecuteEvent, ExecutionReport, Executor};
pub use crate::orchestrate::{CycleReport, Orchestrator, State};
