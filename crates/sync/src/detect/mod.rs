//! Change detection.
//!
//! Detection for one [`SyncFolder`](hoard_remote::SyncFolder) builds two
//! snapshots keyed by absolute remote path:
//!
//! - the **previous** state, from the object store listing (sizes) and the
//!   version store (modification times), and
//! - the **current** state, from a filtered scan of the remote plus one
//!   listing per directory the scan touched.
//!
//! [`detect`] then classifies every path in either snapshot as new,
//! modified, deleted or unchanged. Detection never mutates anything, which
//! makes it the only stage of a cycle that can fail without consequences.

mod changes;
pub mod error;
mod state;

pub use self::changes::{ChangeSet, FileState, Snapshot, detect, is_checksum_sidecar};
pub use self::state::{Detection, Detector};
