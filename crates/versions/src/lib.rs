//! Durable version history for mirrored files.
//!
//! Every remote path the mirror has ever seen gets a monotonically increasing
//! sequence of version numbers, starting at 1 with no gaps. The newest row
//! without an archive key is the *live* version, whose bytes sit at the
//! path's own object key; every other row names the content-addressed key its
//! superseded bytes were archived under.
//!
//! # Architecture
//! - [`Database`] owns the SQLite pool and applies embedded migrations.
//! - [`Repository`] runs one parameterized statement per operation.
//! - [`VersionStore`] is the seam the sync pipeline depends on, so tests and
//!   alternative stores can be injected as a [`StoreHandle`].
//!
//! The store assumes a single orchestrator: version numbers are assigned by a
//! read-latest-then-insert statement, which is atomic within one SQLite
//! transaction but not across competing writers in separate processes.

mod db;
pub mod error;
mod models;
mod repo;
mod store;

pub use crate::db::Database;
pub use crate::models::VersionRecord;
pub use crate::repo::Repository;
pub use crate::store::{StoreHandle, VersionStore};
