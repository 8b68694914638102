//! SQLite pool for the version store.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// One orchestrator writes; the remaining connections serve operator
/// queries (`hoard history`, `hoard latest`) running alongside a cycle.
const MAX_CONNECTIONS: u32 = 4;
/// How long a writer waits on a reader's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection settings not covered by [`SqliteConnectOptions`].
const CONNECTION_PRAGMAS: &str = r#"
    PRAGMA wal_autocheckpoint = 1000;
    PRAGMA cache_size = -2048;
    PRAGMA temp_store = MEMORY;
"#;

/// Connection pool holding the `versions` table.
///
/// Migrations run on every connect, so a freshly created file is usable
/// straight away. Queries live in [`Repository`](crate::Repository).
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if necessary) the database file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::options().filename(path.as_ref()).create_if_missing(true);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// Open a private in-memory database.
    ///
    /// Not `#[cfg(test)]`: other crates build their test fixtures on it.
    /// The pool is limited to a single connection, since every in-memory
    /// connection would otherwise see its own empty database.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::open(Self::options().filename(":memory:"), 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Runs for every pooled connection, not only the first.
            .after_connect(|conn, meta| Box::pin(async move { Self::configure(conn, meta).await }))
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    fn options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            // Rows are never deleted, so there is nothing to reclaim.
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    async fn configure(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(CONNECTION_PRAGMAS).execute(conn).await?;
        Ok(())
    }

    #[instrument("applying version store migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for outstanding connections and close the pool. The database
    /// must not be used afterwards.
    pub async fn close(&self) {
        // Refresh query planner statistics on the way out; failure is harmless.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
