//! SQLite-backed [`VersionStore`].
//!
//! Each operation is a single parameterized statement loaded from
//! `queries/`. Version assignment happens inside one statement so the
//! "read latest, insert next" pair can never interleave with itself.

use crate::error::{ErrorKind, Result};
use crate::models::VersionRow;
use crate::{Database, VersionRecord, VersionStore};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqlitePool;
use tracing::debug;

fn to_version(value: i64) -> Result<u32> {
    u32::try_from(value).or_raise(|| ErrorKind::InvalidData("version number"))
}

/// Repository for the `versions` table.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_records(&self, query: &'static str, bind: Option<&str>) -> Result<Vec<VersionRecord>> {
        let rows: Vec<VersionRow> = sqlx::query_as(query)
            .bind(bind)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(VersionRecord::try_from).collect()
    }
}

#[async_trait]
impl VersionStore for Repository {
    async fn latest_version(&self, path: &str, include_archived: bool) -> Result<Option<u32>> {
        let latest: Option<i64> = sqlx::query_scalar(include_str!("../queries/latest_version.sql"))
            .bind(path)
            .bind(include_archived)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        latest.map(to_version).transpose()
    }

    async fn record_mod_time(&self, path: &str) -> Result<String> {
        let modified: Option<String> = sqlx::query_scalar(include_str!("../queries/record_mod_time.sql"))
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(modified.unwrap_or_default())
    }

    async fn append_version(&self, path: &str, mod_time: &str) -> Result<u32> {
        let mod_time = (!mod_time.is_empty()).then_some(mod_time);
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let version: i64 = sqlx::query_scalar(include_str!("../queries/append_version.sql"))
            .bind(path)
            .bind(mod_time)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        let version = to_version(version)?;
        debug!(target: "hoard::versions", path, version, "appended version");
        Ok(version)
    }

    async fn mark_archived(&self, archive_key: &str, path: &str, version: u32) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/mark_archived.sql"))
            .bind(archive_key)
            .bind(path)
            .bind(i64::from(version))
            .execute(&self.pool)
            .await;
        let result = match result {
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                exn::bail!(ErrorKind::KeyCollision(archive_key.to_string()))
            },
            other => other.or_raise(|| ErrorKind::Database)?,
        };
        if result.rows_affected() > 0 {
            debug!(target: "hoard::versions", path, version, key = archive_key, "marked version archived");
            return Ok(());
        }
        // Nothing updated: either there is no such row, or it was stamped
        // already. Tell the caller which.
        match self.get(path, version).await? {
            None => exn::bail!(ErrorKind::NotFound(path.to_string(), version)),
            Some(_) => exn::bail!(ErrorKind::AlreadyArchived(path.to_string(), version)),
        }
    }

    async fn get(&self, path: &str, version: u32) -> Result<Option<VersionRecord>> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_version.sql"))
            .bind(path)
            .bind(i64::from(version))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(VersionRecord::try_from).transpose()
    }

    async fn history(&self, path: &str) -> Result<Vec<VersionRecord>> {
        self.fetch_records(include_str!("../queries/history.sql"), Some(path)).await
    }

    async fn latest_per_path(&self, prefix: Option<&str>) -> Result<Vec<VersionRecord>> {
        // "/" and "" both mean everything.
        let prefix = prefix.map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty());
        self.fetch_records(include_str!("../queries/latest_per_path.sql"), prefix).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query(include_str!("../queries/ping.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}
