use crate::error::{Error, ErrorKind};
use exn::ResultExt;

/// One row of a path's version history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    /// Absolute remote path, e.g. `/pub/data/a.nc`.
    pub path: String,
    pub version: u32,
    /// Remote modification time as reported by the remote listing; opaque.
    pub modified: Option<String>,
    /// Content-addressed key the bytes were archived under, once superseded.
    pub archive_key: Option<String>,
}
impl VersionRecord {
    /// The live version is the one whose bytes have not been archived.
    pub fn is_live(&self) -> bool {
        self.archive_key.is_none()
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct VersionRow {
    pub(crate) path_name: String,
    pub(crate) version_num: i64,
    pub(crate) date_modified: Option<String>,
    pub(crate) archive_key: Option<String>,
}
impl TryFrom<VersionRow> for VersionRecord {
    type Error = Error;
    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            path: row.path_name,
            version: u32::try_from(row.version_num).or_raise(|| ErrorKind::InvalidData("version number"))?,
            modified: row.date_modified,
            archive_key: row.archive_key,
        })
    }
}
