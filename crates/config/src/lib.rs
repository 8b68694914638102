//! Configuration for the `hoard` mirror.
//!
//! Values are layered with [`figment`]: built-in defaults, then a YAML, TOML
//! or JSON file, then `HOARD_` environment variables (`__` separates nested
//! keys, so `HOARD_STORAGE__BUCKET=mirror` sets `storage.bucket`).
//!
//! ```yaml
//! remote:
//!   server: rsync.example.org
//! storage:
//!   bucket: mirror
//!   region: us-east-1
//!   key_id: AKIA...
//!   key_secret: ...
//! staging: /var/lib/hoard/staging
//! folders:
//!   - source: /pub/data
//!     filters: ["+ */", "+ *.nc", "- *"]
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use hoard_remote::SyncFolder;
use hoard_storage::key_for_remote;
use hoard_sync::archive::{DEFAULT_BULK_MOVE, DEFAULT_LARGE_OBJECT_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECS: u64 = 24 * 60 * 60;
const ENV_PREFIX: &str = "HOARD_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "hoard")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
    /// SQLite version database. Defaults to the platform data directory.
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Local staging root for fetched files. Defaults to the platform cache
    /// directory.
    #[serde(default)]
    pub staging: Option<PathBuf>,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub folders: Vec<SyncFolder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// rsync daemon host, e.g. `rsync.example.org`.
    pub server: String,
    /// rsync program; a bare name is looked up on `PATH`.
    #[serde(default = "default_rsync")]
    pub rsync: String,
}

fn default_rsync() -> String {
    "rsync".to_string()
}

/// Where mirrored objects are stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StorageConfig {
    /// A directory on a local (or mounted) filesystem.
    Local { local: PathBuf },
    S3(S3Config),
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Key prefix all objects are stored under.
    #[serde(default)]
    pub prefix: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Objects at least this large are relocated by the bulk-move command
    /// instead of an in-service copy.
    #[serde(default = "default_threshold")]
    pub large_object_threshold: u64,
    /// Command prefix for bulk moves; source and destination are appended.
    #[serde(default = "default_bulk_move")]
    pub bulk_move: Vec<String>,
}
impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            large_object_threshold: default_threshold(),
            bulk_move: default_bulk_move(),
        }
    }
}

fn default_threshold() -> u64 {
    DEFAULT_LARGE_OBJECT_THRESHOLD
}

fn default_bulk_move() -> Vec<String> {
    DEFAULT_BULK_MOVE.map(String::from).to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Keep running cycles until interrupted.
    #[serde(default)]
    pub repeat: bool,
    /// Seconds between the end of one cycle and the start of the next.
    #[serde(default = "default_interval")]
    pub interval: u64,
}
impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            repeat: false,
            interval: default_interval(),
        }
    }
}
impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

impl Config {
    /// Default location of the configuration file:
    /// `<platform config dir>/hoard/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Load from `path` (or the default location when `None`), apply
    /// environment overrides, and validate.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = match path {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::Invalid(format!("config file {} does not exist", path.display())));
                }
                Figment::new().merge(Self::file_provider(path)?)
            },
            None => match Self::default_path() {
                Some(default) => {
                    tracing::debug!(path = %default.display(), "looking for configuration in default location");
                    Figment::new().merge(Yaml::file(default))
                },
                None => Figment::new(),
            },
        };
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn file_provider(path: &Path) -> Result<Figment> {
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("yaml" | "yml") => Figment::from(Yaml::file(path)),
            Some("toml") => Figment::from(Toml::file(path)),
            Some("json") => Figment::from(Json::file(path)),
            _ => exn::bail!(ErrorKind::Invalid(format!(
                "unsupported config format for {} (expected yaml, toml or json)",
                path.display()
            ))),
        })
    }

    /// Extract and validate from an already layered [`Figment`].
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(message: impl Into<String>) -> Result<()> {
            exn::bail!(ErrorKind::Invalid(message.into()))
        }
        if self.remote.server.trim().is_empty() {
            return invalid("remote.server must not be empty");
        }
        if self.folders.is_empty() {
            return invalid("at least one folder must be configured");
        }
        for folder in &self.folders {
            if !folder.source.starts_with('/') {
                return invalid(format!("folder source {:?} must be an absolute remote path", folder.source));
            }
            // The remote root maps to no key at all; every other source must
            // map to a live key outside the archive namespace.
            if !folder.root().is_empty() && key_for_remote(folder.root()).is_err() {
                return invalid(format!("folder source {:?} cannot be mirrored", folder.source));
            }
        }
        if let StorageConfig::Local { local } = &self.storage
            && !local.is_absolute()
        {
            return invalid(format!("storage.local {} must be absolute", local.display()));
        }
        if let Some(staging) = &self.staging
            && !staging.is_absolute()
        {
            return invalid(format!("staging {} must be absolute", staging.display()));
        }
        if self.archive.large_object_threshold == 0 {
            return invalid("archive.large_object_threshold must be greater than zero");
        }
        if self.archive.bulk_move.is_empty() {
            return invalid("archive.bulk_move must name a command");
        }
        if self.schedule.interval == 0 {
            return invalid("schedule.interval must be greater than zero");
        }
        Ok(())
    }

    /// The configured database path, or the platform default.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().join("versions.sqlite"))
                .ok_or_raise(|| ErrorKind::Invalid("no database path configured and no home directory".to_string())),
        }
    }

    /// The configured staging root, or the platform default.
    pub fn staging_path(&self) -> Result<PathBuf> {
        match &self.staging {
            Some(path) => Ok(path.clone()),
            None => project_dirs()
                .map(|dirs| dirs.cache_dir().join("staging"))
                .ok_or_raise(|| ErrorKind::Invalid("no staging path configured and no home directory".to_string())),
        }
    }
}
