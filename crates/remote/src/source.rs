use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub type RemoteHandle = Arc<dyn RemoteSource + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Devices, sockets and anything else that is never mirrored.
    Other,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name within its directory (no slashes).
    pub name: String,
    pub size: u64,
    /// Modification time exactly as the remote reports it. Only ever
    /// compared for equality, never parsed.
    pub mod_time: String,
    pub kind: EntryKind,
}
impl RemoteEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// A remote file tree.
///
/// Callers bracket a batch of listings with [`connect`](Self::connect) and
/// [`disconnect`](Self::disconnect); `disconnect` must be called even when a
/// listing in between failed.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Name of the remote, used for logging only.
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    /// Entries directly inside `directory` (an absolute remote path).
    async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>>;

    /// Copy the remote file at `path` to the local file `destination`,
    /// creating parent directories as needed.
    async fn fetch(&self, path: &str, destination: &Path) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
