//! Object store on a mounted filesystem.
//!
//! Keys map one-to-one onto files below a root directory. Intermediate
//! directories are created on write and never removed, which matches how
//! prefix listings behave on S3.

use crate::backend::{ChunkStream, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::{FileInfo, StorageBackend, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::OptionExt;
use std::fs::Metadata;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};
use tokio::io::AsyncReadExt;

/// Chunk size used when streaming objects off disk.
const READ_CHUNK_SIZE: usize = 1024 * 1024;

/// What the directory walk does with one entry.
enum Visit {
    Yield(FileInfo),
    Enter(PathBuf),
    Ignore,
}

/// Mirror onto a local or network-mounted directory.
///
/// ```no_run
/// use hoard_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/srv/mirror")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Open the store rooted at `root`, creating the directory when missing.
    ///
    /// Fails with [`InvalidPath`](ErrorKind::InvalidPath) for a relative
    /// root or one that names something other than a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        // Blocking is fine here: this runs once at startup.
        std::fs::create_dir_all(&root).map_err(|e| Self::map_io_error(e, &root))?;
        Ok(Self { name: name.into(), root })
    }

    fn absolute_path(&self, key: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(key.as_ref())?))
    }

    /// Key of a file found while walking the root.
    fn key_of(&self, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute
            .strip_prefix(&self.root)
            .ok()
            .ok_or_raise(|| ErrorKind::Backend(format!("{} is outside {}", absolute.display(), self.root.display())))?;
        validate_path(relative)
    }

    fn file_info(key: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(FileInfo::new(key, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, key: &Path) -> ErrorKind {
        match e.kind() {
            IoErrorKind::NotFound => ErrorKind::NotFound(key.to_path_buf()),
            IoErrorKind::PermissionDenied => ErrorKind::PermissionDenied(key.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn ensure_parent(&self, absolute: &Path, key: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, key))?;
        }
        Ok(())
    }

    /// Decide what to do with one directory entry. Kept out of the stream
    /// body so errors can use `?`.
    async fn visit(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<Visit> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let key = self.key_of(&path)?;
        let under_prefix = prefix.is_none_or(|pfx| key.starts_with(pfx));
        if metadata.is_dir() {
            // Directories above the prefix still lead to it.
            let towards_prefix = prefix.is_some_and(|pfx| pfx.starts_with(&key));
            return Ok(match under_prefix || towards_prefix {
                true => Visit::Enter(path),
                false => Visit::Ignore,
            });
        }
        // Anything that is neither a file nor a directory is a dangling symlink.
        Ok(match under_prefix && metadata.is_file() {
            true => Visit::Yield(Self::file_info(&key, metadata)?),
            false => Visit::Ignore,
        })
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let prefix = match prefix.map(validate_path).transpose() {
            Ok(prefix) => prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        let mut pending = vec![self.root.clone()];

        Box::pin(stream! {
            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    // A missing prefix lists as empty, as it does on S3.
                    Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                    Err(e) => {
                        yield Err(exn::Exn::from(Self::map_io_error(e, &dir)));
                        continue;
                    }
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(exn::Exn::from(Self::map_io_error(e, &dir)));
                            break;
                        },
                    };
                    match self.visit(entry, prefix.as_deref()).await {
                        Ok(Visit::Yield(info)) => yield Ok(info),
                        Ok(Visit::Enter(sub)) => pending.push(sub),
                        Ok(Visit::Ignore) => {},
                        Err(e) => yield Err(e),
                    }
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    fn read_stream<'a>(&'a self, path: &'a Path) -> ChunkStream<'a> {
        Box::pin(stream! {
            let abs_path = match self.absolute_path(path) {
                Ok(p) => p,
                Err(e) => { yield Err(e); return; },
            };
            let mut file = match fs::File::open(&abs_path).await {
                Ok(f) => f,
                Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, path))); return; },
            };
            loop {
                let mut buffer = vec![0; READ_CHUNK_SIZE];
                match file.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buffer.truncate(n);
                        yield Ok(buffer);
                    },
                    Err(e) => { yield Err(exn::Exn::from(ErrorKind::Io(e))); return; },
                }
            }
        })
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        self.ensure_parent(&abs_path, path).await?;
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn upload(&self, path: &Path, source: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        self.ensure_parent(&abs_path, path).await?;
        fs::copy(source, &abs_path).await.map_err(|e| Self::map_io_error(e, source))?;
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        self.ensure_parent(&to_path, to).await?;
        fs::copy(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, from))?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    fn locate(&self, path: &Path) -> Result<String> {
        let abs_path = self.absolute_path(path)?;
        abs_path
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidPath(abs_path.clone())))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::file_info(&validate_path(path)?, metadata)
    }
}
