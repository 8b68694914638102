//! The object store seam.
//!
//! The sync pipeline only ever talks to [`StorageBackend`]; the mirror can
//! live on a mounted filesystem, in an S3 bucket, or (in tests) in memory.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub(crate) type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send + 'a>>;

/// Unified interface for object store backends.
///
/// All operations are asynchronous; each call is a natural suspension and
/// cancellation point. It's a glorified CRUD interface with a server-side
/// copy bolted on.
///
/// # Path Handling
/// All keys are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use hoard_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of_live_object(backend: &dyn StorageBackend) -> Result<u64> {
///     let key = Path::new("pub/data/a.nc");
///     if backend.exists(key).await? {
///         Ok(backend.stat(key).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List all objects matching an optional prefix.
    ///
    /// Buffers [`list_stream()`](Self::list_stream); prefer the stream for
    /// large trees.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream object metadata matching an optional prefix.
    ///
    /// The prefix is component-based: `pub/data` matches `pub/data/a.nc`
    /// but not `pub/database/b.nc`. Listing a prefix that does not exist
    /// yields nothing rather than an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use hoard_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(Some(Path::new("pub/data")));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if an object exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read the complete object into memory.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Stream the object's bytes in backend-sized chunks.
    ///
    /// Used for hashing objects that may be far too large to buffer. A
    /// missing object surfaces as a [`NotFound`](crate::error::ErrorKind::NotFound)
    /// item.
    ///
    /// ```no_run
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use hoard_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut total = 0;
    /// let mut chunks = backend.read_stream(Path::new("pub/big.tar"));
    /// while let Some(chunk) = chunks.try_next().await? {
    ///     total += chunk.len();
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn read_stream<'a>(&'a self, path: &'a Path) -> ChunkStream<'a>;

    /// Write object contents, replacing any existing object.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Upload a local file as the object at `path`.
    ///
    /// The default implementation reads the whole file into memory and
    /// delegates to [`write()`](Self::write); backends able to stream from
    /// disk should override it.
    async fn upload(&self, path: &Path, source: &Path) -> Result<()> {
        let data = tokio::fs::read(source).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(source.to_path_buf()),
            _ => ErrorKind::Io(e),
        })?;
        self.write(path, &data).await
    }

    /// Copy an object to another key within the same backend.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// does not exist. An existing destination is overwritten.
    async fn copy(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete an object.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    ///
    /// # Notes
    /// - S3 cannot tell a missing key from a deleted one; it always succeeds.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Address of the object for tools running outside this process, such
    /// as the bulk-move command (`s3://bucket/key`, or an absolute path for
    /// filesystem backends).
    fn locate(&self, path: &Path) -> Result<String>;

    /// Get object metadata without reading contents (a head request).
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
