//! In-memory object store for tests.

use super::{ChunkStream, FileInfoStream};
use crate::StorageBackend;
use crate::error::{Error, ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// Deliberately tiny so hashing code sees several chunks per object.
const CHUNK_SIZE: usize = 4;

#[derive(Clone)]
struct Object {
    data: Vec<u8>,
    modified: UtcDateTime,
}

impl Object {
    fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            modified: UtcDateTime::now(),
        }
    }

    fn info(&self, key: PathBuf) -> FileInfo {
        FileInfo::new(key, self.data.len() as u64, self.modified)
    }
}

/// Object store kept in a sorted map.
///
/// Keys passed to [`fail_on`](Self::fail_on) make any operation touching
/// them fail with a retryable [`Backend`](ErrorKind::Backend) error until
/// [`recover`](Self::recover) is called, which is how tests take the store
/// down for one object at a time.
///
/// ```
/// use hoard_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("pub/data/a.nc", b"netcdf...")]);
/// backend.copy(Path::new("pub/data/a.nc"), Path::new("archive/0f3c")).await?;
/// assert_eq!(backend.keys().await.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    objects: RwLock<BTreeMap<PathBuf, Object>>,
    broken: RwLock<HashSet<PathBuf>>,
}

impl MockBackend {
    /// Seed the store with objects.
    ///
    /// # Panics
    /// On any key that fails validation; a fixture like that is a bug in
    /// the test.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let objects = files
            .into_iter()
            .map(|(key, data)| {
                let key = key.into();
                match validate_path(&key) {
                    Ok(key) => (key, Object::new(data)),
                    Err(_) => panic!("MockBackend::with_files: invalid path {}", key.display()),
                }
            })
            .collect();
        Self {
            name: "mock".to_string(),
            objects: RwLock::new(objects),
            broken: RwLock::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fail every later operation on `key`.
    pub async fn fail_on(&self, key: impl AsRef<Path>) {
        if let Ok(key) = validate_path(key.as_ref()) {
            self.broken.write().await.insert(key);
        }
    }

    /// Undo [`fail_on`](Self::fail_on).
    pub async fn recover(&self, key: impl AsRef<Path>) {
        if let Ok(key) = validate_path(key.as_ref()) {
            self.broken.write().await.remove(&key);
        }
    }

    /// Every key currently stored, in order.
    pub async fn keys(&self) -> Vec<PathBuf> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Validate `key` and apply any injected failure.
    async fn reachable(&self, key: &Path) -> Result<PathBuf> {
        let key = validate_path(key)?;
        if self.broken.read().await.contains(&key) {
            exn::bail!(ErrorKind::Backend(format!("injected failure for {}", key.display())));
        }
        Ok(key)
    }

    async fn object(&self, key: PathBuf) -> Result<Object> {
        match self.objects.read().await.get(&key) {
            Some(object) => Ok(object.clone()),
            None => Err(Error::from(ErrorKind::NotFound(key))),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_files(Vec::<(PathBuf, Vec<u8>)>::new())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let prefix = match prefix.map(validate_path).transpose() {
            Ok(prefix) => prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        Box::pin(stream! {
            // Collected first so the lock is not held across yields.
            let listing: Vec<FileInfo> = self
                .objects
                .read()
                .await
                .iter()
                .filter(|(key, _)| prefix.as_ref().is_none_or(|pfx| key.starts_with(pfx)))
                .map(|(key, object)| object.info(key.clone()))
                .collect();
            for info in listing {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.reachable(path).await?;
        Ok(self.objects.read().await.contains_key(&key))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.reachable(path).await?;
        Ok(self.object(key).await?.data)
    }

    fn read_stream<'a>(&'a self, path: &'a Path) -> ChunkStream<'a> {
        Box::pin(stream! {
            match self.read(path).await {
                Ok(data) => for chunk in data.chunks(CHUNK_SIZE) {
                    yield Ok(chunk.to_vec());
                },
                Err(e) => yield Err(e),
            }
        })
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.reachable(path).await?;
        self.objects.write().await.insert(key, Object::new(data));
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let from = self.reachable(from).await?;
        let to = self.reachable(to).await?;
        let object = self.object(from).await?;
        self.objects.write().await.insert(to, Object::new(object.data));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let key = self.reachable(path).await?;
        match self.objects.write().await.remove(&key) {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::NotFound(key)),
        }
    }

    fn locate(&self, path: &Path) -> Result<String> {
        Ok(format!("mock://{}", validate_path(path)?.display()))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = self.reachable(path).await?;
        Ok(self.object(key.clone()).await?.info(key))
    }
}
