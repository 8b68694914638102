//! Object store on S3 or any service speaking its API (MinIO, Ceph RGW,
//! Backblaze B2).
//!
//! Keys live below an optional bucket prefix, so several mirrors can share
//! one bucket. Credentials come from the configuration file.
//!
//! TODO: accept `credentials: "profile:name"` so `~/.aws/credentials`
//! profiles work without copying keys into the config.

use crate::{
    FileInfo, StorageBackend,
    backend::{ChunkStream, FileInfoStream},
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

/// Upper bound on requests in flight against the bucket.
const MAX_IN_FLIGHT: usize = 100;

/// Mirror into an S3 bucket.
///
/// ```no_run
/// use hoard_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "mirror",
///     "archive-bucket",
///     Some("noaa".to_string()),
///     "us-east-1",
///     Some("https://s3.example.org"),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    /// Normalized, without trailing slash.
    prefix: Option<String>,
    in_flight: Arc<Semaphore>,
}

impl S3Backend {
    /// Build a client for `bucket`.
    ///
    /// `endpoint` selects a non-AWS service; path-style addressing is always
    /// used since most of those services need it. Nothing is sent to the
    /// service until the first operation.
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = match prefix.map(validate_path).transpose()? {
            Some(path) => Some(path.to_str().map(str::to_string).ok_or_raise(|| ErrorKind::InvalidPath(path.clone()))?),
            None => None,
        };
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(Credentials::new(key_id, key_secret, None, None, "hoard-config"))
            .region(Region::new(region.into()))
            // One attempt plus three retries with backoff.
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            .force_path_style(true);
        if let Some(endpoint) = endpoint {
            config = config.endpoint_url(endpoint);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config.build()),
            bucket: bucket.into(),
            prefix,
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        })
    }

    /// Bucket this backend writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Bucket key for a store key.
    fn bucket_key(&self, key: &Path) -> Result<String> {
        let key = validate_path(key)?;
        let key = key.to_str().ok_or_raise(|| ErrorKind::InvalidPath(key.clone()))?;
        Ok(join_prefix(self.prefix.as_deref(), key))
    }

    /// Store key for a bucket key returned by a listing.
    fn store_key(&self, bucket_key: &str) -> Result<PathBuf> {
        validate_path(strip_prefix(self.prefix.as_deref(), bucket_key))
    }

    /// Held for the duration of one request.
    async fn slot(&self) -> Result<OwnedSemaphorePermit> {
        self.in_flight
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::Backend("request limiter closed".to_string()))
    }

    /// Objects without a timestamp are dated at the epoch.
    fn timestamp(dt: Option<&DateTime>) -> Result<OffsetDateTime> {
        match dt {
            Some(dt) => OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
                .or_raise(|| ErrorKind::Backend(format!("timestamp {dt:?} out of range"))),
            None => Ok(OffsetDateTime::UNIX_EPOCH),
        }
    }

    fn map_sdk_error<E, R>(err: SdkError<E, R>, path: &Path) -> ErrorKind
    where
        E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        let detail = DisplayErrorContext(&err).to_string();
        match err.code() {
            Some("NoSuchKey" | "NotFound") => ErrorKind::NotFound(path.to_path_buf()),
            Some("AccessDenied") => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) => ErrorKind::Network(detail),
            _ => ErrorKind::Backend(detail),
        }
    }

    async fn list_page(&self, prefix: Option<&str>, token: Option<String>) -> Result<(Vec<FileInfo>, Option<String>)> {
        let _permit = self.slot().await?;
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(prefix.map(str::to_string))
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, Path::new(prefix.unwrap_or_default())))?;
        let mut files = Vec::with_capacity(output.contents().len());
        for object in output.contents() {
            let Some(key) = object.key() else { continue };
            // Keys ending in a slash are "directory markers" created by some
            // S3 tools; they have no content worth mirroring.
            if key.ends_with('/') {
                continue;
            }
            let size = object.size().unwrap_or_default().max(0) as u64;
            let modified = Self::timestamp(object.last_modified())?;
            files.push(FileInfo::new(self.store_key(key)?, size, modified));
        }
        let next = match output.is_truncated() {
            Some(true) => output.next_continuation_token().map(str::to_string),
            _ => None,
        };
        Ok((files, next))
    }
}

fn join_prefix(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
        None => key.to_string(),
    }
}

fn strip_prefix<'k>(prefix: Option<&str>, key: &'k str) -> &'k str {
    match prefix {
        Some(prefix) => {
            let prefix_normalized = prefix.trim_end_matches('/');
            key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
        },
        None => key,
    }
}

/// `CopySource` is `bucket/key` with every key segment percent-encoded.
fn copy_source(bucket: &str, key: &str) -> Result<String> {
    let mut url = Url::parse("s3://copy-source/").or_raise(|| ErrorKind::Backend("copy source".to_string()))?;
    url.path_segments_mut()
        .map_err(|()| ErrorKind::Backend("copy source URL cannot be a base".to_string()))?
        .clear()
        .push(bucket)
        .extend(key.split('/'));
    Ok(url.path().trim_start_matches('/').to_string())
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        // Component-based prefixes: "pub/data" must not match "pub/database".
        let full_prefix = match prefix.map(|p| self.bucket_key(p)).transpose() {
            Ok(Some(p)) => Some(format!("{p}/")),
            Ok(None) => self.prefix.as_ref().map(|p| format!("{}/", p.trim_end_matches('/'))),
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        Box::pin(stream! {
            let mut token = None;
            loop {
                match self.list_page(full_prefix.as_deref(), token.take()).await {
                    Ok((files, next)) => {
                        for file in files {
                            yield Ok(file);
                        }
                        match next {
                            Some(next) => token = Some(next),
                            None => break,
                        }
                    },
                    Err(e) => {
                        yield Err(e);
                        break;
                    },
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.bucket_key(path)?;
        let _permit = self.slot().await?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        let bytes = output.body.collect().await.map_err(|e| ErrorKind::Network(e.to_string()))?;
        Ok(bytes.into_bytes().to_vec())
    }

    fn read_stream<'a>(&'a self, path: &'a Path) -> ChunkStream<'a> {
        Box::pin(stream! {
            let key = match self.bucket_key(path) {
                Ok(key) => key,
                Err(e) => { yield Err(e); return; },
            };
            let permit = match self.slot().await {
                Ok(permit) => permit,
                Err(e) => { yield Err(e); return; },
            };
            let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
                Ok(output) => output,
                Err(e) => { yield Err(exn::Exn::from(Self::map_sdk_error(e, path))); return; },
            };
            let mut body = output.body;
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => yield Ok(bytes.to_vec()),
                    Err(e) => { yield Err(exn::Exn::from(ErrorKind::Network(e.to_string()))); break; },
                }
            }
            drop(permit);
        })
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.bucket_key(path)?;
        let _permit = self.slot().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        Ok(())
    }

    async fn upload(&self, path: &Path, source: &Path) -> Result<()> {
        let key = self.bucket_key(path)?;
        let body = ByteStream::from_path(source).await.map_err(|e| match source.exists() {
            false => ErrorKind::NotFound(source.to_path_buf()),
            true => ErrorKind::Backend(e.to_string()),
        })?;
        let _permit = self.slot().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let source = copy_source(&self.bucket, &self.bucket_key(from)?)?;
        let key = self.bucket_key(to)?;
        let _permit = self.slot().await?;
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(source)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, from))?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let key = self.bucket_key(path)?;
        let _permit = self.slot().await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        Ok(())
    }

    fn locate(&self, path: &Path) -> Result<String> {
        Ok(format!("s3://{}/{}", self.bucket, self.bucket_key(path)?))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = self.bucket_key(path)?;
        let _permit = self.slot().await?;
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        let size = output.content_length().unwrap_or_default().max(0) as u64;
        let modified = Self::timestamp(output.last_modified())?;
        Ok(FileInfo::new(validate_path(path)?, size, modified))
    }
}
