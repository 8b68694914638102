//! Object keys, remote paths and key validation.
//!
//! Remote paths are absolute (`/pub/data/a.nc`); object keys are the same
//! path relative to the backend root (`pub/data/a.nc`). Superseded objects
//! live under [`ARCHIVE_PREFIX`], named by their archive key.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

/// Namespace holding archived (superseded) objects.
pub const ARCHIVE_PREFIX: &str = "archive";

/// Object key of the live copy of a remote path.
///
/// Remote paths under `/archive` have no live key: it would share the
/// namespace of archived objects, which listings of live objects skip.
///
/// ```
/// use std::path::Path;
/// use hoard_storage::key_for_remote;
/// assert_eq!(key_for_remote("/pub/data/a.nc").unwrap(), Path::new("pub/data/a.nc"));
/// assert!(key_for_remote("/../etc/passwd").is_err());
/// assert!(key_for_remote("/archive/a.nc").is_err());
/// ```
pub fn key_for_remote(remote: &str) -> Result<PathBuf> {
    let key = validate(remote)?;
    if key.starts_with(ARCHIVE_PREFIX) {
        exn::bail!(ErrorKind::Reserved(key));
    }
    Ok(key)
}

/// Remote path for a live object key. Returns `None` for non-UTF-8 keys,
/// which can never have come from a remote listing.
pub fn remote_for_key(key: &Path) -> Option<String> {
    let mut remote = String::new();
    for component in key.components() {
        if let Component::Normal(segment) = component {
            remote.push('/');
            remote.push_str(segment.to_str()?);
        }
    }
    (!remote.is_empty()).then_some(remote)
}

/// Object key an archived object is stored under.
pub fn archive_key_path(archive_key: &str) -> PathBuf {
    Path::new(ARCHIVE_PREFIX).join(archive_key)
}

/// Normalize a key so it names something inside the store root.
///
/// Leading slashes, `.` segments and repeated separators are dropped and
/// `..` is resolved lexically. The key is rejected when it resolves to the
/// root itself, climbs above it, carries a Windows drive prefix, or contains
/// a NUL byte.
///
/// ```
/// use std::path::Path;
/// use hoard_storage::validate_path;
/// assert_eq!(validate_path("/pub//data/./a.nc").unwrap(), Path::new("pub/data/a.nc"));
/// assert_eq!(validate_path("pub/tmp/../a.nc").unwrap(), Path::new("pub/a.nc"));
/// assert!(validate_path("pub/../../a.nc").is_err());
/// assert!(validate_path("/").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || Error::from(ErrorKind::InvalidPath(path.to_path_buf()));
    let mut segments: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => continue,
            Component::Prefix(_) => return Err(invalid()),
            Component::ParentDir => {
                segments.pop().ok_or_else(invalid)?;
            },
            // `components()` lets NUL through; the filesystem would truncate at it.
            Component::Normal(segment) if segment.as_encoded_bytes().contains(&0) => return Err(invalid()),
            Component::Normal(segment) => segments.push(segment),
        }
    }
    match segments.is_empty() {
        true => Err(invalid()),
        false => Ok(segments.into_iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pub/data/a.nc", "pub/data/a.nc")]
    #[case("/pub/data/a.nc", "pub/data/a.nc")]
    #[case("pub//data///a.nc", "pub/data/a.nc")]
    #[case("./pub/./a.nc", "pub/a.nc")]
    #[case("pub/data/", "pub/data")]
    #[case("pub/tmp/../a.nc", "pub/a.nc")]
    #[case("archive/0f3c", "archive/0f3c")]
    fn test_normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case("/")]
    #[case("./.")]
    #[case("..")]
    #[case("../etc/passwd")]
    #[case("/../outside")]
    #[case("pub/../../a.nc")]
    #[case("pub/a\0.nc")]
    fn test_rejects(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(p) if p == Path::new(input)));
    }

    #[test]
    fn test_remote_key_round_trip() {
        let key = key_for_remote("/pub/data/a.nc.md5").unwrap();
        assert_eq!(key, Path::new("pub/data/a.nc.md5"));
        assert_eq!(remote_for_key(&key).as_deref(), Some("/pub/data/a.nc.md5"));
        assert_eq!(remote_for_key(Path::new("")), None);
    }

    #[rstest]
    #[case("/archive")]
    #[case("/archive/x.nc")]
    #[case("/pub/../archive/x.nc")]
    fn test_remote_paths_in_archive_namespace_are_reserved(#[case] remote: &str) {
        let err = key_for_remote(remote).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Reserved(_)));
    }

    #[rstest]
    #[case("/archives/x.nc", "archives/x.nc")]
    #[case("/pub/archive/x.nc", "pub/archive/x.nc")]
    fn test_archive_lookalikes_are_live_keys(#[case] remote: &str, #[case] key: &str) {
        assert_eq!(key_for_remote(remote).unwrap(), Path::new(key));
    }

    #[test]
    fn test_archive_key_path() {
        assert_eq!(archive_key_path("ab12"), Path::new("archive/ab12"));
    }
}
