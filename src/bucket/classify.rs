use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use log::{error, info};

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};

/// Fewest separator-delimited segments a bucket path may have.
pub const MIN_PATH_SEGMENTS: usize = 5;
/// Archive subdirectory that receives buckets for every collection.
pub const ARCHIVE_SUBDIR: &str = "colddb";
/// Basename prefix of replicated buckets, which are never archived here.
pub const REPLICATED_PREFIX: &str = "rb_";

/// Logical collection (index) a bucket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(String);

impl CollectionName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything derived from a bucket path before any mutation happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocation {
    pub bucket: PathBuf,
    pub bucket_name: String,
    pub collection: CollectionName,
    /// `<archive_root>/<collection>/colddb`
    pub archive_dir: PathBuf,
    /// `<remote_prefix>/<collection>/`
    pub remote_prefix: String,
}

impl BucketLocation {
    /// Final home of the bucket inside the archive tree.
    pub fn destination(&self) -> PathBuf {
        self.archive_dir.join(&self.bucket_name)
    }
}

/// Drops trailing separators so the basename is the bucket directory itself.
pub fn normalize_bucket_path(path: &Path) -> PathBuf {
    let raw = path.as_os_str().to_string_lossy();
    let trimmed = raw.trim_end_matches(MAIN_SEPARATOR);
    if trimmed.is_empty() || trimmed.len() == raw.len() {
        path.to_path_buf()
    } else {
        PathBuf::from(trimmed)
    }
}

pub fn bucket_basename(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

/// Replicated buckets carry the `rb_` basename marker.
pub fn is_replicated(path: &Path) -> bool {
    bucket_basename(path).is_some_and(|name| name.starts_with(REPLICATED_PREFIX))
}

/// Takes the third-from-last separator-delimited segment of the path.
///
/// The split is a plain one on the host separator, so the empty segment in
/// front of an absolute path is counted.
pub fn collection_name(path: &Path) -> Result<CollectionName> {
    let raw = path.to_str().ok_or_else(|| ArchiveError::Classification {
        path: path.to_path_buf(),
        reason: "path is not valid UTF-8".to_string(),
    })?;
    let parts: Vec<&str> = raw.split(MAIN_SEPARATOR).collect();
    if parts.len() < MIN_PATH_SEGMENTS {
        error!("Unable to extract index name from bucket path {raw}");
        return Err(ArchiveError::Classification {
            path: path.to_path_buf(),
            reason: format!(
                "expected at least {MIN_PATH_SEGMENTS} path segments, found {}",
                parts.len()
            ),
        });
    }
    let name = parts[parts.len() - 3];
    if name.is_empty() {
        return Err(ArchiveError::Classification {
            path: path.to_path_buf(),
            reason: "collection segment is empty".to_string(),
        });
    }
    info!("Extracted index name from bucket path: {name}");
    Ok(CollectionName(name.to_string()))
}

/// Derives the archive directory and remote key prefix for a bucket.
pub fn classify(bucket: &Path, config: &ArchiveConfig) -> Result<BucketLocation> {
    let bucket = normalize_bucket_path(bucket);
    let collection = collection_name(&bucket)?;
    let bucket_name = bucket_basename(&bucket)
        .ok_or_else(|| ArchiveError::Classification {
            path: bucket.clone(),
            reason: "bucket path has no basename".to_string(),
        })?
        .to_string();

    let archive_dir = config
        .archive_root
        .join(collection.as_str())
        .join(ARCHIVE_SUBDIR);
    let remote_prefix = format!(
        "{}/{}/",
        config.remote_prefix.trim_end_matches('/'),
        collection
    );

    info!("Archive directory: {}", archive_dir.display());
    info!("Remote storage folder: {remote_prefix}");

    Ok(BucketLocation {
        bucket,
        bucket_name,
        collection,
        archive_dir,
        remote_prefix,
    })
}
