//! Upload of a relocated bucket tree to the remote store.
//!
//! Every regular file below the relocated bucket becomes one object whose key
//! is the remote prefix followed by the file's path relative to the archive
//! directory. Failures are per file: they are logged, recorded in the report
//! and the loop moves on. Nothing is retried or verified after the put.

use std::path::{Component, Path};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use walkdir::WalkDir;

use crate::config::ExistingObjectPolicy;
use crate::error::UploadError;
use crate::remote::{ObjectStore, PutOutcome, KEY_SEPARATOR};

/// Outcome of one upload pass.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    /// Number of files found under the relocated bucket.
    pub scanned_count: usize,

    /// Number of files written to the remote store.
    pub uploaded_count: usize,

    /// Number of files left alone because the key already existed.
    pub skipped_count: usize,

    /// Total bytes uploaded.
    pub bytes_uploaded: u64,

    /// `(key, error)` for every file that did not reach the store.
    pub failures: Vec<(String, String)>,

    /// Time taken for the pass.
    pub duration: Duration,
}

impl UploadReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Scanned: {}, Uploaded: {}, Skipped: {}, Failed: {}, Bytes: {}, Duration: {:?}",
            self.scanned_count,
            self.uploaded_count,
            self.skipped_count,
            self.failures.len(),
            self.bytes_uploaded,
            self.duration
        )
    }

    fn record_failure(&mut self, key: String, err: String) {
        self.failures.push((key, err));
    }
}

/// Builds the remote key of `file`: `prefix` + path relative to `archive_dir`,
/// always joined with forward slashes.
pub fn object_key(prefix: &str, archive_dir: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(archive_dir).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }

    let mut key = prefix.to_string();
    if !key.is_empty() && !key.ends_with(KEY_SEPARATOR) {
        key.push(KEY_SEPARATOR);
    }
    key.push_str(&parts.join("/"));
    Some(key)
}

/// Uploads every file under `bucket_dir`. Never fails as a whole.
pub fn upload_tree<S: ObjectStore + ?Sized>(
    store: &S,
    bucket_dir: &Path,
    archive_dir: &Path,
    prefix: &str,
    policy: ExistingObjectPolicy,
) -> UploadReport {
    let start = Instant::now();
    let mut report = UploadReport::default();

    for entry in WalkDir::new(bucket_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| bucket_dir.display().to_string());
                error!("Failed to list {path}. Error: {e}");
                report.record_failure(path, e.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        report.scanned_count += 1;

        let file_path = entry.path();
        let key = match object_key(prefix, archive_dir, file_path) {
            Some(key) => key,
            None => {
                error!(
                    "Failed to derive object key for {} relative to {}",
                    file_path.display(),
                    archive_dir.display()
                );
                report.record_failure(
                    file_path.display().to_string(),
                    "cannot derive object key".to_string(),
                );
                continue;
            }
        };

        match store.put_file(file_path, &key, policy) {
            Ok(PutOutcome::Uploaded { bytes }) => {
                info!("Successfully uploaded {} to {key}", file_path.display());
                report.uploaded_count += 1;
                report.bytes_uploaded += bytes;
            }
            Ok(PutOutcome::SkippedExisting) => {
                warn!(
                    "Object {key} already exists, skipping upload of {}",
                    file_path.display()
                );
                report.skipped_count += 1;
            }
            Err(UploadError::NotFound { path }) => {
                error!("File {} not found.", path.display());
                report.record_failure(key, format!("file {} not found", path.display()));
            }
            Err(e) => {
                error!("Failed to upload {}. Error: {e}", file_path.display());
                report.record_failure(key, e.to_string());
            }
        }
    }

    report.duration = start.elapsed();
    if report.has_failures() {
        warn!("Upload finished with failures: {}", report.summary());
    } else {
        info!("Upload finished: {}", report.summary());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingStore {
        keys: RefCell<Vec<String>>,
        fail_suffix: Option<&'static str>,
    }

    impl ObjectStore for RecordingStore {
        fn describe(&self) -> String {
            "recording".to_string()
        }

        fn put_file(
            &self,
            local_path: &Path,
            key: &str,
            _policy: ExistingObjectPolicy,
        ) -> Result<PutOutcome, UploadError> {
            if self.fail_suffix.is_some_and(|suffix| key.ends_with(suffix)) {
                return Err(UploadError::Status {
                    status: 503,
                    body: "ServerBusy".to_string(),
                });
            }
            self.keys.borrow_mut().push(key.to_string());
            let bytes = fs::metadata(local_path).map(|m| m.len()).unwrap_or(0);
            Ok(PutOutcome::Uploaded { bytes })
        }
    }

    fn relocated_bucket(temp: &TempDir) -> (PathBuf, PathBuf) {
        let archive_dir = temp.path().join("db").join("colddb");
        let bucket = archive_dir.join("db_1_1");
        fs::create_dir_all(bucket.join("rawdata")).unwrap();
        fs::write(bucket.join("rawdata").join("journal.gz"), b"j").unwrap();
        fs::write(bucket.join("1.tsidx.gz"), b"ii").unwrap();
        fs::write(bucket.join("journal.data"), b"ddd").unwrap();
        (archive_dir, bucket)
    }

    #[test]
    fn key_is_prefix_plus_relative_path() {
        let key = object_key(
            "frozen-buckets/db/",
            Path::new("/archive/db/colddb"),
            Path::new("/archive/db/colddb/db_1_1/rawdata/journal.gz"),
        );
        assert_eq!(
            key.as_deref(),
            Some("frozen-buckets/db/db_1_1/rawdata/journal.gz")
        );

        let key = object_key(
            "frozen-buckets/db",
            Path::new("/archive/db/colddb"),
            Path::new("/archive/db/colddb/db_1_1/x"),
        );
        assert_eq!(key.as_deref(), Some("frozen-buckets/db/db_1_1/x"));
    }

    #[test]
    fn key_requires_file_under_archive_dir() {
        assert!(object_key("p/", Path::new("/archive/a"), Path::new("/elsewhere/f")).is_none());
        assert!(object_key("p/", Path::new("/archive/a"), Path::new("/archive/a")).is_none());
    }

    #[test]
    fn every_file_is_uploaded_once() {
        let temp = TempDir::new().unwrap();
        let (archive_dir, bucket) = relocated_bucket(&temp);
        let store = RecordingStore::default();

        let report = upload_tree(
            &store,
            &bucket,
            &archive_dir,
            "frozen-buckets/db/",
            ExistingObjectPolicy::Overwrite,
        );

        assert_eq!(report.scanned_count, 3);
        assert_eq!(report.uploaded_count, 3);
        assert_eq!(report.bytes_uploaded, 6);
        assert!(!report.has_failures());
        let mut keys = store.keys.into_inner();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "frozen-buckets/db/db_1_1/1.tsidx.gz",
                "frozen-buckets/db/db_1_1/journal.data",
                "frozen-buckets/db/db_1_1/rawdata/journal.gz",
            ]
        );
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let temp = TempDir::new().unwrap();
        let (archive_dir, bucket) = relocated_bucket(&temp);
        let store = RecordingStore {
            fail_suffix: Some("1.tsidx.gz"),
            ..Default::default()
        };

        let report = upload_tree(
            &store,
            &bucket,
            &archive_dir,
            "frozen-buckets/db/",
            ExistingObjectPolicy::Overwrite,
        );

        assert_eq!(report.scanned_count, 3);
        assert_eq!(report.uploaded_count, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "frozen-buckets/db/db_1_1/1.tsidx.gz");
        assert!(report.failures[0].1.contains("503"));
        assert_eq!(store.keys.borrow().len(), 2);
    }
}
