//! One archival run: classify, check, transform, relocate, upload.
//!
//! The stages run strictly in order and never loop back. Any fatal error stops
//! the run at the stage that raised it; in particular nothing is uploaded once
//! relocation has failed, and a transform that already happened is not undone.

use std::path::PathBuf;

use log::{error, info};

use crate::bucket::{
    classify, detect_format, ensure_archive_dir, is_replicated, normalize_bucket_path,
    relocate_bucket, transform_bucket, BucketFormat, BucketLocation, TransformStats,
    REPLICATED_PREFIX,
};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};
use crate::remote::ObjectStore;
use crate::upload::{upload_tree, UploadReport};

/// Arguments of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    pub bucket: PathBuf,
    /// Keep (gzipped) index files even when the bucket has a journal.
    pub search_files_required: bool,
}

impl ArchiveRequest {
    pub fn new(bucket: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            search_files_required: false,
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub location: BucketLocation,
    pub format: BucketFormat,
    pub transform: TransformStats,
    pub archived_path: PathBuf,
    pub upload: UploadReport,
}

/// Terminal state of a run that did not fail.
#[derive(Debug, Clone)]
pub enum ArchiveOutcome {
    /// Replicated bucket; nothing was touched.
    Skipped { bucket: PathBuf },
    /// Bucket archived; individual uploads may still have failed.
    Completed(ArchiveSummary),
}

pub struct Pipeline<'a, S: ObjectStore + ?Sized> {
    config: &'a ArchiveConfig,
    store: &'a S,
}

impl<'a, S: ObjectStore + ?Sized> Pipeline<'a, S> {
    pub fn new(config: &'a ArchiveConfig, store: &'a S) -> Self {
        Self { config, store }
    }

    /// Runs every stage for `request`, logging the terminal state.
    pub fn run(&self, request: &ArchiveRequest) -> Result<ArchiveOutcome> {
        let result = self.run_stages(request);
        match &result {
            Ok(ArchiveOutcome::Skipped { .. }) => {}
            Ok(ArchiveOutcome::Completed(summary)) => info!(
                "Archival of {} completed: {} files uploaded, {} skipped, {} failed",
                summary.archived_path.display(),
                summary.upload.uploaded_count,
                summary.upload.skipped_count,
                summary.upload.failures.len()
            ),
            Err(e) => error!("Archival of {} failed: {e}", request.bucket.display()),
        }
        result
    }

    fn run_stages(&self, request: &ArchiveRequest) -> Result<ArchiveOutcome> {
        if request.bucket.as_os_str().is_empty() {
            return Err(ArchiveError::Usage("bucket path is required".to_string()));
        }
        let bucket = normalize_bucket_path(&request.bucket);
        info!("Bucket provided: {}", bucket.display());

        if is_replicated(&bucket) {
            info!(
                "Skipping bucket {} as it starts with '{REPLICATED_PREFIX}'",
                bucket.display()
            );
            return Ok(ArchiveOutcome::Skipped { bucket });
        }

        if !bucket.is_dir() {
            error!("Given bucket is not a valid directory: {}", bucket.display());
            return Err(ArchiveError::InvalidBucket {
                path: bucket,
                reason: "not a directory",
            });
        }

        let location = classify(&bucket, self.config)?;
        ensure_archive_dir(&location.archive_dir)?;

        let format = detect_format(&location.bucket, request.search_files_required)?;
        info!("Bucket {} is {format}", location.bucket.display());
        let transform =
            transform_bucket(&location.bucket, format, &self.config.index_extensions)?;

        let archived_path = relocate_bucket(&location.bucket, &location.archive_dir)?;

        info!("Uploading to {}", self.store.describe());
        let upload = upload_tree(
            self.store,
            &archived_path,
            &location.archive_dir,
            &location.remote_prefix,
            self.config.on_existing_remote_object,
        );

        Ok(ArchiveOutcome::Completed(ArchiveSummary {
            location,
            format,
            transform,
            archived_path,
            upload,
        }))
    }
}
