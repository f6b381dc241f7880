//! In-place rewrite of a bucket's top-level files ahead of archival.
//!
//! Only entries directly inside the bucket directory are considered;
//! `rawdata/` and any other subdirectory are never opened. Neither path is
//! transactional: an interrupted run leaves a partially transformed bucket.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};

use crate::bucket::format::BucketFormat;
use crate::error::{ArchiveError, Result};

const GZ_SUFFIX: &str = ".gz";

/// Counters for one transform pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Loose files deleted outright (new-style).
    pub removed_count: usize,
    /// Index files replaced by a gzip sibling (old-style).
    pub compressed_count: usize,
    /// Uncompressed size of the compressed files.
    pub bytes_in: u64,
    /// Size of the written `.gz` files.
    pub bytes_out: u64,
}

impl TransformStats {
    pub fn summary(&self) -> String {
        format!(
            "Removed: {}, Compressed: {}, Bytes in: {}, Bytes out: {}",
            self.removed_count, self.compressed_count, self.bytes_in, self.bytes_out
        )
    }
}

pub fn is_index_file<S: AsRef<str>>(name: &str, extensions: &[S]) -> bool {
    extensions.iter().any(|ext| name.ends_with(ext.as_ref()))
}

/// Lists the regular files directly inside `bucket`, sorted by name.
pub fn top_level_files(bucket: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(bucket).map_err(|e| ArchiveError::filesystem(bucket, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::filesystem(bucket, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Applies the format-specific transformation to `bucket`. `index_extensions`
/// selects the files gzipped in old-style buckets.
pub fn transform_bucket<S: AsRef<str>>(
    bucket: &Path,
    format: BucketFormat,
    index_extensions: &[S],
) -> Result<TransformStats> {
    let files = top_level_files(bucket)?;
    let stats = match format {
        BucketFormat::NewStyle => {
            info!("Archiving bucket: {}", bucket.display());
            strip_loose_files(&files)?
        }
        BucketFormat::OldStyle => {
            info!("Archiving old-style bucket: {}", bucket.display());
            compress_index_files(&files, index_extensions)?
        }
    };
    info!("Transformed {}: {}", bucket.display(), stats.summary());
    Ok(stats)
}

fn strip_loose_files(files: &[PathBuf]) -> Result<TransformStats> {
    let mut stats = TransformStats::default();
    for path in files {
        fs::remove_file(path).map_err(|e| ArchiveError::filesystem(path, e))?;
        debug!("Removed {}", path.display());
        stats.removed_count += 1;
    }
    Ok(stats)
}

fn compress_index_files<S: AsRef<str>>(
    files: &[PathBuf],
    extensions: &[S],
) -> Result<TransformStats> {
    let mut stats = TransformStats::default();
    for path in files {
        let name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if !is_index_file(name, extensions) {
            continue;
        }

        let gz_path = path.with_file_name(format!("{name}{GZ_SUFFIX}"));
        let (bytes_in, bytes_out) =
            gzip_file(path, &gz_path).map_err(|e| ArchiveError::filesystem(path, e))?;
        fs::remove_file(path).map_err(|e| ArchiveError::filesystem(path, e))?;
        debug!("Compressed {} -> {}", path.display(), gz_path.display());

        stats.compressed_count += 1;
        stats.bytes_in += bytes_in;
        stats.bytes_out += bytes_out;
    }
    Ok(stats)
}

/// Writes a complete gzip stream of `src` to `dest`, replacing `dest`.
/// Returns the input and output sizes.
pub fn gzip_file(src: &Path, dest: &Path) -> io::Result<(u64, u64)> {
    let mut input = BufReader::new(File::open(src)?);
    let output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(dest)?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    let bytes_in = io::copy(&mut input, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    let output = writer.into_inner().map_err(|e| e.into_error())?;
    output.sync_all()?;

    let bytes_out = output.metadata()?.len();
    Ok((bytes_in, bytes_out))
}
