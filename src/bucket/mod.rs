//! Local bucket handling: classification, format detection, transformation
//! and relocation into the archive tree.

mod classify;
mod format;
mod relocate;
mod transform;

pub use classify::{
    bucket_basename, classify, collection_name, is_replicated, normalize_bucket_path,
    BucketLocation, CollectionName, ARCHIVE_SUBDIR, MIN_PATH_SEGMENTS, REPLICATED_PREFIX,
};
pub use format::{detect_format, BucketFormat, JOURNAL_FILE, RAWDATA_DIR};
pub use relocate::{ensure_archive_dir, relocate_bucket};
pub use transform::{gzip_file, is_index_file, top_level_files, transform_bucket, TransformStats};
