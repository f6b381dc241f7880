use std::fmt;
use std::path::Path;

use log::error;

use crate::error::{ArchiveError, Result};

pub const RAWDATA_DIR: &str = "rawdata";
pub const JOURNAL_FILE: &str = "journal.gz";

/// On-disk generation of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketFormat {
    /// Carries `rawdata/journal.gz`; every top-level file can be regenerated.
    NewStyle,
    /// Predates the compressed journal; index files are kept, gzipped.
    OldStyle,
}

impl fmt::Display for BucketFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketFormat::NewStyle => f.write_str("new-style"),
            BucketFormat::OldStyle => f.write_str("old-style"),
        }
    }
}

/// Classifies a bucket. `search_files_required` forces old-style handling.
pub fn detect_format(bucket: &Path, search_files_required: bool) -> Result<BucketFormat> {
    let rawdata = bucket.join(RAWDATA_DIR);
    if !rawdata.is_dir() {
        error!(
            "No rawdata directory, given bucket is likely invalid: {}",
            bucket.display()
        );
        return Err(ArchiveError::InvalidBucket {
            path: bucket.to_path_buf(),
            reason: "missing rawdata directory",
        });
    }

    let journal = rawdata.join(JOURNAL_FILE);
    if journal.is_file() && !search_files_required {
        Ok(BucketFormat::NewStyle)
    } else {
        Ok(BucketFormat::OldStyle)
    }
}
