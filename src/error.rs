use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures of an archival run. Every variant terminates the process.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unable to extract collection name from bucket path {}: {reason}", path.display())]
    Classification { path: PathBuf, reason: String },

    #[error("invalid bucket {}: {reason}", path.display())]
    InvalidBucket { path: PathBuf, reason: &'static str },

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to move bucket {} to {}: {source}", from.display(), to.display())]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArchiveError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this failure. Usage errors share clap's code.
    pub fn exit_code(&self) -> u8 {
        match self {
            ArchiveError::Usage(_) => 2,
            ArchiveError::Configuration(_) => 3,
            ArchiveError::Classification { .. } => 4,
            ArchiveError::InvalidBucket { .. } => 5,
            ArchiveError::Filesystem { .. } => 6,
            ArchiveError::Relocation { .. } => 7,
        }
    }
}

/// Per-file upload failure. Recoverable: logged and counted, never fatal.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("local file {} not found", path.display())]
    NotFound { path: PathBuf },

    #[error("io error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The request URL is stripped on conversion; it carries the SAS token.
    #[cfg(feature = "azure")]
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("remote store answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid object key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("{} is {len} bytes, above the {limit} byte object limit", path.display())]
    TooLarge { path: PathBuf, len: u64, limit: u64 },

    #[error("cannot sign request: {0}")]
    Signing(String),
}

impl UploadError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            UploadError::NotFound { path }
        } else {
            UploadError::Io { path, source }
        }
    }
}

#[cfg(feature = "azure")]
impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Transport(e.without_url())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
