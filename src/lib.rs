//! Cold-to-frozen archival of time-series index buckets.
//!
//! A bucket directory is classified, stripped or compressed in place, moved
//! into the local archive tree and then uploaded file by file to a remote
//! object store under `<prefix>/<collection>/<bucket>/...`.

pub mod bucket;
pub mod config;
pub mod error;
#[cfg(feature = "cli")]
pub mod logging;
pub mod pipeline;
pub mod remote;
pub mod upload;

pub use config::{ArchiveConfig, ExistingObjectPolicy, RemoteConfig};
pub use error::{ArchiveError, Result, UploadError};
pub use pipeline::{ArchiveOutcome, ArchiveRequest, ArchiveSummary, Pipeline};
pub use remote::{GenericObjectStore, LocalFsStore, ObjectStore, PutOutcome};
pub use upload::UploadReport;
