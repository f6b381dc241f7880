//! Remote object stores that receive archived bucket files.
//!
//! [`ObjectStore`] is the single seam the upload loop talks to:
//!   * [`LocalFsStore`] writes objects into a directory tree
//!   * [`AzureBlobStore`] puts blobs into an Azure container, staging large
//!     files as blocks

#[cfg(feature = "azure")]
mod azure_blob;
mod local_fs;

use std::path::Path;

use log::info;

use crate::config::{ExistingObjectPolicy, RemoteConfig};
use crate::error::{ArchiveError, UploadError};

#[cfg(feature = "azure")]
pub use azure_blob::{AzureBlobStore, Credential};
pub use local_fs::LocalFsStore;

/// Separator of remote key components, independent of the host.
pub const KEY_SEPARATOR: char = '/';

/// Result of a single successful put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Uploaded { bytes: u64 },
    /// The key already held an object and the policy said to leave it.
    SkippedExisting,
}

/// Blocking object store used once per archived file.
pub trait ObjectStore {
    /// Human readable target, used in log lines.
    fn describe(&self) -> String;

    /// Streams `local_path` into the object named `key`.
    fn put_file(
        &self,
        local_path: &Path,
        key: &str,
        policy: ExistingObjectPolicy,
    ) -> Result<PutOutcome, UploadError>;
}

/// Store selected by configuration.
pub enum GenericObjectStore {
    LocalFs(LocalFsStore),
    #[cfg(feature = "azure")]
    AzureBlob(AzureBlobStore),
}

impl GenericObjectStore {
    pub fn from_config(config: &RemoteConfig) -> Result<Self, ArchiveError> {
        let store = match config {
            RemoteConfig::LocalFs { root } => {
                GenericObjectStore::LocalFs(LocalFsStore::new(root.clone()))
            }
            #[cfg(feature = "azure")]
            RemoteConfig::AzureBlob {
                account,
                container,
                endpoint,
                sas_token,
                access_key,
                timeout_secs,
            } => {
                let credential = match access_key.as_deref().filter(|k| !k.is_empty()) {
                    Some(key) => Credential::access_key(account, key)?,
                    None => Credential::sas(sas_token.as_deref().unwrap_or_default()),
                };
                GenericObjectStore::AzureBlob(AzureBlobStore::new(
                    account,
                    container,
                    endpoint.as_deref(),
                    credential,
                    std::time::Duration::from_secs(*timeout_secs),
                )?)
            }
            #[cfg(not(feature = "azure"))]
            RemoteConfig::AzureBlob { .. } => {
                return Err(ArchiveError::Configuration(
                    "azure_blob remote requires the `azure` feature".into(),
                ))
            }
        };
        info!("Using {} as remote storage", store.describe());
        Ok(store)
    }
}

impl ObjectStore for GenericObjectStore {
    fn describe(&self) -> String {
        match self {
            GenericObjectStore::LocalFs(store) => store.describe(),
            #[cfg(feature = "azure")]
            GenericObjectStore::AzureBlob(store) => store.describe(),
        }
    }

    fn put_file(
        &self,
        local_path: &Path,
        key: &str,
        policy: ExistingObjectPolicy,
    ) -> Result<PutOutcome, UploadError> {
        match self {
            GenericObjectStore::LocalFs(store) => store.put_file(local_path, key, policy),
            #[cfg(feature = "azure")]
            GenericObjectStore::AzureBlob(store) => store.put_file(local_path, key, policy),
        }
    }
}

/// Splits a key into its components, rejecting empty and relative ones.
pub fn key_segments(key: &str) -> Result<Vec<&str>, UploadError> {
    let invalid = |reason: &str| UploadError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    let segments: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    for segment in &segments {
        match *segment {
            "" => return Err(invalid("empty component")),
            "." | ".." => return Err(invalid("relative component")),
            _ => {}
        }
    }
    Ok(segments)
}
