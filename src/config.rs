//! Archival settings.
//!
//! Loaded once at process start from a JSON file and the environment, then
//! handed to every stage. Nothing in here is hard-coded into the binary beyond
//! the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

pub const DEFAULT_ARCHIVE_ROOT: &str = "/coldvolume/splunkdb/splunk";
pub const DEFAULT_REMOTE_PREFIX: &str = "frozen-buckets";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_INDEX_EXTENSIONS: [&str; 2] = [".tsidx", ".data"];

/// Base directory variable; the log file and default settings file live under it.
pub const HOME_ENV: &str = "SPLUNK_HOME";
/// Overrides `remote.sas_token` from the settings file.
pub const SAS_TOKEN_ENV: &str = "COLD_TO_FROZEN_SAS_TOKEN";
/// Overrides `remote.access_key` from the settings file.
pub const ACCESS_KEY_ENV: &str = "COLD_TO_FROZEN_ACCESS_KEY";

/// Complete configuration of one archival run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Local archive tree root.
    /// Default: /coldvolume/splunkdb/splunk
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,

    /// First component of every remote object key.
    /// Default: frozen-buckets
    #[serde(default = "default_remote_prefix")]
    pub remote_prefix: String,

    /// What to do when the remote key already holds an object.
    /// Default: overwrite
    #[serde(default)]
    pub on_existing_remote_object: ExistingObjectPolicy,

    /// Top-level file suffixes gzipped in old-style buckets.
    /// Default: [".tsidx", ".data"]
    #[serde(default = "default_index_extensions")]
    pub index_extensions: Vec<String>,

    /// Where uploads go.
    pub remote: RemoteConfig,
}

fn default_archive_root() -> PathBuf {
    PathBuf::from(DEFAULT_ARCHIVE_ROOT)
}

fn default_remote_prefix() -> String {
    DEFAULT_REMOTE_PREFIX.to_string()
}

fn default_index_extensions() -> Vec<String> {
    DEFAULT_INDEX_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Policy for a remote key that is already populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingObjectPolicy {
    /// Replace the remote object.
    #[default]
    Overwrite,
    /// Leave the remote object alone and log a warning.
    SkipWithWarning,
}

/// Remote object store coordinates.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteConfig {
    /// Azure Blob Storage container, authorized with either a SAS token or
    /// the storage account key.
    AzureBlob {
        /// Storage account name.
        account: String,
        /// Container that receives the objects.
        container: String,
        /// Service URL; derived from the account when absent.
        #[serde(default)]
        endpoint: Option<String>,
        /// Shared access signature, without the leading `?`.
        #[serde(default)]
        sas_token: Option<String>,
        /// Base64 storage account key, used for Shared Key signing.
        #[serde(default)]
        access_key: Option<String>,
        /// Bound on each HTTP request (a whole small blob or one block).
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Directory on a locally mounted filesystem.
    LocalFs { root: PathBuf },
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteConfig::AzureBlob {
                account,
                container,
                endpoint,
                sas_token,
                access_key,
                timeout_secs,
            } => f
                .debug_struct("AzureBlob")
                .field("account", account)
                .field("container", container)
                .field("endpoint", endpoint)
                .field("sas_token", &sas_token.as_ref().map(|_| "<redacted>"))
                .field("access_key", &access_key.as_ref().map(|_| "<redacted>"))
                .field("timeout_secs", timeout_secs)
                .finish(),
            RemoteConfig::LocalFs { root } => {
                f.debug_struct("LocalFs").field("root", root).finish()
            }
        }
    }
}

impl ArchiveConfig {
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            archive_root: default_archive_root(),
            remote_prefix: default_remote_prefix(),
            on_existing_remote_object: ExistingObjectPolicy::default(),
            index_extensions: default_index_extensions(),
            remote,
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| ArchiveError::Configuration(format!("malformed settings: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ArchiveError::Configuration(format!(
                "cannot read settings file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies credentials taken from the environment over the file values.
    pub fn with_credential_overrides(
        mut self,
        token: Option<String>,
        key: Option<String>,
    ) -> Self {
        if let RemoteConfig::AzureBlob {
            sas_token,
            access_key,
            ..
        } = &mut self.remote
        {
            if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
                *sas_token = Some(token.trim().trim_start_matches('?').to_string());
            }
            if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
                *access_key = Some(key.trim().to_string());
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.archive_root.as_os_str().is_empty() {
            return Err(ArchiveError::Configuration("archive_root is empty".into()));
        }
        if self.remote_prefix.trim_matches('/').is_empty() {
            return Err(ArchiveError::Configuration("remote_prefix is empty".into()));
        }
        if self.index_extensions.iter().any(|ext| ext.is_empty()) {
            return Err(ArchiveError::Configuration(
                "index_extensions contains an empty suffix".into(),
            ));
        }
        match &self.remote {
            RemoteConfig::AzureBlob {
                account,
                container,
                sas_token,
                access_key,
                timeout_secs,
                ..
            } => {
                if account.is_empty() || container.is_empty() {
                    return Err(ArchiveError::Configuration(
                        "azure_blob remote needs both account and container".into(),
                    ));
                }
                let has_token = sas_token.as_deref().is_some_and(|t| !t.is_empty());
                let has_key = access_key.as_deref().is_some_and(|k| !k.is_empty());
                match (has_token, has_key) {
                    (false, false) => {
                        return Err(ArchiveError::Configuration(format!(
                            "azure_blob remote has no credential; set remote.sas_token, \
                             remote.access_key, {SAS_TOKEN_ENV} or {ACCESS_KEY_ENV}"
                        )))
                    }
                    (true, true) => {
                        return Err(ArchiveError::Configuration(
                            "azure_blob remote has both a SAS token and an access key".into(),
                        ))
                    }
                    _ => {}
                }
                if *timeout_secs == 0 {
                    return Err(ArchiveError::Configuration("timeout_secs is zero".into()));
                }
            }
            RemoteConfig::LocalFs { root } => {
                if root.as_os_str().is_empty() {
                    return Err(ArchiveError::Configuration("local_fs root is empty".into()));
                }
            }
        }
        Ok(())
    }
}

/// Default settings file location under the base directory.
pub fn default_config_path(home: &Path) -> PathBuf {
    home.join("etc").join("cold_to_frozen.json")
}

/// Reads the required base directory from the environment.
pub fn home_from_env() -> Result<PathBuf> {
    match std::env::var_os(HOME_ENV) {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => Err(ArchiveError::Configuration(format!(
            "Environment variable {HOME_ENV} is not set. Exiting."
        ))),
    }
}
