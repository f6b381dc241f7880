use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::ExistingObjectPolicy;
use crate::error::UploadError;
use crate::remote::{key_segments, ObjectStore, PutOutcome};

/// Object store backed by a directory; each key maps to a file under `root`.
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, key: &str) -> Result<PathBuf, UploadError> {
        let mut path = self.root.clone();
        for segment in key_segments(key)? {
            path.push(segment);
        }
        Ok(path)
    }
}

impl ObjectStore for LocalFsStore {
    fn describe(&self) -> String {
        format!("local directory '{}'", self.root.display())
    }

    fn put_file(
        &self,
        local_path: &Path,
        key: &str,
        policy: ExistingObjectPolicy,
    ) -> Result<PutOutcome, UploadError> {
        let target = self.object_path(key)?;
        if policy == ExistingObjectPolicy::SkipWithWarning && target.exists() {
            return Ok(PutOutcome::SkippedExisting);
        }

        let mut input = File::open(local_path).map_err(|e| UploadError::io(local_path, e))?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| UploadError::io(parent, e))?;
        }

        let tmp = tmp_path_for(&target);
        let written = write_object(&mut input, &tmp).and_then(|bytes| {
            fs::rename(&tmp, &target)?;
            Ok(bytes)
        });
        match written {
            Ok(bytes) => Ok(PutOutcome::Uploaded { bytes }),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(UploadError::Io {
                    path: target,
                    source: e,
                })
            }
        }
    }
}

fn write_object(input: &mut File, tmp: &Path) -> io::Result<u64> {
    let mut output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp)?;
    let bytes = io::copy(input, &mut output)?;
    output.sync_all()?;
    Ok(bytes)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
