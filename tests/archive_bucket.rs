use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Result;
use flate2::read::GzDecoder;
use tempfile::{tempdir, TempDir};

use cold_to_frozen::bucket::top_level_files;
use cold_to_frozen::{
    ArchiveConfig, ArchiveError, ArchiveOutcome, ArchiveRequest, ArchiveSummary,
    ExistingObjectPolicy, LocalFsStore, ObjectStore, Pipeline, PutOutcome, RemoteConfig,
    UploadError,
};

struct Env {
    temp: TempDir,
    config: ArchiveConfig,
    store: LocalFsStore,
}

impl Env {
    fn new() -> Result<Self> {
        let temp = tempdir()?;
        let remote = temp.path().join("remote");
        let mut config = ArchiveConfig::new(RemoteConfig::LocalFs {
            root: remote.clone(),
        });
        config.archive_root = temp.path().join("archive");
        Ok(Self {
            store: LocalFsStore::new(remote),
            config,
            temp,
        })
    }

    /// `<tmp>/data/idx1/<collection>/colddb/<name>`
    fn bucket_path(&self, collection: &str, name: &str) -> PathBuf {
        self.temp
            .path()
            .join("data")
            .join("idx1")
            .join(collection)
            .join("colddb")
            .join(name)
    }

    fn archived(&self, collection: &str, name: &str) -> PathBuf {
        self.config
            .archive_root
            .join(collection)
            .join("colddb")
            .join(name)
    }

    fn remote_object(&self, key: &str) -> PathBuf {
        self.store.object_path(key).expect("valid key")
    }
}

fn completed(outcome: ArchiveOutcome) -> ArchiveSummary {
    match outcome {
        ArchiveOutcome::Completed(summary) => summary,
        ArchiveOutcome::Skipped { bucket } => panic!("{} unexpectedly skipped", bucket.display()),
    }
}

fn gunzip(path: &Path) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(File::open(path)?).read_to_end(&mut out)?;
    Ok(out)
}

fn snapshot(root: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>> {
    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(root)?.to_path_buf();
        let content = if entry.file_type().is_file() {
            fs::read(entry.path())?
        } else {
            Vec::new()
        };
        entries.push((relative, content));
    }
    Ok(entries)
}

#[test]
fn old_style_bucket_end_to_end() -> Result<()> {
    let env = Env::new()?;
    let bucket = env.bucket_path("db", "db_1_1");
    fs::create_dir_all(bucket.join("rawdata"))?;
    fs::write(bucket.join("rawdata").join("slicesv2.dat"), b"slices")?;
    fs::write(bucket.join("journal.data"), b"journal data")?;
    let tsidx = b"time series index ".repeat(64);
    fs::write(bucket.join("1.tsidx"), &tsidx)?;

    let outcome = Pipeline::new(&env.config, &env.store).run(&ArchiveRequest::new(&bucket))?;
    let summary = completed(outcome);

    let archived = env.archived("db", "db_1_1");
    assert!(!bucket.exists());
    assert_eq!(summary.archived_path, archived);
    assert_eq!(summary.transform.compressed_count, 2);
    assert!(!archived.join("1.tsidx").exists());
    assert_eq!(gunzip(&archived.join("1.tsidx.gz"))?, tsidx);
    assert_eq!(gunzip(&archived.join("journal.data.gz"))?, b"journal data");
    assert_eq!(fs::read(archived.join("rawdata").join("slicesv2.dat"))?, b"slices");

    assert_eq!(summary.upload.uploaded_count, 3);
    assert!(!summary.upload.has_failures());
    for key in [
        "frozen-buckets/db/db_1_1/1.tsidx.gz",
        "frozen-buckets/db/db_1_1/journal.data.gz",
        "frozen-buckets/db/db_1_1/rawdata/slicesv2.dat",
    ] {
        let remote = env.remote_object(key);
        let relative = key.trim_start_matches("frozen-buckets/db/");
        let local = env.config.archive_root.join("db").join("colddb").join(relative);
        assert_eq!(fs::read(&remote)?, fs::read(&local)?, "{key}");
    }

    Ok(())
}

#[test]
fn new_style_bucket_uploads_journal_key() -> Result<()> {
    let env = Env::new()?;
    let bucket = env.bucket_path("main", "db_1700000000_1690000000_7");
    fs::create_dir_all(bucket.join("rawdata"))?;
    fs::write(bucket.join("rawdata").join("journal.gz"), b"compressed journal")?;
    fs::write(bucket.join("1.tsidx"), b"idx")?;
    fs::write(bucket.join("Hosts.data"), b"hosts")?;
    fs::write(bucket.join(".rawSize"), b"123")?;

    let summary = completed(
        Pipeline::new(&env.config, &env.store).run(&ArchiveRequest::new(&bucket))?,
    );

    let archived = env.archived("main", "db_1700000000_1690000000_7");
    assert!(top_level_files(&archived)?.is_empty());
    assert_eq!(summary.transform.removed_count, 3);
    assert_eq!(summary.upload.uploaded_count, 1);
    assert_eq!(
        fs::read(env.remote_object(
            "frozen-buckets/main/db_1700000000_1690000000_7/rawdata/journal.gz"
        ))?,
        b"compressed journal"
    );
    Ok(())
}

#[test]
fn search_files_flag_keeps_compressed_index_files() -> Result<()> {
    let env = Env::new()?;
    let bucket = env.bucket_path("db", "db_2_2");
    fs::create_dir_all(bucket.join("rawdata"))?;
    fs::write(bucket.join("rawdata").join("journal.gz"), b"journal")?;
    fs::write(bucket.join("1.tsidx"), b"idx")?;

    let request = ArchiveRequest {
        bucket: bucket.clone(),
        search_files_required: true,
    };
    completed(Pipeline::new(&env.config, &env.store).run(&request)?);

    let archived = env.archived("db", "db_2_2");
    assert_eq!(gunzip(&archived.join("1.tsidx.gz"))?, b"idx");
    assert!(env.remote_object("frozen-buckets/db/db_2_2/1.tsidx.gz").is_file());
    Ok(())
}

#[test]
fn replicated_bucket_is_left_untouched() -> Result<()> {
    let env = Env::new()?;
    let bucket = env.bucket_path("db", "rb_3_3_ABCD");
    fs::create_dir_all(bucket.join("rawdata"))?;
    fs::write(bucket.join("rawdata").join("journal.gz"), b"journal")?;
    fs::write(bucket.join("1.tsidx"), b"idx")?;
    let before = snapshot(&bucket)?;

    let outcome = Pipeline::new(&env.config, &env.store).run(&ArchiveRequest::new(&bucket))?;

    assert!(matches!(outcome, ArchiveOutcome::Skipped { .. }));
    assert_eq!(snapshot(&bucket)?, before);
    assert!(!env.config.archive_root.exists());
    assert!(!env.store.root().exists());
    Ok(())
}

#[test]
fn short_path_fails_classification_without_side_effects() -> Result<()> {
    let env = Env::new()?;
    let err = cold_to_frozen::bucket::classify(Path::new("colddb/db_1_1"), &env.config)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Classification { .. }));
    assert_eq!(err.exit_code(), 4);
    assert!(!env.config.archive_root.exists());
    Ok(())
}

#[test]
fn missing_bucket_directory_is_invalid() -> Result<()> {
    let env = Env::new()?;
    let err = Pipeline::new(&env.config, &env.store)
        .run(&ArchiveRequest::new(env.bucket_path("db", "db_9_9")))
        .unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidBucket { .. }));
    assert!(!env.config.archive_root.exists());
    Ok(())
}

/// Index files limited to `.tsidx`: `journal.data` travels as is.
#[test]
fn tsidx_only_policy_leaves_other_files() -> Result<()> {
    let mut env = Env::new()?;
    env.config.index_extensions = vec![".tsidx".to_string()];
    let bucket = env.bucket_path("db", "db_1_1");
    fs::create_dir_all(bucket.join("rawdata"))?;
    fs::write(bucket.join("rawdata").join("slicesv2.dat"), b"slices")?;
    fs::write(bucket.join("journal.data"), b"journal data")?;
    fs::write(bucket.join("1.tsidx"), b"tsidx bytes")?;

    let summary = completed(
        Pipeline::new(&env.config, &env.store).run(&ArchiveRequest::new(&bucket))?,
    );

    let archived = env.archived("db", "db_1_1");
    assert_eq!(summary.format, cold_to_frozen::bucket::BucketFormat::OldStyle);
    assert_eq!(gunzip(&archived.join("1.tsidx.gz"))?, b"tsidx bytes");
    assert_eq!(fs::read(archived.join("journal.data"))?, b"journal data");
    assert_eq!(summary.upload.uploaded_count, 3);
    for key in [
        "frozen-buckets/db/db_1_1/1.tsidx.gz",
        "frozen-buckets/db/db_1_1/journal.data",
        "frozen-buckets/db/db_1_1/rawdata/slicesv2.dat",
    ] {
        assert!(env.remote_object(key).is_file(), "{key}");
    }
    Ok(())
}

#[test]
fn occupied_destination_stops_before_upload() -> Result<()> {
    let env = Env::new()?;
    let bucket = env.bucket_path("db", "db_4_4");
    fs::create_dir_all(bucket.join("rawdata"))?;
    fs::write(bucket.join("rawdata").join("journal.gz"), b"journal")?;
    fs::create_dir_all(env.archived("db", "db_4_4"))?;

    let err = Pipeline::new(&env.config, &env.store)
        .run(&ArchiveRequest::new(&bucket))
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Relocation { .. }));
    assert_eq!(err.exit_code(), 7);
    assert!(bucket.join("rawdata").join("journal.gz").exists());
    assert!(!env.store.root().exists());
    Ok(())
}

#[test]
fn skip_policy_leaves_existing_objects() -> Result<()> {
    let mut env = Env::new()?;
    env.config.on_existing_remote_object = ExistingObjectPolicy::SkipWithWarning;
    let existing = env.remote_object("frozen-buckets/db/db_5_5/rawdata/journal.gz");
    fs::create_dir_all(existing.parent().expect("parent"))?;
    fs::write(&existing, b"older upload")?;

    let bucket = env.bucket_path("db", "db_5_5");
    fs::create_dir_all(bucket.join("rawdata"))?;
    fs::write(bucket.join("rawdata").join("journal.gz"), b"journal")?;
    fs::write(bucket.join("rawdata").join("slicesv2.dat"), b"slices")?;

    let summary = completed(
        Pipeline::new(&env.config, &env.store).run(&ArchiveRequest::new(&bucket))?,
    );

    assert_eq!(summary.upload.skipped_count, 1);
    assert_eq!(summary.upload.uploaded_count, 1);
    assert_eq!(fs::read(&existing)?, b"older upload");
    Ok(())
}

/// Fails every put whose key ends with `fail_suffix`, delegating the rest.
struct FlakyStore {
    inner: LocalFsStore,
    fail_suffix: &'static str,
    attempts: RefCell<usize>,
}

impl ObjectStore for FlakyStore {
    fn describe(&self) -> String {
        format!("flaky {}", self.inner.describe())
    }

    fn put_file(
        &self,
        local_path: &Path,
        key: &str,
        policy: ExistingObjectPolicy,
    ) -> Result<PutOutcome, UploadError> {
        *self.attempts.borrow_mut() += 1;
        if key.ends_with(self.fail_suffix) {
            return Err(UploadError::Status {
                status: 500,
                body: "InternalError: simulated".to_string(),
            });
        }
        self.inner.put_file(local_path, key, policy)
    }
}

#[test]
fn partial_upload_failure_still_completes() -> Result<()> {
    let env = Env::new()?;
    let bucket = env.bucket_path("db", "db_6_6");
    fs::create_dir_all(bucket.join("rawdata"))?;
    fs::write(bucket.join("rawdata").join("journal.gz"), b"journal")?;
    fs::write(bucket.join("rawdata").join("slicesv2.dat"), b"slices")?;
    fs::write(bucket.join("1.tsidx"), b"idx")?;
    fs::write(bucket.join("2.tsidx"), b"idx2")?;

    let store = FlakyStore {
        inner: env.store.clone(),
        fail_suffix: "1.tsidx.gz",
        attempts: RefCell::new(0),
    };
    let request = ArchiveRequest {
        bucket: bucket.clone(),
        search_files_required: true,
    };
    let summary = completed(Pipeline::new(&env.config, &store).run(&request)?);

    assert_eq!(*store.attempts.borrow(), 4);
    assert_eq!(summary.upload.uploaded_count, 3);
    assert_eq!(summary.upload.failures.len(), 1);
    assert_eq!(summary.upload.failures[0].0, "frozen-buckets/db/db_6_6/1.tsidx.gz");
    assert!(!env.remote_object("frozen-buckets/db/db_6_6/1.tsidx.gz").exists());
    assert!(env.remote_object("frozen-buckets/db/db_6_6/2.tsidx.gz").is_file());
    // the local archive copy stays the durable record
    assert!(env.archived("db", "db_6_6").join("1.tsidx.gz").is_file());
    Ok(())
}
