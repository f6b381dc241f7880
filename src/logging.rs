//! File logging for archival runs.
//!
//! The binary builds one `env_logger` logger at start-up and points it at a
//! [`RotatingFileWriter`]; the library only talks to the `log` facade.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use time::{OffsetDateTime, UtcOffset};

use crate::error::{ArchiveError, Result};

/// Rotation threshold of the log file.
pub const LOG_MAX_BYTES: u64 = 10 * 1024 * 512;
/// Rotated files kept next to the live one.
pub const LOG_BACKUP_COUNT: usize = 1;
pub const LOG_FILE_NAME: &str = "cold_to_frozen.log";

/// `<home>/var/log/splunk/cold_to_frozen.log`
pub fn log_file_path(home: &Path) -> PathBuf {
    home.join("var")
        .join("log")
        .join("splunk")
        .join(LOG_FILE_NAME)
}

/// Append-mode file that rolls over to `<path>.1`, `<path>.2`, ... once the
/// next write would reach `max_bytes`.
#[derive(Debug)]
pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
    size: u64,
}

impl RotatingFileWriter {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backup_count,
            file,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn should_rotate(&self, incoming: usize) -> bool {
        self.max_bytes > 0 && self.size > 0 && self.size + incoming as u64 >= self.max_bytes
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backup_count > 0 {
            for index in (1..self.backup_count).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            self.file = open_append(&self.path)?;
        } else {
            self.file.set_len(0)?;
        }
        self.size = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rotate(buf.len()) {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `2026-10-16 08:15:02,117`
pub fn format_timestamp(dt: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02},{:03}",
        dt.year(),
        dt.month() as u8,
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}

/// Installs the process logger writing to the rotating log under `home`.
/// Level defaults to `info`; `RUST_LOG` overrides it.
pub fn init(home: &Path) -> Result<PathBuf> {
    use env_logger::{Builder, Env, Target, WriteStyle};

    let path = log_file_path(home);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::filesystem(parent, e))?;
    }
    let writer = RotatingFileWriter::open(&path, LOG_MAX_BYTES, LOG_BACKUP_COUNT)
        .map_err(|e| ArchiveError::filesystem(&path, e))?;

    // resolved once, before anything could spawn a thread
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(writer)))
        .write_style(WriteStyle::Never)
        .format(move |buf, record| {
            let now = OffsetDateTime::now_utc().to_offset(offset);
            writeln!(
                buf,
                "{} - {} - {}",
                format_timestamp(now),
                record.level(),
                record.args()
            )
        })
        .try_init()
        .map_err(|e| ArchiveError::Configuration(format!("logger already installed: {e}")))?;
    Ok(path)
}
