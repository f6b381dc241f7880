use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

use crate::error::{ArchiveError, Result};

/// Creates the archive directory tree if missing. Idempotent.
pub fn ensure_archive_dir(archive_dir: &Path) -> Result<()> {
    if archive_dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(archive_dir).map_err(|e| ArchiveError::filesystem(archive_dir, e))?;
    info!("Created archive directory {}", archive_dir.display());
    Ok(())
}

/// Moves the whole bucket tree to `<archive_dir>/<basename>` and returns the
/// new location. The source path no longer exists afterwards.
pub fn relocate_bucket(bucket: &Path, archive_dir: &Path) -> Result<PathBuf> {
    let name = bucket.file_name().ok_or_else(|| ArchiveError::Relocation {
        from: bucket.to_path_buf(),
        to: archive_dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "bucket path has no basename"),
    })?;
    let dest = archive_dir.join(name);
    let relocation_error = |source: io::Error| ArchiveError::Relocation {
        from: bucket.to_path_buf(),
        to: dest.clone(),
        source,
    };

    ensure_archive_dir(archive_dir)?;
    if fs::symlink_metadata(&dest).is_ok() {
        return Err(relocation_error(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "destination already exists",
        )));
    }

    match fs::rename(bucket, &dest) {
        Ok(()) => {}
        Err(err) if is_cross_device(&err) => {
            warn!(
                "{} and {} are on different filesystems, copying",
                bucket.display(),
                dest.display()
            );
            move_across_devices(bucket, &dest).map_err(relocation_error)?;
        }
        Err(err) => return Err(relocation_error(err)),
    }
    sync_archive_dir(archive_dir);

    info!("Bucket {} archived to {}", bucket.display(), dest.display());
    Ok(dest)
}

/// Flushes the archive directory entry after a move. The bucket is already
/// in place at this point, so a failure only costs durability and is logged.
fn sync_archive_dir(archive_dir: &Path) -> bool {
    match fsync_dir(archive_dir) {
        Ok(()) => true,
        Err(err) => {
            warn!(
                "Bucket moved but syncing {} failed: {err}",
                archive_dir.display()
            );
            false
        }
    }
}

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

/// Copies the tree, then removes the source. A failed copy is cleaned up on
/// the destination side and leaves the source untouched.
fn move_across_devices(src: &Path, dest: &Path) -> io::Result<()> {
    if let Err(err) = copy_tree(src, dest) {
        let _ = fs::remove_dir_all(dest);
        return Err(err);
    }
    fs::remove_dir_all(src)
}

fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            File::open(&target)?.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> io::Result<()> {
    fs::copy(src, target).map(|_| ())
}

fn fsync_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    File::open(path)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
