//! Replacer module for atomic file replacement with optional backup.
//!
//! A merged result is staged next to the main asset and renamed over it, so
//! the main asset path always refers to either the old or the new complete
//! file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during file replacement.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// Failed to create backup of the main asset.
    #[error("Failed to create backup: {0}")]
    Backup(io::Error),

    /// Failed to rename the staged file over the main asset.
    #[error("Failed to move merged file into place: {0}")]
    Rename(io::Error),

    /// The merge landed but the consumed overlay could not be deleted.
    #[error("Merged, but failed to delete overlay {}: {source}", .path.display())]
    RemoveOverlay {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Generates the staging path for a main asset.
///
/// The staged file sits in the same directory (so the final rename never
/// crosses filesystems), keeps the extension (so encoders pick the right
/// format), and is hidden so a later scan ignores it:
/// `/dir/x_main.jpg` -> `/dir/.x_main.merging.jpg`
pub fn staging_path(main: &Path) -> PathBuf {
    let stem = main
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match main.extension() {
        Some(ext) => format!(".{}.merging.{}", stem, ext.to_string_lossy()),
        None => format!(".{}.merging", stem),
    };
    main.with_file_name(name)
}

/// Generates a backup path for the original file.
///
/// The backup path follows the format: `.<name>.orig.<timestamp>`
/// where timestamp is Unix epoch seconds.
pub fn backup_path(original: &Path) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    original.with_file_name(format!(".{}.orig.{}", name, timestamp))
}

/// Removes a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Highest `.N` suffix tried before giving up on a backup name.
const MAX_BACKUP_SUFFIX: u32 = 1000;

/// Keeps a copy of the main asset, hard-linking when possible.
///
/// The backup gets a fresh name (a `.N` suffix is added when the timestamped
/// name is taken) and is created with `create_new`, so an existing backup is
/// never overwritten.
pub fn create_backup(original: &Path) -> Result<PathBuf, ReplaceError> {
    let base = backup_path(original);
    let mut candidate = base.clone();
    let mut attempt = 0u32;

    loop {
        match fs::hard_link(original, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(_) => match copy_new(original, &candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(ReplaceError::Backup(e)),
            },
        }

        attempt += 1;
        if attempt > MAX_BACKUP_SUFFIX {
            return Err(ReplaceError::Backup(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("no free backup name next to {}", base.display()),
            )));
        }
        let mut name = base.as_os_str().to_owned();
        name.push(format!(".{}", attempt));
        candidate = PathBuf::from(name);
    }
}

/// Copies `from` into a file that must not exist yet.
fn copy_new(from: &Path, to: &Path) -> io::Result<()> {
    let mut src = fs::File::open(from)?;
    let mut dst = fs::OpenOptions::new().write(true).create_new(true).open(to)?;
    if let Err(e) = io::copy(&mut src, &mut dst) {
        drop(dst);
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// Atomically replaces the main asset with the staged file.
///
/// On failure the staged file is left in place for recovery and the main
/// asset is unchanged.
pub fn atomic_replace(main_path: &Path, staged_path: &Path) -> Result<(), ReplaceError> {
    fs::rename(staged_path, main_path).map_err(ReplaceError::Rename)
}

/// Deletes an overlay that has been merged into its main asset.
pub fn remove_consumed_overlay(overlay_path: &Path) -> Result<(), ReplaceError> {
    fs::remove_file(overlay_path).map_err(|source| ReplaceError::RemoveOverlay {
        path: overlay_path.to_path_buf(),
        source,
    })
}
