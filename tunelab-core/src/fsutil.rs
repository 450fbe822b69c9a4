//! Filesystem helpers: atomic writes and whole-directory moves.
//!
//! Anything the pipeline persists goes through a temp path and a rename, so an
//! interrupted run leaves either the previous content or the new content,
//! never half of it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Create `dir` and all its parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    path.with_file_name(format!(
        ".{name}.tmp.{}.{}",
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    ))
}

/// Write `bytes` to `path` via a temp file and rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = temp_sibling(path);
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::io(path, e)
    })
}

/// Recursively copy the contents of `src` into `dest`, creating `dest`.
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<()> {
    ensure_dir(dest)?;
    let entries = fs::read_dir(src).map_err(|e| Error::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(src, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| Error::io(&from, e))?;
        if file_type.is_dir() {
            copy_dir_all(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| Error::io(&from, e))?;
        }
    }
    Ok(())
}

/// Copy a single file, creating the destination's parent directory.
pub fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    let bytes = fs::read(src).map_err(|e| Error::io(src, e))?;
    atomic_write(dest, &bytes)
}

/// Move the directory `src` to `dest`, replacing whatever was at `dest`.
///
/// The copy is staged next to `dest` and renamed into place; `src` is removed
/// only after `dest` is complete.
pub fn move_dir(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(Error::not_found("directory", src));
    }
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    let staging = temp_sibling(dest);
    if let Err(e) = copy_dir_all(src, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }
    if dest.exists() {
        fs::remove_dir_all(dest).map_err(|e| Error::io(dest, e))?;
    }
    fs::rename(&staging, dest).map_err(|e| Error::io(dest, e))?;
    fs::remove_dir_all(src).map_err(|e| Error::io(src, e))
}

/// Merge the contents of `src` into `dest` (overwriting files), then remove `src`.
pub fn merge_dir(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(Error::not_found("directory", src));
    }
    copy_dir_all(src, dest)?;
    fs::remove_dir_all(src).map_err(|e| Error::io(src, e))
}
