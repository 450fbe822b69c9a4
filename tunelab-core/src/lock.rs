//! Exclusive run lock over a tool root.
//!
//! The external tools write into fixed output directories under the root, and
//! artifact discovery assumes a single writer. The lock file makes a second
//! orchestrator against the same root fail fast instead of picking up the
//! other run's artifacts.
//!
//! The file records the holder's pid. A lock whose holder is no longer alive
//! (a run killed before it could clean up) is stale and gets taken over.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = ".tunelab.lock";

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    /// The holder recorded at `path`, if the file parses.
    pub fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Held for the lifetime of a run; removes the lock file on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        crate::fsutil::ensure_dir(root)?;
        match Self::create(&path) {
            Err(Error::Locked { path }) => {
                match LockHolder::read(&path) {
                    Some(holder) if !process_alive(holder.pid) => {
                        warn!(
                            path = %path.display(),
                            pid = holder.pid,
                            acquired_at = %holder.acquired_at,
                            "taking over stale run lock"
                        );
                        fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                        Self::create(&path)
                    }
                    _ => Err(Error::Locked { path }),
                }
            }
            other => other,
        }
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::Locked {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        let lock = Self {
            path: path.to_path_buf(),
        };
        // From here on a failed write drops `lock`, which removes the file.
        let payload = serde_json::to_vec(&LockHolder::current())
            .map_err(|e| Error::io(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        file.write_all(&payload)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::io(path, e))?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RunLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());

        let err = RunLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Locked { .. }));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
        assert!(RunLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn lock_file_records_this_process() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RunLock::acquire(dir.path()).unwrap();
        let holder = LockHolder::read(lock.path()).unwrap();
        assert_eq!(holder.pid, std::process::id());
    }

    #[test]
    fn unreadable_lock_is_treated_as_held() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "not json").unwrap();
        let err = RunLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Locked { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn lock_of_dead_process_is_taken_over() {
        // GIVEN a lock left behind by a process that has exited
        let dir = tempfile::tempdir().unwrap();
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        let stale = LockHolder {
            pid: dead_pid,
            acquired_at: Utc::now(),
        };
        fs::write(dir.path().join(LOCK_FILE), serde_json::to_vec(&stale).unwrap()).unwrap();

        // WHEN a new run acquires the root
        let lock = RunLock::acquire(dir.path()).unwrap();

        // THEN it owns the lock
        assert_eq!(LockHolder::read(lock.path()).unwrap().pid, std::process::id());
    }

    #[test]
    fn lock_of_live_process_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let live = LockHolder {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        fs::write(dir.path().join(LOCK_FILE), serde_json::to_vec(&live).unwrap()).unwrap();
        let err = RunLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Locked { .. }));
    }
}
