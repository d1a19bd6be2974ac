//! Single-instance lock on the data directory
//!
//! Two controllers on one data directory would rotate the same secrets and
//! fight over the sled database. The lock is a PID file created with
//! `create_new`, so two racing starts cannot both win.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = ".warden.lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another warden controller is running (PID {pid}); remove {} if it is not", .path.display())]
    Held { pid: u32, path: PathBuf },
    #[error("lock file I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Held for the controller's lifetime; the PID file is removed on drop
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn acquire(data_dir: impl AsRef<Path>) -> Result<Self, LockError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|source| LockError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let path = data_dir.join(LOCK_FILE_NAME);

        // One retry: the first failure may be a stale file we just cleared
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let pid = std::process::id();
                    writeln!(file, "{}", pid).map_err(|source| LockError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    tracing::debug!(pid, path = %path.display(), "Process lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_pid(&path) {
                        Some(pid) if pid_alive(pid) => return Err(LockError::Held { pid, path }),
                        _ => {
                            tracing::info!(path = %path.display(), "Removing stale lock file");
                            if let Err(source) = fs::remove_file(&path) {
                                if source.kind() != ErrorKind::NotFound {
                                    return Err(LockError::Io { path, source });
                                }
                            }
                        }
                    }
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }

        Err(LockError::Io {
            path,
            source: std::io::Error::new(ErrorKind::AlreadyExists, "lock file reappeared during acquisition"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Process lock released"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove lock file"),
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Signal 0 checks for existence without delivering anything
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_file_holds_our_pid_and_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let lock = ProcessLock::acquire(dir.path()).unwrap();
            assert_eq!(read_pid(lock.path()), Some(std::process::id()));
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_live_holder_blocks_second_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = ProcessLock::acquire(dir.path()).unwrap();
        match ProcessLock::acquire(dir.path()) {
            Err(LockError::Held { pid, .. }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected Held, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_lock_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        // Above pid_max on Linux, so never a live process
        fs::write(&path, "999999999\n").unwrap();

        let lock = ProcessLock::acquire(dir.path()).unwrap();
        assert_eq!(read_pid(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_lock_treated_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), "not a pid").unwrap();
        assert!(ProcessLock::acquire(dir.path()).is_ok());
    }
}
