//! Exclusive lock file guaranteeing one daemon per runtime directory.
//!
//! On unix the lock is an advisory `flock` that the kernel drops when the
//! process dies, so a crashed daemon never leaves a stale lock. Elsewhere
//! the file is created with create-or-fail semantics and removed on drop.
//! Either way the file holds the owner's pid.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another daemon is already running{}", .pid.map(|p| format!(" (pid {p})")).unwrap_or_default())]
    AlreadyRunning { pid: Option<u32> },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct DaemonLock {
    path: PathBuf,
    // Held open for the lifetime of the lock.
    _file: File,
}

/// Pid recorded in the lock file, if any.
pub fn read_lock_pid(path: &Path) -> Option<u32> {
    let mut raw = String::new();
    File::open(path).ok()?.read_to_string(&mut raw).ok()?;
    raw.trim().parse().ok()
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for existence and permission.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

/// Pid of the process currently holding the lock at `path`, if any.
///
/// Unlike [`read_lock_pid`] this checks the lock itself, so a pid left in
/// the file by a dead daemon is never reported.
#[cfg(unix)]
pub fn lock_holder(path: &Path) -> Option<u32> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new().read(true).open(path).ok()?;
    // SAFETY: the descriptor is valid for as long as `file` lives.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
    if rc == 0 {
        // Nobody holds it; closing `file` releases our shared lock.
        return None;
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EWOULDBLOCK) {
        debug!(path = %path.display(), error = %err, "cannot test daemon lock");
    }
    read_lock_pid(path).filter(|&pid| pid_alive(pid))
}

#[cfg(not(unix))]
pub fn lock_holder(path: &Path) -> Option<u32> {
    read_lock_pid(path).filter(|&pid| pid_alive(pid))
}

impl DaemonLock {
    /// Take the lock without blocking.
    pub fn try_acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = open_exclusive(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::AlreadyExists
            {
                LockError::AlreadyRunning {
                    pid: read_lock_pid(&path),
                }
            } else {
                io_err(e)
            }
        })?;

        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        write!(file, "{}", std::process::id()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        debug!(path = %path.display(), "daemon lock acquired");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> std::io::Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    // SAFETY: the descriptor is valid for as long as `file` lives.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Err(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        }
        return Err(err);
    }
    Ok(file)
}

#[cfg(not(unix))]
fn open_exclusive(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
}

#[cfg(not(unix))]
impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
