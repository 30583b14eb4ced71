//! Blocking advisory lock on `cache.lock` in the cache directory.
//!
//! `flock` locks belong to the open file description, so two handles in one
//! process exclude each other exactly like two processes do. The kernel
//! releases the lock when the handle is closed or the process dies.

use std::fs::{File, OpenOptions};
use std::path::Path;

pub const CACHE_LOCK_FILE: &str = "cache.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Lookups: many holders at once.
    Shared,
    /// Writers and index reloads.
    Exclusive,
}

#[derive(Debug)]
pub struct FileLock {
    mode: LockMode,
    // Held open for the lifetime of the lock.
    _file: File,
}

impl FileLock {
    /// Wait until the lock on `path` is granted in `mode`.
    pub fn acquire(path: &Path, mode: LockMode) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        lock(&file, mode)?;
        Ok(Self { mode, _file: file })
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

#[cfg(unix)]
fn lock(file: &File, mode: LockMode) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    loop {
        // SAFETY: the descriptor is valid for as long as `file` lives.
        if unsafe { libc::flock(file.as_raw_fd(), op) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock(_file: &File, _mode: LockMode) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn shared_holders_coexist() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CACHE_LOCK_FILE);
        let a = FileLock::acquire(&path, LockMode::Shared).unwrap();
        let b = FileLock::acquire(&path, LockMode::Shared).unwrap();
        assert_eq!(a.mode(), LockMode::Shared);
        assert_eq!(b.mode(), LockMode::Shared);
    }

    #[cfg(unix)]
    #[test]
    fn exclusive_waits_for_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CACHE_LOCK_FILE);
        let held = FileLock::acquire(&path, LockMode::Exclusive).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let path = path.clone();
            std::thread::spawn(move || {
                let _lock = FileLock::acquire(&path, LockMode::Shared).unwrap();
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
