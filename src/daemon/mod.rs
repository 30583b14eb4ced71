//! Background speech daemon.
//!
//! The daemon keeps the embedding model and audio player warm and plays
//! queued requests one at a time. It is reached over a Unix socket in the
//! runtime directory and, optionally, a small HTTP API.
//!
//! ```text
//! <runtime_dir>/
//!   daemon.sock   line-delimited JSON (see `protocol`)
//!   daemon.lock   exclusive lock holding the daemon pid
//!   daemon.log.*  daily-rolling log files
//! ```
//!
//! Clients (`client`) spawn the daemon on demand and fall back to running
//! the pipeline in-process when it cannot be reached.

pub mod client;
pub mod control;
pub mod core;
pub mod http;
pub mod lock;
pub mod protocol;
pub mod queue;

use std::path::{Path, PathBuf};

pub use client::{ClientResponse, DaemonClient, SpawnConfig, SpawnError};
pub use control::DaemonStatus;
pub use core::{DaemonConfig, DaemonState, Phase, SpeechDaemon};
pub use lock::{DaemonLock, LockError};
pub use protocol::{Method, Request, Response};

pub const SOCKET_FILE: &str = "daemon.sock";
pub const LOCK_FILE: &str = "daemon.lock";
pub const LOG_FILE_PREFIX: &str = "daemon.log";

/// Well-known file locations inside a runtime directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    dir: PathBuf,
}

impl RuntimePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(SOCKET_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }
}
