//! Status, stop and restart for a daemon in a given runtime directory.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::{ClientResponse, DaemonClient, SpawnConfig, SpawnError};
use super::lock::{lock_holder, pid_alive};
use super::protocol::{Method, StatusResult};
use super::RuntimePaths;

const STOP_GRACE: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(100);
const RESTART_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub models_loaded: bool,
    pub uptime: Option<f64>,
    pub cache_entries: Option<usize>,
    pub socket_path: PathBuf,
    /// Why the daemon could not be reached, when it is not running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn status(client: &DaemonClient) -> DaemonStatus {
    let socket_path = client.socket_path().to_path_buf();
    match client.send(Method::Status, Value::Null) {
        ClientResponse::Success(result) => match serde_json::from_value::<StatusResult>(result) {
            Ok(s) => DaemonStatus {
                running: true,
                pid: Some(s.pid),
                models_loaded: s.models_loaded,
                uptime: Some(s.uptime),
                cache_entries: Some(s.cache_entries),
                socket_path,
                error: None,
            },
            Err(err) => not_running(socket_path, format!("invalid status result: {err}")),
        },
        ClientResponse::Error { message, .. } => not_running(socket_path, message),
    }
}

fn not_running(socket_path: PathBuf, error: String) -> DaemonStatus {
    DaemonStatus {
        running: false,
        pid: None,
        models_loaded: false,
        uptime: None,
        cache_entries: None,
        socket_path,
        error: Some(error),
    }
}

/// SIGTERM the daemon, then SIGKILL after a grace period. Returns whether a
/// process was signalled.
pub fn stop(paths: &RuntimePaths, client: &DaemonClient) -> bool {
    let pid = status(client)
        .pid
        .or_else(|| lock_holder(&paths.lock_path()));
    terminate(paths, pid)
}

/// Stop whichever process holds the runtime lock without asking it over the
/// socket first. Used when the daemon may be wedged.
pub fn stop_lock_holder(paths: &RuntimePaths) -> bool {
    terminate(paths, lock_holder(&paths.lock_path()))
}

fn terminate(paths: &RuntimePaths, pid: Option<u32>) -> bool {
    let Some(pid) = pid.filter(|&pid| pid != std::process::id()) else {
        debug!("no daemon to stop");
        remove_stale_socket(paths);
        return false;
    };

    info!(pid, "stopping daemon");
    send_signal(pid, Signal::Term);
    let deadline = Instant::now() + STOP_GRACE;
    while pid_alive(pid) && Instant::now() < deadline {
        std::thread::sleep(STOP_POLL);
    }
    if pid_alive(pid) {
        warn!(pid, "daemon ignored SIGTERM; killing");
        send_signal(pid, Signal::Kill);
    }
    remove_stale_socket(paths);
    true
}

/// Stop, pause, spawn a fresh daemon.
pub fn restart(
    paths: &RuntimePaths,
    client: &DaemonClient,
    spawn: &SpawnConfig,
) -> Result<(), SpawnError> {
    stop(paths, client);
    std::thread::sleep(RESTART_PAUSE);
    client.ensure_running(spawn, true)
}

fn remove_stale_socket(paths: &RuntimePaths) {
    let socket = paths.socket_path();
    if let Err(err) = std::fs::remove_file(&socket)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(socket = %socket.display(), error = %err, "failed to remove socket");
    }
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill has no memory-safety preconditions.
    if unsafe { libc::kill(pid, sig) } != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "signal not delivered");
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn status_without_daemon() {
        let tmp = TempDir::new().unwrap();
        let paths = RuntimePaths::new(tmp.path());
        let st = status(&DaemonClient::for_runtime(&paths));
        assert!(!st.running);
        assert_eq!(st.pid, None);
        assert_eq!(st.error.as_deref(), Some("daemon not running"));
        assert_eq!(st.socket_path, paths.socket_path());
    }

    #[test]
    fn stop_without_daemon_cleans_socket() {
        let tmp = TempDir::new().unwrap();
        let paths = RuntimePaths::new(tmp.path());
        drop(std::os::unix::net::UnixListener::bind(paths.socket_path()).unwrap());

        assert!(!stop(&paths, &DaemonClient::for_runtime(&paths)));
        assert!(!paths.socket_path().exists());
    }

    #[test]
    fn stop_terminates_process_holding_the_lock() {
        let tmp = TempDir::new().unwrap();
        let paths = RuntimePaths::new(tmp.path());
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        // Hold the lock here but name the child as its owner.
        let _lock = super::super::DaemonLock::try_acquire(paths.lock_path()).unwrap();
        std::fs::write(paths.lock_path(), child.id().to_string()).unwrap();

        assert!(stop_lock_holder(&paths));
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn stale_pid_in_unlocked_file_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let paths = RuntimePaths::new(tmp.path());
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(paths.lock_path(), child.id().to_string()).unwrap();

        assert!(!stop(&paths, &DaemonClient::for_runtime(&paths)));
        assert!(child.try_wait().unwrap().is_none());
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
