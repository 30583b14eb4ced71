//! Synchronous socket client and on-demand daemon spawning.
//!
//! [`DaemonClient::send`] never fails: every outcome, including "no daemon",
//! comes back as a [`ClientResponse`].

use std::ffi::OsString;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::RuntimePaths;
use super::lock::lock_holder;
use super::protocol::{MAX_MESSAGE_BYTES, Method, Request, Response, encode_line};

pub const KIND_NOT_RUNNING: &str = "not_running";
pub const KIND_NOT_RESPONDING: &str = "not_responding";
pub const KIND_TIMEOUT: &str = "timeout";
pub const KIND_DECODE: &str = "decode";

/// Tagged outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientResponse {
    Success(Value),
    Error { kind: String, message: String },
}

impl ClientResponse {
    fn error(kind: &str, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Error { kind, .. } => Some(kind),
        }
    }

    /// True when the daemon itself could not be reached or understood, as
    /// opposed to it rejecting the request.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self.kind(),
            Some(KIND_NOT_RUNNING | KIND_NOT_RESPONDING | KIND_TIMEOUT | KIND_DECODE | "io")
        )
    }

    fn from_response(response: Response) -> Self {
        if response.is_success() {
            return Self::Success(response.result);
        }
        let message = response
            .error_message()
            .unwrap_or("daemon returned an error")
            .to_string();
        let kind = response
            .result
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("daemon")
            .to_string();
        Self::Error { kind, message }
    }
}

#[derive(Debug)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
    request_counter: AtomicU64,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(30),
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn for_runtime(paths: &RuntimePaths) -> Self {
        Self::new(paths.socket_path())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// One connection, one request, one response.
    pub fn send(&self, method: Method, params: Value) -> ClientResponse {
        if !self.socket_path.exists() {
            return ClientResponse::error(KIND_NOT_RUNNING, "daemon not running");
        }

        let mut stream = match UnixStream::connect(&self.socket_path) {
            Ok(stream) => stream,
            Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
                return ClientResponse::error(KIND_NOT_RESPONDING, "daemon not responding");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return ClientResponse::error(KIND_NOT_RUNNING, "daemon not running");
            }
            Err(err) => return ClientResponse::error("io", format!("connect failed: {err}")),
        };

        let id = format!(
            "speakcache-{}-{}",
            std::process::id(),
            self.request_counter.fetch_add(1, Ordering::Relaxed)
        );
        let request = Request::new(id, method, params);
        debug!(method = method.as_str(), socket = %self.socket_path.display(), "sending request");

        match self.exchange(&mut stream, &request) {
            Ok(response) => ClientResponse::from_response(response),
            Err(resp) => resp,
        }
    }

    fn exchange(
        &self,
        stream: &mut UnixStream,
        request: &Request,
    ) -> Result<Response, ClientResponse> {
        let io_error = |err: std::io::Error| match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => ClientResponse::error(
                KIND_TIMEOUT,
                format!("daemon did not answer within {:?}", self.timeout),
            ),
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
                ClientResponse::error(KIND_NOT_RESPONDING, "daemon not responding")
            }
            _ => ClientResponse::error("io", err.to_string()),
        };

        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(io_error)?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(io_error)?;

        let encoded = encode_line(request)
            .map_err(|e| ClientResponse::error(KIND_DECODE, format!("encoding request: {e}")))?;
        stream.write_all(&encoded).map_err(io_error)?;
        stream.flush().map_err(io_error)?;

        let mut reader = BufReader::new(stream).take(MAX_MESSAGE_BYTES as u64 + 1);
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line).map_err(io_error)?;
        if line.is_empty() {
            return Err(ClientResponse::error(
                KIND_DECODE,
                "daemon closed the connection without a response",
            ));
        }
        serde_json::from_slice(line.trim_ascii_end())
            .map_err(|e| ClientResponse::error(KIND_DECODE, format!("invalid response: {e}")))
    }

    /// A `status` request succeeds.
    pub fn is_alive(&self) -> bool {
        self.send(Method::Status, Value::Null).is_success()
    }

    /// Make sure a daemon answers on this client's socket, spawning one if not.
    pub fn ensure_running(&self, spawn: &SpawnConfig, force_restart: bool) -> Result<(), SpawnError> {
        if force_restart {
            // A live daemon keeps its lock; the replacement could never start.
            super::control::stop_lock_holder(&RuntimePaths::new(&spawn.runtime_dir));
        } else if self.is_alive() {
            return Ok(());
        }
        remove_socket(&self.socket_path);

        let started = Instant::now();
        let mut child = spawn.command().spawn().map_err(|source| SpawnError::Spawn {
            binary: spawn.binary.clone(),
            source,
        })?;
        info!(
            pid = child.id(),
            binary = %spawn.binary.display(),
            runtime_dir = %spawn.runtime_dir.display(),
            "spawned daemon"
        );

        let lock_path = spawn.runtime_dir.join(super::LOCK_FILE);
        let mut exited = false;
        loop {
            if self.socket_path.exists() && self.is_alive() {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "daemon is up"
                );
                return Ok(());
            }
            if !exited {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        // Another daemon holds the lock and is still warming up.
                        match lock_holder(&lock_path) {
                            Some(pid) => {
                                debug!(pid, "spawn lost the lock race; waiting on peer");
                                exited = true;
                            }
                            None => {
                                return Err(SpawnError::Exited {
                                    status: status.to_string(),
                                });
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(err) => debug!(error = %err, "cannot poll spawned daemon"),
                }
            }
            if started.elapsed() >= spawn.timeout {
                warn!(timeout = ?spawn.timeout, "daemon did not come up in time");
                return Err(SpawnError::Timeout {
                    waited: spawn.timeout,
                });
            }
            std::thread::sleep(spawn.poll_interval);
        }
    }
}

fn remove_socket(path: &Path) {
    if let Err(err) = std::fs::remove_file(path)
        && err.kind() != ErrorKind::NotFound
    {
        debug!(socket = %path.display(), error = %err, "could not remove socket");
    }
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn daemon {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon exited during startup ({status})")]
    Exited { status: String },

    #[error("daemon did not become ready within {waited:?}")]
    Timeout { waited: Duration },

    #[error("cannot determine daemon binary: {0}")]
    Binary(std::io::Error),
}

/// How to launch a detached daemon.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub binary: PathBuf,
    pub runtime_dir: PathBuf,
    /// Extra arguments after `daemon --runtime-dir <dir>`.
    pub extra_args: Vec<OsString>,
    /// Environment overrides for the daemon process.
    pub envs: Vec<(OsString, OsString)>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl SpawnConfig {
    pub fn new(binary: impl Into<PathBuf>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            runtime_dir: runtime_dir.into(),
            extra_args: Vec::new(),
            envs: Vec::new(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// The running executable, unless `SPEAKCACHE_DAEMON_BINARY` names another.
    pub fn current_exe(runtime_dir: impl Into<PathBuf>) -> Result<Self, SpawnError> {
        let binary = match dotenvy::var("SPEAKCACHE_DAEMON_BINARY") {
            Ok(path) => PathBuf::from(path),
            Err(_) => std::env::current_exe().map_err(SpawnError::Binary)?,
        };
        Ok(Self::new(binary, runtime_dir))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("daemon")
            .arg("--runtime-dir")
            .arg(&self.runtime_dir)
            .args(&self.extra_args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_socket_is_not_running() {
        let tmp = TempDir::new().unwrap();
        let client = DaemonClient::new(tmp.path().join("daemon.sock"));
        let resp = client.send(Method::Status, Value::Null);
        assert_eq!(
            resp,
            ClientResponse::Error {
                kind: KIND_NOT_RUNNING.into(),
                message: "daemon not running".into()
            }
        );
        assert!(resp.is_transport_error());
    }

    #[test]
    fn dead_socket_is_not_responding() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let resp = DaemonClient::new(&path).send(Method::Status, Value::Null);
        assert_eq!(resp.kind(), Some(KIND_NOT_RESPONDING));
    }

    #[test]
    fn garbage_reply_is_a_decode_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(conn.try_clone().unwrap())
                .read_line(&mut line)
                .unwrap();
            conn.write_all(b"not json\n").unwrap();
        });

        let resp = DaemonClient::new(&path).send(Method::Status, Value::Null);
        server.join().unwrap();
        assert_eq!(resp.kind(), Some(KIND_DECODE));
    }

    #[test]
    fn daemon_errors_keep_their_kind() {
        let resp = ClientResponse::from_response(Response::error(
            json!("x"),
            "validation",
            "Text cannot be empty",
        ));
        assert_eq!(
            resp,
            ClientResponse::Error {
                kind: "validation".into(),
                message: "Text cannot be empty".into()
            }
        );
        assert!(!resp.is_transport_error());
    }

    #[test]
    fn spawn_failure_is_reported_quickly() {
        let tmp = TempDir::new().unwrap();
        let client = DaemonClient::new(tmp.path().join("daemon.sock"));
        let spawn = SpawnConfig::new(tmp.path().join("no-such-binary"), tmp.path())
            .with_timeout(Duration::from_secs(5));
        let started = Instant::now();
        let err = client.ensure_running(&spawn, false).unwrap_err();
        assert!(matches!(err, SpawnError::Spawn { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
