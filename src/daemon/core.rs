//! Daemon lifecycle, socket server and queue worker.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::RuntimePaths;
use super::lock::DaemonLock;
use super::protocol::{
    MAX_MESSAGE_BYTES, Method, QueueStatusResult, QueuedResult, Request, Response, StatusResult,
    encode_line, parse_request,
};
use super::queue::{QueueItem, SpeechQueue};
use crate::config::Config;
use crate::error::SpeakError;
use crate::pipeline::{Pipeline, SpeakRequest};

/// Daemon settings resolved from [`Config`] and CLI flags.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub paths: RuntimePaths,
    /// Bound on reading one request from a connection.
    pub request_timeout: Duration,
    /// HTTP listener address, when enabled.
    pub http_addr: Option<SocketAddr>,
    /// Required `X-API-Key` / bearer token for HTTP requests.
    pub http_api_key: Option<String>,
    /// Provider shown for queued requests that named none.
    pub default_provider: String,
}

impl DaemonConfig {
    pub fn new(paths: RuntimePaths, config: &Config) -> Self {
        Self {
            paths,
            request_timeout: config.daemon.request_timeout(),
            http_addr: None,
            http_api_key: config.http.api_key.clone(),
            default_provider: config.tts.provider.clone(),
        }
    }

    /// Enable HTTP on `host:port`.
    pub fn with_http(mut self, host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid HTTP address {host}:{port}"))?;
        self.http_addr = Some(addr);
        Ok(self)
    }
}

/// Lifecycle phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    LoadingModels,
    Ready,
    Serving,
    ShuttingDown,
    Stopped,
}

/// State shared by socket handlers, HTTP handlers and the queue worker.
pub struct DaemonState {
    pipeline: Arc<Pipeline>,
    queue: SpeechQueue,
    started: Instant,
    models_loaded: AtomicBool,
    phase: Mutex<Phase>,
    default_provider: String,
}

impl DaemonState {
    pub fn new(pipeline: Arc<Pipeline>, default_provider: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            queue: SpeechQueue::new(),
            started: Instant::now(),
            models_loaded: AtomicBool::new(false),
            phase: Mutex::new(Phase::Starting),
            default_provider: default_provider.into(),
        })
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: Phase) {
        debug!(?phase, "daemon phase");
        *self.phase.lock() = phase;
    }

    pub fn queue(&self) -> &SpeechQueue {
        &self.queue
    }

    pub fn models_loaded(&self) -> bool {
        self.models_loaded.load(Ordering::SeqCst)
    }

    /// Warm the cache and audio output on a blocking thread.
    pub async fn warm(&self) {
        let pipeline = self.pipeline.clone();
        let started = Instant::now();
        if let Err(err) = tokio::task::spawn_blocking(move || pipeline.warm()).await {
            error!(error = %err, "warmup task failed");
        }
        self.models_loaded.store(true, Ordering::SeqCst);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "models loaded"
        );
    }

    pub fn status(&self) -> StatusResult {
        StatusResult {
            pid: std::process::id(),
            models_loaded: self.models_loaded(),
            uptime: self.started.elapsed().as_secs_f64(),
            cache_entries: self.pipeline.cache().map_or(0, |c| c.len()),
        }
    }

    pub fn queue_status(&self) -> QueueStatusResult {
        self.queue.snapshot(&self.default_provider)
    }

    /// Validate, then queue or run immediately.
    pub async fn speak(&self, params: Value) -> Result<Value, SpeakError> {
        if params.is_null() {
            return Err(SpeakError::validation("Missing params for speak"));
        }
        let request: SpeakRequest = serde_json::from_value(params)
            .map_err(|e| SpeakError::validation(format!("Invalid speak params: {e}")))?;
        self.submit(request).await
    }

    /// Queue `request` (or run it now when `queue` is false).
    pub async fn submit(&self, request: SpeakRequest) -> Result<Value, SpeakError> {
        self.pipeline.validate(&request)?;

        if request.queue {
            let item = QueueItem::new(request);
            let queue_id = item.id.clone();
            let timestamp = item.enqueued_at.to_rfc3339();
            let queue_position = self.queue.push(item);
            info!(queue_id = %queue_id, queue_position, "speech queued");
            return to_value(QueuedResult {
                queued: true,
                queue_id,
                queue_position,
                timestamp,
            });
        }

        let pipeline = self.pipeline.clone();
        let outcome = tokio::task::spawn_blocking(move || pipeline.run(&request))
            .await
            .map_err(|e| SpeakError::Io(std::io::Error::other(e.to_string())))??;
        to_value(outcome)
    }

    pub async fn handle_request(&self, request: Request) -> Response {
        let id = request.id;
        match Method::parse(&request.method) {
            Some(Method::Speak) => match self.speak(request.params).await {
                Ok(result) => Response::success(id, result),
                Err(err) => {
                    debug!(kind = err.kind(), error = %err, "speak rejected");
                    Response::from_speak_error(id, &err)
                }
            },
            Some(Method::Status) => Response::success(id, self.status()),
            Some(Method::QueueStatus) => Response::success(id, self.queue_status()),
            None => Response::error(
                id,
                "protocol",
                format!("Unknown method: {}", request.method),
            ),
        }
    }

    /// Start the single queue worker. Failures are logged and never stop it.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let item = state.queue.next().await;
                let id = item.id.clone();
                let pipeline = state.pipeline.clone();
                debug!(queue_id = %id, "processing queued speech");
                match tokio::task::spawn_blocking(move || pipeline.run(&item.request)).await {
                    Ok(Ok(outcome)) => {
                        debug!(queue_id = %id, cached = outcome.cached, "queued speech done")
                    }
                    Ok(Err(err)) => warn!(queue_id = %id, error = %err, "queued speech failed"),
                    Err(err) => error!(queue_id = %id, error = %err, "queued speech task panicked"),
                }
                state.queue.finish(&id);
            }
        })
    }
}

fn to_value(value: impl Serialize) -> Result<Value, SpeakError> {
    serde_json::to_value(value).map_err(|e| SpeakError::Io(std::io::Error::other(e)))
}

/// The daemon process: lock, warmup, listeners, worker.
pub struct SpeechDaemon {
    config: DaemonConfig,
    state: Arc<DaemonState>,
}

impl SpeechDaemon {
    pub fn new(config: DaemonConfig, pipeline: Arc<Pipeline>) -> Self {
        let state = DaemonState::new(pipeline, config.default_provider.clone());
        Self { config, state }
    }

    pub fn state(&self) -> &Arc<DaemonState> {
        &self.state
    }

    /// Serve until SIGTERM or Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let state = self.state;
        let paths = &self.config.paths;

        state.set_phase(Phase::Starting);
        let lock = DaemonLock::try_acquire(paths.lock_path())?;

        state.set_phase(Phase::LoadingModels);
        state.warm().await;

        state.set_phase(Phase::Ready);
        let socket_path = paths.socket_path();
        let listener = bind_socket(&socket_path).await?;
        let worker = state.spawn_worker();
        let http = match self.config.http_addr {
            Some(addr) => Some(
                super::http::spawn(state.clone(), addr, self.config.http_api_key.clone()).await?,
            ),
            None => None,
        };

        state.set_phase(Phase::Serving);
        info!(
            socket = %socket_path.display(),
            pid = std::process::id(),
            http = ?self.config.http_addr,
            "daemon serving"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let state = state.clone();
                        let timeout = self.config.request_timeout;
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(state, stream, timeout).await {
                                debug!(error = %err, "connection error");
                            }
                        });
                    }
                    Err(err) => {
                        error!(error = %err, "accept error");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        state.set_phase(Phase::ShuttingDown);
        info!(queued = state.queue.len(), "daemon shutting down");
        worker.abort();
        if let Some(http) = http {
            http.abort();
        }
        drop(listener);
        if let Err(err) = std::fs::remove_file(&socket_path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(socket = %socket_path.display(), error = %err, "failed to remove socket");
        }
        drop(lock);
        state.set_phase(Phase::Stopped);
        info!("daemon stopped");
        Ok(())
    }
}

/// Bind the socket, refusing to take over one that a live daemon answers on.
pub async fn bind_socket(path: &std::path::Path) -> Result<UnixListener> {
    if path.exists() {
        let attempt =
            tokio::time::timeout(Duration::from_secs(1), UnixStream::connect(path)).await;
        if matches!(attempt, Ok(Ok(_))) {
            bail!("a daemon is already listening on {}", path.display());
        }
        debug!(socket = %path.display(), "removing stale socket");
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener =
        UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(listener)
}

/// Read one request line, answer it, close.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: UnixStream,
    request_timeout: Duration,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).take(MAX_MESSAGE_BYTES as u64 + 1);
    let mut line = Vec::new();

    let read = tokio::time::timeout(request_timeout, reader.read_until(b'\n', &mut line)).await;
    let response = match read {
        Err(_) => {
            debug!("connection timed out before a request arrived");
            return Ok(());
        }
        Ok(Err(err)) => return Err(err),
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) => {
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            match parse_request(&line) {
                Ok(request) => state.handle_request(request).await,
                Err(message) => {
                    warn!(error = %message, "rejected malformed request");
                    Response::error(Value::Null, "protocol", message)
                }
            }
        }
    };

    let encoded = encode_line(&response).map_err(std::io::Error::other)?;
    writer.write_all(&encoded).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Resolves on SIGTERM or Ctrl-C.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
