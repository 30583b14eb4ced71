//! Client-side speak: daemon first, one forced restart, then in-process.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::daemon::client::{ClientResponse, DaemonClient, SpawnConfig};
use crate::daemon::{Method, RuntimePaths};
use crate::error::{SpeakError, SpeakResult};
use crate::pipeline::{Pipeline, SpeakOutcome, SpeakRequest};

/// Where a request ended up being handled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum SpeakReport {
    Daemon { result: Value },
    InProcess { outcome: SpeakOutcome },
}

/// Everything needed to reach (or start) the daemon.
#[derive(Debug, Clone)]
pub struct DaemonTarget {
    pub paths: RuntimePaths,
    pub client_timeout: std::time::Duration,
    pub spawn: SpawnConfig,
}

impl DaemonTarget {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let dir = config.runtime_dir()?;
        let spawn = SpawnConfig::current_exe(&dir)?.with_timeout(config.daemon.spawn_timeout());
        Ok(Self {
            paths: RuntimePaths::new(dir),
            client_timeout: config.daemon.request_timeout(),
            spawn,
        })
    }

    pub fn client(&self) -> DaemonClient {
        DaemonClient::for_runtime(&self.paths).with_timeout(self.client_timeout)
    }
}

/// Daemon rejections that a restart cannot fix.
fn request_error(response: &ClientResponse) -> Option<SpeakError> {
    let ClientResponse::Error { kind, message } = response else {
        return None;
    };
    match kind.as_str() {
        "validation" => Some(SpeakError::Validation(message.clone())),
        "not_found" => Some(SpeakError::NotFound(message.clone())),
        "auth" => Some(SpeakError::Auth(message.clone())),
        _ => None,
    }
}

fn attempt(client: &DaemonClient, target: &DaemonTarget, params: &Value, force: bool) -> ClientResponse {
    if let Err(err) = client.ensure_running(&target.spawn, force) {
        warn!(error = %err, force, "daemon unavailable");
        return ClientResponse::Error {
            kind: "spawn".into(),
            message: err.to_string(),
        };
    }
    client.send(Method::Speak, params.clone())
}

/// Speak through the daemon, restarting it once on failure and finally
/// falling back to an in-process pipeline.
pub fn speak(config: &Config, target: Option<&DaemonTarget>, request: &SpeakRequest) -> SpeakResult<SpeakReport> {
    if let Some(target) = target {
        let params = serde_json::to_value(request)
            .map_err(|e| SpeakError::Io(std::io::Error::other(e)))?;
        let client = target.client();

        for force in [false, true] {
            match attempt(&client, target, &params, force) {
                ClientResponse::Success(result) => {
                    debug!(restarted = force, "daemon accepted request");
                    return Ok(SpeakReport::Daemon { result });
                }
                resp => {
                    if let Some(err) = request_error(&resp) {
                        return Err(err);
                    }
                    if let ClientResponse::Error { kind, message } = resp {
                        warn!(%kind, %message, restarted = force, "daemon request failed");
                    }
                }
            }
        }
        info!("falling back to in-process synthesis");
    }

    let outcome = Pipeline::from_config(config).run(request)?;
    Ok(SpeakReport::InProcess { outcome })
}

/// Relative output paths are resolved here, not in the daemon's working directory.
pub fn absolute_output(request: &mut SpeakRequest) -> std::io::Result<()> {
    if let Some(out) = &request.output
        && out.is_relative()
    {
        request.output = Some(std::path::absolute(out)?);
    }
    Ok(())
}

/// Text from the argument, a file, or stdin, in that order.
pub fn read_text(text: Option<String>, file: Option<PathBuf>) -> std::io::Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(path);
    }
    std::io::read_to_string(std::io::stdin())
}
