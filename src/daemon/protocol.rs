//! Line-delimited JSON protocol spoken over the daemon socket.
//!
//! One request per connection: the client writes a single JSON object
//! followed by `\n`, the daemon answers with a single JSON object followed
//! by `\n` and closes.
//!
//! ```text
//! -> {"id": 1, "method": "status", "params": {}}
//! <- {"id": 1, "status": "success", "result": {"pid": 4242, "models_loaded": true}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::SpeakError;

/// Requests larger than this are rejected without being parsed.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Queue item previews are cut to this many characters.
pub const PREVIEW_CHARS: usize = 50;

/// Methods understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Speak,
    Status,
    QueueStatus,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "speak" => Some(Method::Speak),
            "status" => Some(Method::Status),
            "queue_status" => Some(Method::QueueStatus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Speak => "speak",
            Method::Status => "status",
            Method::QueueStatus => "queue_status",
        }
    }
}

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Opaque correlation id, echoed back verbatim.
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: Method, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.as_str().to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The daemon's answer. Errors carry `{"error": message, "kind": tag}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Value,
    pub status: Status,
    #[serde(default)]
    pub result: Value,
}

impl Response {
    pub fn success(id: Value, result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(result) => Self {
                id,
                status: Status::Success,
                result,
            },
            Err(err) => Self::error(id, "internal", format!("encoding result: {err}")),
        }
    }

    pub fn error(id: Value, kind: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            status: Status::Error,
            result: json!({ "error": message.into(), "kind": kind }),
        }
    }

    pub fn from_speak_error(id: Value, err: &SpeakError) -> Self {
        Self::error(id, err.kind(), err.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.result.get("error").and_then(Value::as_str)
    }
}

/// Parse one request line. The error is the message to send back.
pub fn parse_request(line: &[u8]) -> Result<Request, String> {
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(format!(
            "Request too large: {} bytes (limit {MAX_MESSAGE_BYTES})",
            line.len()
        ));
    }
    serde_json::from_slice(line).map_err(|e| format!("Invalid JSON: {e}"))
}

/// Serialize `msg` followed by a newline.
pub fn encode_line<T: Serialize>(msg: &T) -> serde_json::Result<Vec<u8>> {
    let mut buf = serde_json::to_vec(msg)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Result of a queued `speak`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedResult {
    pub queued: bool,
    pub queue_id: String,
    /// 1-based; counts the item being played.
    pub queue_position: usize,
    pub timestamp: String,
}

/// Result of `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResult {
    pub pid: u32,
    pub models_loaded: bool,
    /// Seconds since the daemon started.
    #[serde(default)]
    pub uptime: f64,
    /// Vectors in the semantic cache.
    #[serde(default)]
    pub cache_entries: usize,
}

/// A queue entry as reported by `queue_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItemView {
    pub id: String,
    pub text: String,
    pub timestamp: String,
    pub provider: String,
    pub voice: String,
}

/// Result of `queue_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatusResult {
    /// Tracked items including the one playing.
    pub queue_size: usize,
    pub current: Option<QueueItemView>,
    pub waiting: Vec<QueueItemView>,
}

/// First [`PREVIEW_CHARS`] characters plus `...` when longer.
pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
