//! Error taxonomy shared by the pipeline, the daemon and the HTTP surface.
//!
//! Cache-layer failures never appear here: they are recovered locally as a
//! miss or a skipped store. Everything in [`SpeakError`] reaches the caller
//! with its original message intact.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeakError {
    /// Rejected before any I/O (empty text, threshold out of range).
    #[error("{0}")]
    Validation(String),

    /// Unknown provider or backend.
    #[error("{0}")]
    NotFound(String),

    /// Missing or invalid credentials. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider call failed after authentication.
    #[error("provider error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    /// Audio output failed (no player, player exited non-zero).
    #[error("playback failed: {0}")]
    Playback(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeakError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SpeakError::Validation(msg.into())
    }

    pub fn api(msg: impl Into<String>, status: Option<u16>) -> Self {
        SpeakError::Api {
            message: msg.into(),
            status,
        }
    }

    /// Short machine-readable tag used in IPC/HTTP error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SpeakError::Validation(_) => "validation",
            SpeakError::NotFound(_) => "not_found",
            SpeakError::Auth(_) => "auth",
            SpeakError::Api { .. } => "api",
            SpeakError::Playback(_) => "playback",
            SpeakError::Io(_) => "io",
        }
    }
}

pub type SpeakResult<T> = std::result::Result<T, SpeakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_preserved_verbatim() {
        let err = SpeakError::NotFound("Provider 'nope' not found. Available: system".into());
        assert_eq!(
            err.to_string(),
            "Provider 'nope' not found. Available: system"
        );
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn api_error_keeps_status() {
        let err = SpeakError::api("rate limit exceeded", Some(429));
        match err {
            SpeakError::Api { status, .. } => assert_eq!(status, Some(429)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
