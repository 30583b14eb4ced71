//! Local Kokoro backend.
//!
//! Talks to a Kokoro server on the local machine through its
//! OpenAI-compatible `/v1/audio/speech` endpoint and asks for WAV output.
//! Nothing leaves the machine and no API key is needed.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use super::{TtsProvider, Voice};
use crate::error::{SpeakError, SpeakResult};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8880";
pub const DEFAULT_MODEL: &str = "kokoro";
pub const DEFAULT_VOICE: &str = "af_heart";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Voices shipped with the Kokoro v1 weights.
pub const VOICES: &[(&str, &str)] = &[
    ("af_heart", "Heart (US female)"),
    ("af_alloy", "Alloy (US female)"),
    ("af_aoede", "Aoede (US female)"),
    ("af_bella", "Bella (US female)"),
    ("af_jessica", "Jessica (US female)"),
    ("af_kore", "Kore (US female)"),
    ("af_nicole", "Nicole (US female)"),
    ("af_nova", "Nova (US female)"),
    ("af_river", "River (US female)"),
    ("af_sarah", "Sarah (US female)"),
    ("af_sky", "Sky (US female)"),
    ("am_adam", "Adam (US male)"),
    ("am_echo", "Echo (US male)"),
    ("am_eric", "Eric (US male)"),
    ("am_fenrir", "Fenrir (US male)"),
    ("am_liam", "Liam (US male)"),
    ("am_michael", "Michael (US male)"),
    ("am_onyx", "Onyx (US male)"),
    ("am_puck", "Puck (US male)"),
    ("bf_alice", "Alice (UK female)"),
    ("bf_emma", "Emma (UK female)"),
    ("bf_isabella", "Isabella (UK female)"),
    ("bf_lily", "Lily (UK female)"),
    ("bm_daniel", "Daniel (UK male)"),
    ("bm_fable", "Fable (UK male)"),
    ("bm_george", "George (UK male)"),
    ("bm_lewis", "Lewis (UK male)"),
];

pub struct KokoroProvider {
    base_url: String,
    model: String,
}

impl Default for KokoroProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KokoroProvider {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> SpeakResult<Client> {
        Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("speakcache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SpeakError::api(format!("building http client: {e}"), None))
    }
}

impl TtsProvider for KokoroProvider {
    fn name(&self) -> &str {
        "kokoro"
    }

    fn synthesize(&self, text: &str, voice: Option<&str>) -> SpeakResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SpeakError::validation("Text cannot be empty"));
        }
        let voice = voice
            .filter(|v| !v.is_empty() && *v != "default")
            .unwrap_or(DEFAULT_VOICE);

        info!(voice, chars = text.len(), "Kokoro synthesis request");
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "response_format": "wav",
        });
        let response = self
            .client()?
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&body)
            .send()
            .map_err(|e| {
                SpeakError::api(
                    format!("Kokoro server at {} unreachable: {e}", self.base_url),
                    None,
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(SpeakError::api(
                format!("Kokoro synthesis failed ({status}): {}", detail.trim()),
                Some(status.as_u16()),
            ));
        }

        let bytes = response
            .bytes()
            .map_err(|e| SpeakError::api(format!("reading Kokoro response: {e}"), None))?;
        if bytes.is_empty() {
            return Err(SpeakError::api("No audio data received from Kokoro", None));
        }
        debug!(bytes = bytes.len(), "Kokoro audio received");
        Ok(bytes.to_vec())
    }

    fn list_voices(&self) -> SpeakResult<Vec<Voice>> {
        Ok(VOICES
            .iter()
            .map(|(id, name)| Voice {
                id: (*id).into(),
                name: (*name).into(),
                provider: "kokoro".into(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_validation_error_without_network() {
        let provider = KokoroProvider::new().with_base_url("http://127.0.0.1:9");
        assert!(matches!(
            provider.synthesize("  ", None).unwrap_err(),
            SpeakError::Validation(_)
        ));
    }

    #[test]
    fn unreachable_server_is_api_error() {
        // Port 9 (discard) is closed on test machines.
        let provider = KokoroProvider::new().with_base_url("http://127.0.0.1:9/");
        assert_eq!(provider.base_url(), "http://127.0.0.1:9");
        match provider.synthesize("hello", None).unwrap_err() {
            SpeakError::Api { status, message } => {
                assert_eq!(status, None);
                assert!(message.contains("unreachable"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn voice_list_starts_with_default() {
        let voices = KokoroProvider::new().list_voices().unwrap();
        assert_eq!(voices[0].id, DEFAULT_VOICE);
        assert_eq!(voices.len(), VOICES.len());
        assert!(voices.iter().all(|v| v.provider == "kokoro"));
    }
}
