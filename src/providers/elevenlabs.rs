//! ElevenLabs REST backend (blocking client; callers run it off the event loop).

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{TtsProvider, Voice};
use crate::error::{SpeakError, SpeakResult};

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_MODEL: &str = "eleven_turbo_v2_5";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<ApiVoice>,
}

#[derive(Debug, Deserialize)]
struct ApiVoice {
    voice_id: String,
    name: String,
}

pub struct ElevenLabsProvider {
    api_key: Option<String>,
    base_url: String,
    model_id: String,
    voices: Mutex<Option<Vec<Voice>>>,
}

impl ElevenLabsProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            model_id: DEFAULT_MODEL.to_string(),
            voices: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn api_key(&self) -> SpeakResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            SpeakError::Auth(
                "ElevenLabs API key not found. Set ELEVENLABS_API_KEY or add it to the config file."
                    .into(),
            )
        })
    }

    fn client(&self) -> SpeakResult<Client> {
        Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("speakcache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SpeakError::api(format!("building http client: {e}"), None))
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> SpeakError {
    let detail = body.trim();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SpeakError::Auth(format!("ElevenLabs rejected the API key ({status}): {detail}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            SpeakError::api(format!("Rate limit exceeded: {detail}"), Some(status.as_u16()))
        }
        s if s.is_server_error() => {
            SpeakError::api(format!("Server error ({s}): {detail}"), Some(s.as_u16()))
        }
        s => SpeakError::api(format!("API call failed ({s}): {detail}"), Some(s.as_u16())),
    }
}

impl TtsProvider for ElevenLabsProvider {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    fn synthesize(&self, text: &str, voice: Option<&str>) -> SpeakResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SpeakError::validation("Text cannot be empty"));
        }
        let api_key = self.api_key()?;

        let voice_id = match voice.filter(|v| !v.is_empty() && *v != "default") {
            Some(v) => v.to_string(),
            None => self
                .list_voices()?
                .into_iter()
                .next()
                .map(|v| v.id)
                .ok_or_else(|| SpeakError::api("No voices available", None))?,
        };

        info!(voice = %voice_id, chars = text.len(), "ElevenLabs synthesis request");
        let url = format!("{}/v1/text-to-speech/{voice_id}", self.base_url);
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": 0.65,
                "similarity_boost": 0.75,
                "style": 0.4,
                "use_speaker_boost": true,
            }
        });

        let response = self
            .client()?
            .post(&url)
            .header("xi-api-key", api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .map_err(|e| SpeakError::api(format!("ElevenLabs request failed: {e}"), None))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let bytes = response
            .bytes()
            .map_err(|e| SpeakError::api(format!("reading ElevenLabs response: {e}"), None))?;
        if bytes.is_empty() {
            return Err(SpeakError::api("No audio data received from API", None));
        }
        debug!(bytes = bytes.len(), "ElevenLabs audio received");
        Ok(bytes.to_vec())
    }

    fn list_voices(&self) -> SpeakResult<Vec<Voice>> {
        if let Some(cached) = self.voices.lock().as_ref() {
            return Ok(cached.clone());
        }
        let api_key = self.api_key()?;

        let response = self
            .client()?
            .get(format!("{}/v1/voices", self.base_url))
            .header("xi-api-key", api_key)
            .send()
            .map_err(|e| SpeakError::api(format!("Failed to list voices: {e}"), None))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: VoicesResponse = response
            .json()
            .map_err(|e| SpeakError::api(format!("parsing voice list: {e}"), None))?;
        let voices: Vec<Voice> = parsed
            .voices
            .into_iter()
            .map(|v| Voice {
                id: v.voice_id,
                name: v.name,
                provider: "elevenlabs".into(),
            })
            .collect();
        *self.voices.lock() = Some(voices.clone());
        Ok(voices)
    }
}
