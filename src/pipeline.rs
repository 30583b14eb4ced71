//! The speak pipeline shared by the daemon worker and in-process runs:
//! validate, look up the cache, synthesize on miss, store, then play or save.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::{AudioOutput, CommandPlayer};
use crate::cache::{self, SemanticCache};
use crate::config::Config;
use crate::error::{SpeakError, SpeakResult};
use crate::providers::ProviderRegistry;

/// Voice name used as the cache key when none is given.
pub const DEFAULT_VOICE_KEY: &str = "default";

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Save here instead of playing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default = "yes")]
    pub cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_threshold: Option<f32>,
    #[serde(default = "yes")]
    pub queue: bool,
    #[serde(default)]
    pub debug: bool,
}

impl SpeakRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provider: None,
            voice: None,
            output: None,
            cache: true,
            cache_threshold: None,
            queue: true,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakOutcome {
    pub played: bool,
    pub saved: Option<PathBuf>,
    pub cached: bool,
}

pub struct Pipeline {
    providers: ProviderRegistry,
    cache: Option<Arc<SemanticCache>>,
    audio: Arc<dyn AudioOutput>,
    default_provider: String,
    default_voice: Option<String>,
    default_threshold: f32,
}

impl Pipeline {
    pub fn new(
        providers: ProviderRegistry,
        cache: Option<Arc<SemanticCache>>,
        audio: Arc<dyn AudioOutput>,
        config: &Config,
    ) -> Self {
        Self {
            providers,
            cache,
            audio,
            default_provider: config.tts.provider.clone(),
            default_voice: config.tts.voice.clone(),
            default_threshold: config.cache.threshold,
        }
    }

    /// Real providers, system audio player and the on-disk cache.
    ///
    /// A cache that cannot be opened is logged and disabled.
    pub fn from_config(config: &Config) -> Self {
        let cache = if config.cache.enabled {
            open_cache(config)
        } else {
            None
        };
        Self::new(
            ProviderRegistry::with_defaults(config),
            cache,
            Arc::new(CommandPlayer::new()),
            config,
        )
    }

    pub fn cache(&self) -> Option<&Arc<SemanticCache>> {
        self.cache.as_ref()
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Load the embedding model and resolve the audio player. Failures are
    /// logged; the pipeline still works without them.
    pub fn warm(&self) {
        if let Some(cache) = &self.cache
            && let Err(err) = cache.warm()
        {
            warn!(error = %err, "cache warmup failed");
        }
        if let Err(err) = self.audio.warm() {
            warn!(error = %err, "audio warmup failed");
        }
    }

    pub fn is_warm(&self) -> bool {
        self.cache.as_ref().is_none_or(|c| c.is_loaded())
    }

    /// Checks that need no I/O.
    pub fn validate(&self, req: &SpeakRequest) -> SpeakResult<()> {
        if req.text.trim().is_empty() {
            return Err(SpeakError::validation("Text cannot be empty"));
        }
        if let Some(t) = req.cache_threshold
            && !(0.0..=1.0).contains(&t)
        {
            return Err(SpeakError::validation(format!(
                "cache_threshold must be between 0.0 and 1.0, got {t}"
            )));
        }
        self.providers.get(self.provider_name(req))?;
        Ok(())
    }

    fn provider_name<'a>(&'a self, req: &'a SpeakRequest) -> &'a str {
        req.provider.as_deref().unwrap_or(&self.default_provider)
    }

    /// Run the full pipeline. Blocking.
    pub fn run(&self, req: &SpeakRequest) -> SpeakResult<SpeakOutcome> {
        self.validate(req)?;
        let text = req.text.trim();
        let provider_name = self.provider_name(req);
        let provider = self.providers.get(provider_name)?;
        let voice = req.voice.clone().or_else(|| self.default_voice.clone());
        let voice_key = voice.as_deref().unwrap_or(DEFAULT_VOICE_KEY);
        let threshold = req.cache_threshold.unwrap_or(self.default_threshold);

        let cache = self
            .cache
            .as_ref()
            .filter(|_| req.cache && cache::is_cacheable(text));
        if req.cache && self.cache.is_some() && cache.is_none() {
            debug!(chars = text.chars().count(), "text too long to cache");
        }

        let mut cached = false;
        let mut audio = None;
        if let Some(cache) = cache
            && let Some(path) = cache.get(text, provider_name, voice_key, threshold)
        {
            match fs::read(&path) {
                Ok(bytes) => {
                    info!(path = %path.display(), "using cached audio");
                    cached = true;
                    audio = Some(bytes);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "cached audio unreadable"),
            }
        }

        let audio = match audio {
            Some(bytes) => bytes,
            None => {
                let bytes = provider.synthesize(text, voice.as_deref())?;
                if let Some(cache) = cache {
                    match cache.put(text, provider_name, voice_key, &bytes) {
                        Ok(path) => debug!(path = %path.display(), "stored audio in cache"),
                        Err(err) if err.is_duplicate() => {
                            debug!("audio already cached for this key")
                        }
                        Err(err) => warn!(error = %err, "failed to cache audio"),
                    }
                }
                bytes
            }
        };

        match &req.output {
            Some(path) => {
                self.audio.save(&audio, path)?;
                Ok(SpeakOutcome {
                    played: false,
                    saved: Some(path.clone()),
                    cached,
                })
            }
            None => {
                self.audio.play(&audio)?;
                Ok(SpeakOutcome {
                    played: true,
                    saved: None,
                    cached,
                })
            }
        }
    }
}

fn open_cache(config: &Config) -> Option<Arc<SemanticCache>> {
    let data_dir = config.data_dir();
    let embedder = match cache::get_embedder(&data_dir, &config.cache.embedder) {
        Ok(e) => e,
        Err(err) => {
            warn!(error = %err, "embedder unavailable; falling back to hash embedder");
            Arc::new(cache::hash_embedder::HashEmbedder::default())
        }
    };
    match SemanticCache::open(config.cache_dir(), embedder) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(err) => {
            warn!(error = %err, "cache unavailable; continuing without it");
            None
        }
    }
}
