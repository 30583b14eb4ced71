//! Speech synthesis backends.
//!
//! The registry is an ordinary value built once at startup and passed to
//! whoever needs provider lookup.

pub mod elevenlabs;
pub mod kokoro;
pub mod system;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::error::{SpeakError, SpeakResult};

pub use elevenlabs::ElevenLabsProvider;
pub use kokoro::KokoroProvider;
pub use system::SystemProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub provider: String,
}

/// A text-to-speech backend.
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Synthesize `text`; `None` lets the backend pick its default voice.
    fn synthesize(&self, text: &str, voice: Option<&str>) -> SpeakResult<Vec<u8>>;

    fn list_voices(&self) -> SpeakResult<Vec<Voice>>;
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn TtsProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `system`, `kokoro` and `elevenlabs`, configured from `config`.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SystemProvider::new()));
        registry.register(Arc::new(ElevenLabsProvider::new(
            config.tts.elevenlabs_api_key.clone(),
        )));
        let mut kokoro = KokoroProvider::new();
        if let Some(url) = &config.tts.kokoro_url {
            kokoro = kokoro.with_base_url(url.as_str());
        }
        registry.register(Arc::new(kokoro));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn TtsProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> SpeakResult<Arc<dyn TtsProvider>> {
        self.providers.get(name).cloned().ok_or_else(|| {
            SpeakError::NotFound(format!(
                "Provider '{name}' not found. Available: {}",
                self.names().join(", ")
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl TtsProvider for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn synthesize(&self, _text: &str, _voice: Option<&str>) -> SpeakResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn list_voices(&self) -> SpeakResult<Vec<Voice>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn unknown_provider_lists_available_names() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Silent));
        let err = registry.get("nope").err().unwrap();
        assert!(matches!(err, SpeakError::NotFound(_)));
        assert_eq!(
            err.to_string(),
            "Provider 'nope' not found. Available: silent"
        );
    }

    #[test]
    fn defaults_include_every_backend() {
        let registry = ProviderRegistry::with_defaults(&Config::default());
        assert_eq!(registry.names(), vec!["elevenlabs", "kokoro", "system"]);
        assert!(registry.get("system").is_ok());
        assert!(registry.get("kokoro").is_ok());
    }
}
