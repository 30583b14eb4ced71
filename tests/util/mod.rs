//! Deterministic collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use speakcache::audio::AudioOutput;
use speakcache::cache::embedder::EmbedderResult;
use speakcache::cache::{Embedder, EmbedderError, SemanticCache};
use speakcache::config::Config;
use speakcache::error::SpeakResult;
use speakcache::pipeline::Pipeline;
use speakcache::providers::{ProviderRegistry, TtsProvider, Voice};

/// Embedder returning fixed vectors for known texts.
pub struct StubEmbedder {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension);
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

impl Embedder for StubEmbedder {
    fn id(&self) -> &str {
        "stub"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn ensure_loaded(&self) -> EmbedderResult<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| EmbedderError::InvalidInput(format!("no stub vector for {text:?}")))
    }
}

pub fn open_cache(dir: &Path, embedder: StubEmbedder) -> SemanticCache {
    SemanticCache::open(dir, Arc::new(embedder)).unwrap()
}

/// Provider that echoes the text back as audio bytes.
#[derive(Default)]
pub struct EchoProvider {
    pub calls: AtomicUsize,
}

impl TtsProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn synthesize(&self, text: &str, voice: Option<&str>) -> SpeakResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}:{text}", voice.unwrap_or("default")).into_bytes())
    }

    fn list_voices(&self) -> SpeakResult<Vec<Voice>> {
        Ok(vec![Voice {
            id: "plain".into(),
            name: "Plain".into(),
            provider: "echo".into(),
        }])
    }
}

/// One playback: clip contents with start and end instants.
#[derive(Debug, Clone)]
pub struct Playback {
    pub clip: String,
    pub started: Instant,
    pub ended: Instant,
}

/// Audio output that takes `delay` per clip and records when it played.
pub struct SlowAudio {
    delay: Duration,
    pub played: Mutex<Vec<Playback>>,
}

impl SlowAudio {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            played: Mutex::new(Vec::new()),
        }
    }

    /// Playbacks whose clip contains `needle`, in start order.
    pub fn matching(&self, needle: &str) -> Vec<Playback> {
        let mut out: Vec<Playback> = self
            .played
            .lock()
            .iter()
            .filter(|p| p.clip.contains(needle))
            .cloned()
            .collect();
        out.sort_by_key(|p| p.started);
        out
    }
}

impl AudioOutput for SlowAudio {
    fn warm(&self) -> SpeakResult<()> {
        Ok(())
    }

    fn play(&self, audio: &[u8]) -> SpeakResult<()> {
        let started = Instant::now();
        std::thread::sleep(self.delay);
        self.played.lock().push(Playback {
            clip: String::from_utf8_lossy(audio).into_owned(),
            started,
            ended: Instant::now(),
        });
        Ok(())
    }
}

/// Pipeline over [`EchoProvider`] and `audio`, without a cache.
pub fn echo_pipeline(audio: Arc<SlowAudio>) -> (Arc<Pipeline>, Arc<EchoProvider>) {
    let provider = Arc::new(EchoProvider::default());
    let mut providers = ProviderRegistry::new();
    providers.register(provider.clone());
    let mut config = Config::default();
    config.tts.provider = "echo".into();
    let pipeline = Pipeline::new(providers, None, audio, &config);
    (Arc::new(pipeline), provider)
}
