//! MiniLM-L6-v2 via FastEmbed (ONNX Runtime), loaded from local files.

use std::fs;
use std::path::PathBuf;

use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::embedder::{Embedder, EmbedderError, EmbedderResult, l2_normalize};

pub const MINILM_ID: &str = "minilm-384";
pub const MINILM_DIMENSION: usize = 384;

pub struct FastEmbedder {
    model_dir: PathBuf,
    model: Mutex<Option<TextEmbedding>>,
}

impl FastEmbedder {
    /// Lightweight handle; nothing is read until [`Embedder::ensure_loaded`].
    pub fn new(model_dir: PathBuf) -> Self {
        Self {
            model_dir,
            model: Mutex::new(None),
        }
    }

    fn read(&self, name: &str) -> EmbedderResult<Vec<u8>> {
        let path = self.model_dir.join(name);
        fs::read(&path)
            .map_err(|e| EmbedderError::Unavailable(format!("read {}: {e}", path.display())))
    }

    fn load(&self) -> EmbedderResult<TextEmbedding> {
        let started = std::time::Instant::now();
        let tokenizer_files = TokenizerFiles {
            tokenizer_file: self.read("tokenizer.json")?,
            config_file: self.read("config.json")?,
            special_tokens_map_file: self.read("special_tokens_map.json")?,
            tokenizer_config_file: self.read("tokenizer_config.json")?,
        };
        let model = UserDefinedEmbeddingModel::new(self.read("model.onnx")?, tokenizer_files);
        let embedding =
            TextEmbedding::try_new_from_user_defined(model, InitOptionsUserDefined::default())
                .map_err(|e| EmbedderError::Unavailable(e.to_string()))?;
        info!(
            dir = %self.model_dir.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "MiniLM model loaded"
        );
        Ok(embedding)
    }
}

impl Embedder for FastEmbedder {
    fn id(&self) -> &str {
        MINILM_ID
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn ensure_loaded(&self) -> EmbedderResult<()> {
        let mut guard = self.model.lock();
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.model.lock().is_some()
    }

    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbedderError::InvalidInput("empty text".into()));
        }
        self.ensure_loaded()?;
        let mut guard = self.model.lock();
        let model = guard
            .as_mut()
            .ok_or_else(|| EmbedderError::Unavailable("model not loaded".into()))?;
        let mut vectors = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbedderError::Failed(e.to_string()))?;
        let mut vector = vectors
            .pop()
            .ok_or_else(|| EmbedderError::Failed("model returned no embedding".into()))?;
        if vector.len() != MINILM_DIMENSION {
            return Err(EmbedderError::Failed(format!(
                "unexpected embedding dimension {}",
                vector.len()
            )));
        }
        l2_normalize(&mut vector);
        debug!(chars = text.len(), "embedded text");
        Ok(vector)
    }
}
