//! Embedding backends and the registry that picks one.
//!
//! | Name   | ID         | Dimension | Notes                                  |
//! |--------|------------|-----------|----------------------------------------|
//! | minilm | minilm-384 | 384       | ONNX MiniLM-L6-v2, needs model files    |
//! | hash   | fnv1a-384  | 384       | Feature hashing, always available       |
//!
//! Construction is cheap; heavyweight state is created by
//! [`Embedder::ensure_loaded`], which the daemon calls during warmup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::hash_embedder::HashEmbedder;

pub const MINILM_EMBEDDER: &str = "minilm";
pub const HASH_EMBEDDER: &str = "hash";
pub const AUTO_EMBEDDER: &str = "auto";

pub const MINILM_DIR: &str = "all-MiniLM-L6-v2";

/// Files required for the ONNX embedder.
pub const REQUIRED_ONNX_FILES: &[&str] = &[
    "model.onnx",
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("embedder unavailable: {0}")]
    Unavailable(String),

    #[error("embedding failed: {0}")]
    Failed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type EmbedderResult<T> = std::result::Result<T, EmbedderError>;

/// Text to fixed-length unit vector.
pub trait Embedder: Send + Sync {
    /// Stable identifier recorded in persisted index files.
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Load heavyweight state. Idempotent.
    fn ensure_loaded(&self) -> EmbedderResult<()>;

    fn is_loaded(&self) -> bool;

    /// Embed `text`. Implementations return L2-normalised vectors.
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>>;
}

/// Scale `v` to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn minilm_model_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("models").join(MINILM_DIR)
}

pub fn missing_model_files(data_dir: &Path) -> Vec<String> {
    let dir = minilm_model_dir(data_dir);
    REQUIRED_ONNX_FILES
        .iter()
        .filter(|f| !dir.join(f).is_file())
        .map(|f| f.to_string())
        .collect()
}

pub fn minilm_available(data_dir: &Path) -> bool {
    cfg!(feature = "fastembed") && missing_model_files(data_dir).is_empty()
}

/// Resolve `name` (`auto`, `minilm`, `hash`) to a concrete backend.
pub fn get_embedder(data_dir: &Path, name: &str) -> EmbedderResult<Arc<dyn Embedder>> {
    let resolved = match name {
        AUTO_EMBEDDER if minilm_available(data_dir) => MINILM_EMBEDDER,
        AUTO_EMBEDDER => {
            if cfg!(feature = "fastembed") {
                info!(
                    dir = %minilm_model_dir(data_dir).display(),
                    "MiniLM model not installed; using the hash embedder. \
                     Run `speakcache models download` for paraphrase-aware caching"
                );
            }
            HASH_EMBEDDER
        }
        other => other,
    };

    match resolved {
        HASH_EMBEDDER => Ok(Arc::new(HashEmbedder::default())),
        MINILM_EMBEDDER => load_minilm(data_dir),
        other => Err(EmbedderError::Unavailable(format!(
            "unknown embedder '{other}' (expected one of: {AUTO_EMBEDDER}, {MINILM_EMBEDDER}, {HASH_EMBEDDER})"
        ))),
    }
}

#[cfg(feature = "fastembed")]
fn load_minilm(data_dir: &Path) -> EmbedderResult<Arc<dyn Embedder>> {
    let missing = missing_model_files(data_dir);
    if !missing.is_empty() {
        return Err(EmbedderError::Unavailable(format!(
            "MiniLM model files missing in {}: {} (run `speakcache models download`)",
            minilm_model_dir(data_dir).display(),
            missing.join(", ")
        )));
    }
    info!(dir = %minilm_model_dir(data_dir).display(), "using MiniLM embedder");
    Ok(Arc::new(super::fastembed_embedder::FastEmbedder::new(
        minilm_model_dir(data_dir),
    )))
}

#[cfg(not(feature = "fastembed"))]
fn load_minilm(_data_dir: &Path) -> EmbedderResult<Arc<dyn Embedder>> {
    info!("MiniLM requested but the fastembed feature is disabled");
    Err(EmbedderError::Unavailable(
        "built without the `fastembed` feature".into(),
    ))
}
