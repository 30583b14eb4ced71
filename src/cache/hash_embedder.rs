//! Deterministic feature-hashing embedder.
//!
//! Lowercased word tokens and character trigrams are hashed with FNV-1a into
//! a fixed number of buckets, signed by a second hash bit, then normalised.
//! Quality is far below a neural model but it needs no files and lets
//! near-identical phrasings land close together.

use super::embedder::{Embedder, EmbedderError, EmbedderResult, l2_normalize};

pub const HASH_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    id: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            id: format!("fnv1a-{dimension}"),
            dimension,
        }
    }

    fn add_feature(&self, out: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        out[bucket] += sign * weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_DIMENSION)
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
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
        let normalized = text.to_lowercase();
        let words: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Err(EmbedderError::InvalidInput(
                "text has no embeddable tokens".into(),
            ));
        }

        let mut out = vec![0.0f32; self.dimension];
        for word in &words {
            self.add_feature(&mut out, word, WORD_WEIGHT);
            let padded: Vec<char> = format!("#{word}#").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut out, &gram, TRIGRAM_WEIGHT);
            }
        }
        l2_normalize(&mut out);
        Ok(out)
    }
}
