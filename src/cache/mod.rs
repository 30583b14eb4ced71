//! Semantic audio cache.
//!
//! A cache directory holds:
//!
//! ```text
//! <cache_dir>/
//!   metadata.db       position -> record (SQLite, WAL)
//!   embeddings.vec    raw vector array
//!   similarity.idx    flat search structure
//!   audio/<hash>.mp3  audio blobs
//!   cache.lock        writer lock shared by every process using the dir
//! ```

pub mod embedder;
#[cfg(feature = "fastembed")]
pub mod fastembed_embedder;
pub mod file_lock;
pub mod hash_embedder;
pub mod manager;
pub mod models;
pub mod storage;
pub mod vector_index;

use sha2::{Digest, Sha256};

pub use embedder::{Embedder, EmbedderError, get_embedder};
pub use manager::{CacheError, DEFAULT_THRESHOLD, SEARCH_CANDIDATES, SemanticCache};
pub use storage::{CacheKey, CacheRecord, MetadataStore, StoreError};
pub use vector_index::{SearchHit, VectorIndex};

pub const AUDIO_DIR: &str = "audio";

/// Texts longer than this bypass the cache entirely.
pub const MAX_CACHEABLE_CHARS: usize = 500;

/// First 8 hex chars of SHA-256 over `"{text}:{provider}:{voice}"`.
pub fn audio_hash(text: &str, provider: &str, voice: &str) -> String {
    let digest = Sha256::digest(format!("{text}:{provider}:{voice}").as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// File extension for an audio blob, sniffed from its header.
pub fn audio_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"RIFF") {
        "wav"
    } else {
        "mp3"
    }
}

pub fn is_cacheable(text: &str) -> bool {
    text.chars().count() <= MAX_CACHEABLE_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_hash_is_eight_hex_chars_and_key_sensitive() {
        let a = audio_hash("hello", "system", "default");
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, audio_hash("hello", "system", "default"));
        assert_ne!(a, audio_hash("hello", "system", "other"));
    }

    #[test]
    fn audio_hash_matches_sha256_prefix() {
        let expected = hex::encode(Sha256::digest(b"a:b:c"));
        assert_eq!(audio_hash("a", "b", "c"), expected[..8]);
    }

    #[test]
    fn extension_sniffing() {
        assert_eq!(audio_extension(b"RIFF\0\0\0\0WAVE"), "wav");
        assert_eq!(audio_extension(b"ID3\x04"), "mp3");
        assert_eq!(audio_extension(b""), "mp3");
    }

    #[test]
    fn long_texts_are_not_cacheable() {
        assert!(is_cacheable(&"a".repeat(MAX_CACHEABLE_CHARS)));
        assert!(!is_cacheable(&"a".repeat(MAX_CACHEABLE_CHARS + 1)));
    }
}
