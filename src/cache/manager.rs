//! `SemanticCache`: embedding index + metadata store + audio blobs.
//!
//! Reads may run concurrently. Writes are serialized, within the process by
//! a mutex and across processes by `cache.lock`, so position assignment and
//! the persisted files stay in lockstep. Before touching the index every
//! operation checks whether another instance rewrote `embeddings.vec` and
//! reloads it if so.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::embedder::{Embedder, EmbedderError};
use super::file_lock::{CACHE_LOCK_FILE, FileLock, LockMode};
use super::storage::{CacheKey, CacheRecord, METADATA_FILE, MetadataStore, StoreError};
use super::vector_index::{DiskState, VectorIndex};
use super::{AUDIO_DIR, audio_extension, audio_hash};

pub const DEFAULT_THRESHOLD: f32 = 0.95;

/// Neighbors examined per lookup.
pub const SEARCH_CANDIDATES: usize = 10;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Embedder(#[from] EmbedderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] anyhow::Error),

    /// Two keys hashed to the same blob name.
    #[error("audio blob {} already belongs to {owner:?}", .path.display())]
    BlobCollision { path: PathBuf, owner: String },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, CacheError::Store(StoreError::Duplicate { .. }))
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

pub struct SemanticCache {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    index: RwLock<VectorIndex>,
    store: MetadataStore,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SemanticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCache")
            .field("dir", &self.dir)
            .field("embedder", &self.embedder.id())
            .field("entries", &self.len())
            .finish()
    }
}

impl SemanticCache {
    /// Open (or create) the cache in `dir`.
    ///
    /// Records pointing past the end of the loaded index are pruned: their
    /// vectors are gone and the positions are about to be handed out again.
    /// A vector array written by a different embedder is rebuilt by
    /// re-embedding every cached text.
    pub fn open(dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> CacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(AUDIO_DIR))?;
        let store = MetadataStore::open(dir.join(METADATA_FILE))?;

        let index = {
            let _lock = FileLock::acquire(&dir.join(CACHE_LOCK_FILE), LockMode::Exclusive)?;
            load_index(&dir, embedder.as_ref(), &store)?
        };

        info!(
            dir = %dir.display(),
            embedder = embedder.id(),
            entries = index.len(),
            "semantic cache opened"
        );

        Ok(Self {
            dir,
            embedder,
            index: RwLock::new(index),
            store,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.dir.join(AUDIO_DIR)
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Number of vectors in the index.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loaded(&self) -> bool {
        self.embedder.is_loaded()
    }

    /// Load the embedding model and run one throwaway lookup.
    pub fn warm(&self) -> CacheResult<()> {
        self.embedder.ensure_loaded()?;
        let _ = self.get("warmup", "system", "default", DEFAULT_THRESHOLD);
        Ok(())
    }

    /// Best cached audio for `text` with exactly this provider and voice.
    ///
    /// Never fails; every error is logged and reported as a miss.
    pub fn get(&self, text: &str, provider: &str, voice: &str, threshold: f32) -> Option<PathBuf> {
        match self.lookup(text, provider, voice, threshold) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(error = %err, "cache lookup failed; treating as miss");
                None
            }
        }
    }

    fn lookup(
        &self,
        text: &str,
        provider: &str,
        voice: &str,
        threshold: f32,
    ) -> CacheResult<Option<PathBuf>> {
        let _lock = self.read_lock()?;
        if self.is_empty() {
            return Ok(None);
        }
        let query = self.embedder.embed(text)?;
        let hits = self
            .index
            .read()
            .search(&query, threshold, SEARCH_CANDIDATES)?;

        for hit in hits {
            let Some(record) = self.store.get_by_position(hit.position)? else {
                warn!(
                    position = hit.position,
                    "vector has no metadata record; skipping"
                );
                continue;
            };
            if !record.audio_path.is_file() {
                warn!(
                    position = hit.position,
                    path = %record.audio_path.display(),
                    "cached audio file missing; skipping"
                );
                continue;
            }
            if record.matches(provider, voice) {
                debug!(
                    similarity = hit.similarity,
                    cached_text = %record.text,
                    "cache hit"
                );
                return Ok(Some(record.audio_path));
            }
        }
        Ok(None)
    }

    /// Store `audio` for `(text, provider, voice)` and return the blob path.
    ///
    /// A key that is already cached fails with a duplicate error before
    /// anything is written, and so does a blob name already owned by another
    /// key. If the metadata write fails after the blob was written the blob
    /// is removed; the appended vector is not.
    pub fn put(&self, text: &str, provider: &str, voice: &str, audio: &[u8]) -> CacheResult<PathBuf> {
        let vector = self.embedder.embed(text)?;

        let _guard = self.write_lock.lock();
        let _lock = self.lock(LockMode::Exclusive)?;
        self.sync_index()?;

        if self
            .store
            .find(&CacheKey::new(text, provider, voice))?
            .is_some()
        {
            return Err(StoreError::Duplicate {
                text: text.to_string(),
                provider: provider.to_string(),
                voice: voice.to_string(),
            }
            .into());
        }

        let file_name = format!(
            "{}.{}",
            audio_hash(text, provider, voice),
            audio_extension(audio)
        );
        let audio_path = self.audio_dir().join(file_name);
        fs::create_dir_all(self.audio_dir())?;
        self.write_blob(&audio_path, audio)?;

        match self.index_and_record(&vector, text, provider, voice, &audio_path) {
            Ok(position) => {
                debug!(position, path = %audio_path.display(), "cached audio");
                Ok(audio_path)
            }
            Err(err) => {
                remove_blob(&audio_path);
                Err(err)
            }
        }
    }

    fn lock(&self, mode: LockMode) -> CacheResult<FileLock> {
        Ok(FileLock::acquire(&self.dir.join(CACHE_LOCK_FILE), mode)?)
    }

    /// Shared lock over an index that matches the disk. Upgrades to the
    /// exclusive lock when a reload is needed.
    fn read_lock(&self) -> CacheResult<FileLock> {
        let shared = self.lock(LockMode::Shared)?;
        if !self.index.read().is_stale() {
            return Ok(shared);
        }
        drop(shared);
        let exclusive = self.lock(LockMode::Exclusive)?;
        self.sync_index()?;
        Ok(exclusive)
    }

    /// Reload the index if another instance rewrote it. Requires the
    /// exclusive lock.
    fn sync_index(&self) -> CacheResult<()> {
        let mut index = self.index.write();
        if !index.is_stale() {
            return Ok(());
        }
        let previous = index.len();
        *index = load_index(&self.dir, self.embedder.as_ref(), &self.store)?;
        debug!(
            previous,
            current = index.len(),
            "reloaded vector index changed by another writer"
        );
        Ok(())
    }

    /// Create the blob. An existing file is only replaced when no record
    /// refers to it.
    fn write_blob(&self, path: &Path, audio: &[u8]) -> CacheResult<()> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if let Some(owner) = self.store.find_by_audio_path(path)? {
                    warn!(
                        path = %path.display(),
                        owner = %owner.text,
                        "audio blob name collision; not caching"
                    );
                    return Err(CacheError::BlobCollision {
                        path: path.to_path_buf(),
                        owner: owner.text,
                    });
                }
                debug!(path = %path.display(), "replacing orphaned audio blob");
                OpenOptions::new().write(true).truncate(true).open(path)?
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = file.write_all(audio).and_then(|()| file.flush()) {
            remove_blob(path);
            return Err(err.into());
        }
        Ok(())
    }

    fn index_and_record(
        &self,
        vector: &[f32],
        text: &str,
        provider: &str,
        voice: &str,
        audio_path: &Path,
    ) -> CacheResult<usize> {
        let position = self.index.write().add(vector)?;
        self.store.insert(&CacheRecord {
            text: text.to_string(),
            provider: provider.to_string(),
            voice: voice.to_string(),
            audio_path: audio_path.to_path_buf(),
            embedding_position: position,
            created_at: Utc::now(),
        })?;
        Ok(position)
    }
}

fn remove_blob(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %err, "failed to remove audio blob");
    }
}

/// Load the index and bring the store in line with it. Requires the
/// exclusive lock.
fn load_index(dir: &Path, embedder: &dyn Embedder, store: &MetadataStore) -> CacheResult<VectorIndex> {
    let state = VectorIndex::read_state(dir).unwrap_or_else(|err| {
        debug!(error = %err, "vector array header unreadable");
        None
    });
    if let Some(state) = state.filter(|s| s.is_foreign(embedder.id(), embedder.dimension())) {
        return reindex(dir, embedder, store, &state);
    }

    let index = VectorIndex::open(dir, embedder.id(), embedder.dimension());
    let pruned = store.prune_from(index.len())?;
    if pruned > 0 {
        warn!(
            pruned,
            index_len = index.len(),
            "pruned metadata records with no vector"
        );
    }
    Ok(index)
}

/// Re-embed every cached text with `embedder` and renumber positions densely.
/// The store is rewritten first; an interrupted rebuild repeats on the next
/// open.
fn reindex(
    dir: &Path,
    embedder: &dyn Embedder,
    store: &MetadataStore,
    previous: &DiskState,
) -> CacheResult<VectorIndex> {
    let records = store.all()?;
    warn!(
        from = %previous.embedder_id,
        to = embedder.id(),
        records = records.len(),
        "embedder changed; re-embedding cached entries"
    );

    let mut rows = Vec::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        match embedder.embed(&record.text) {
            Ok(vector) => {
                kept.push(CacheRecord {
                    embedding_position: rows.len(),
                    ..record
                });
                rows.push(vector);
            }
            Err(err) => warn!(
                text = %record.text,
                error = %err,
                "dropping cache entry that cannot be re-embedded"
            ),
        }
    }

    store.replace_all(&kept)?;
    let index = VectorIndex::rebuild(dir, embedder.id(), embedder.dimension(), &rows)?;
    info!(entries = index.len(), "vector index rebuilt");
    Ok(index)
}
