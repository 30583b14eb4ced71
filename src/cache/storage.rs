//! SQLite metadata store mapping vector positions to cached audio.
//!
//! Every operation opens its own short-lived connection so the daemon, an
//! in-process fallback and ad-hoc CLI runs can share the file safely.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use thiserror::Error;

pub const METADATA_FILE: &str = "metadata.db";

/// Bounded wait for a competing writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache entry already exists for ({text:?}, {provider}, {voice})")]
    Duplicate {
        text: String,
        provider: String,
        voice: String,
    },

    /// Another writer already recorded an entry at this position.
    #[error("embedding position {position} is already taken")]
    PositionTaken { position: usize },

    #[error("metadata database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub text: String,
    pub provider: String,
    pub voice: String,
}

impl CacheKey {
    pub fn new(text: impl Into<String>, provider: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            voice: voice.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub text: String,
    pub provider: String,
    pub voice: String,
    pub audio_path: PathBuf,
    pub embedding_position: usize,
    pub created_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn matches(&self, provider: &str, voice: &str) -> bool {
        self.provider == provider && self.voice == voice
    }
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// Create the database file and schema if needed.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self { path: path.into() };
        if let Some(parent) = store.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = store.connect()?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS cache_entries (
                embedding_position INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                provider TEXT NOT NULL,
                voice TEXT NOT NULL,
                audio_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(text, provider, voice)
            );
            ",
        )?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        Ok(conn)
    }

    /// Insert a new record. A repeated `(text, provider, voice)` fails with
    /// [`StoreError::Duplicate`], an occupied position with
    /// [`StoreError::PositionTaken`]; either way the existing row is untouched.
    pub fn insert(&self, record: &CacheRecord) -> StoreResult<()> {
        let conn = self.connect()?;
        insert_row(&conn, record)
            .map(|_| ())
            .map_err(|err| classify_insert_error(err, record))
    }

    /// Every record, ordered by position.
    pub fn all(&self) -> StoreResult<Vec<CacheRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT embedding_position, text, provider, voice, audio_path, created_at
             FROM cache_entries ORDER BY embedding_position",
        )?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Atomically swap the whole table for `records`.
    pub fn replace_all(&self, records: &[CacheRecord]) -> StoreResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cache_entries", [])?;
        for record in records {
            insert_row(&tx, record).map_err(|err| classify_insert_error(err, record))?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Record whose audio lives at `path`, if any.
    pub fn find_by_audio_path(&self, path: &Path) -> StoreResult<Option<CacheRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT embedding_position, text, provider, voice, audio_path, created_at
                 FROM cache_entries WHERE audio_path = ?1",
                params![path.to_string_lossy()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_by_position(&self, position: usize) -> StoreResult<Option<CacheRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT embedding_position, text, provider, voice, audio_path, created_at
                 FROM cache_entries WHERE embedding_position = ?1",
                params![position as i64],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn find(&self, key: &CacheKey) -> StoreResult<Option<CacheRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT embedding_position, text, provider, voice, audio_path, created_at
                 FROM cache_entries WHERE text = ?1 AND provider = ?2 AND voice = ?3",
                params![key.text, key.provider, key.voice],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// Delete records at or beyond `position`. Returns how many were removed.
    pub fn prune_from(&self, position: usize) -> StoreResult<usize> {
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE embedding_position >= ?1",
            params![position as i64],
        )?;
        Ok(removed)
    }
}

fn insert_row(conn: &Connection, record: &CacheRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO cache_entries
            (embedding_position, text, provider, voice, audio_path, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.embedding_position as i64,
            record.text,
            record.provider,
            record.voice,
            record.audio_path.to_string_lossy(),
            record.created_at.to_rfc3339(),
        ],
    )
}

fn classify_insert_error(err: rusqlite::Error, record: &CacheRecord) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            let on_position = failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || message
                    .as_deref()
                    .is_some_and(|m| m.contains("cache_entries.embedding_position"));
            if on_position {
                StoreError::PositionTaken {
                    position: record.embedding_position,
                }
            } else if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
                StoreError::Duplicate {
                    text: record.text.clone(),
                    provider: record.provider.clone(),
                    voice: record.voice.clone(),
                }
            } else {
                StoreError::Sqlite(err)
            }
        }
        _ => StoreError::Sqlite(err),
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRecord> {
    let position: i64 = row.get(0)?;
    let audio_path: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(CacheRecord {
        embedding_position: position.max(0) as usize,
        text: row.get(1)?,
        provider: row.get(2)?,
        voice: row.get(3)?,
        audio_path: PathBuf::from(audio_path),
        created_at,
    })
}
