//! Append-only vector index persisted as two files.
//!
//! `embeddings.vec` is the raw vector array and the source of truth. It is
//! laid out as:
//!
//! ```text
//! magic "SCVA" | version u16 | id_len u16 | embedder_id | dimension u32 | count u32
//! count * dimension * f32 (little endian)
//! crc32 u32 (over everything above)
//! ```
//!
//! `similarity.idx` is the flat L2 search structure (same payload, magic
//! "SCIX", metric byte instead of the embedder id). It is rebuilt from the
//! vector array whenever it is missing, corrupt, or out of step with it.
//!
//! Positions are assigned in insertion order starting at 0 and never reused.
//! Several processes may share one directory; each remembers the CRC of the
//! vector array it last read or wrote so it can tell when another writer has
//! replaced the file.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, warn};

pub const VECTORS_MAGIC: [u8; 4] = *b"SCVA";
pub const INDEX_MAGIC: [u8; 4] = *b"SCIX";
pub const FORMAT_VERSION: u16 = 1;
pub const VECTORS_FILE: &str = "embeddings.vec";
pub const INDEX_FILE: &str = "similarity.idx";

const METRIC_L2: u8 = 0;

/// Squared Euclidean distance between two vectors of equal length.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Map a squared L2 distance between unit vectors onto `[0, 1]`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Similarity exactly as [`VectorIndex::search`] computes it.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    similarity_from_distance(squared_l2(a, b))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHeader {
    magic: [u8; 4],
    /// Embedder id for the vector array, empty for the search structure.
    tag: String,
    metric: u8,
    dimension: u32,
    count: u32,
}

impl FileHeader {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.magic);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        if self.magic == VECTORS_MAGIC {
            let tag = self.tag.as_bytes();
            let len = u16::try_from(tag.len()).map_err(|_| anyhow!("embedder id too long"))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(tag);
        } else {
            buf.push(self.metric);
        }
        buf.extend_from_slice(&self.dimension.to_le_bytes());
        buf.extend_from_slice(&self.count.to_le_bytes());
        Ok(())
    }
}

/// Cursor over a fully-read file body; every read is bounds-checked.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| anyhow!("unexpected end of file at offset {}", self.pos))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Write atomically and return the trailing CRC.
fn write_file(path: &Path, header: &FileHeader, data: &[f32]) -> Result<u32> {
    let mut buf = Vec::with_capacity(32 + data.len() * 4);
    header.encode(&mut buf)?;
    for value in data {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp_path = path.with_extension("tmp");
    {
        let file =
            File::create(&temp_path).with_context(|| format!("create temp file {temp_path:?}"))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&buf)?;
        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("flush {temp_path:?}: {}", e.error()))?;
        file.sync_all().context("fsync temp file")?;
    }
    std::fs::rename(&temp_path, path).with_context(|| format!("rename {temp_path:?}"))?;
    sync_dir(parent).context("fsync index directory")?;
    Ok(crc)
}

fn read_file(path: &Path, magic: [u8; 4]) -> Result<(FileHeader, Vec<f32>, u32)> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path).with_context(|| format!("open {path:?}"))?)
        .read_to_end(&mut bytes)?;
    if bytes.len() < 4 {
        bail!("file too short");
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let crc_expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let crc_actual = crc32fast::hash(body);
    if crc_actual != crc_expected {
        bail!("CRC mismatch (expected {crc_expected:#010x}, got {crc_actual:#010x})");
    }

    let mut r = Reader {
        bytes: body,
        pos: 0,
    };
    let found = r.take(4)?;
    if found != magic {
        bail!("invalid magic: {found:?}");
    }
    let version = r.u16()?;
    if version != FORMAT_VERSION {
        bail!("unsupported version: {version}");
    }
    let (tag, metric) = if magic == VECTORS_MAGIC {
        let len = r.u16()? as usize;
        let tag = String::from_utf8(r.take(len)?.to_vec()).context("embedder id is not UTF-8")?;
        (tag, METRIC_L2)
    } else {
        (String::new(), r.u8()?)
    };
    let dimension = r.u32()?;
    let count = r.u32()?;
    if dimension == 0 {
        bail!("dimension must be non-zero");
    }

    let floats = (dimension as usize)
        .checked_mul(count as usize)
        .ok_or_else(|| anyhow!("vector payload size overflow"))?;
    let raw = r.take(floats * 4)?;
    if r.pos != body.len() {
        bail!("trailing bytes after vector payload");
    }
    let data = raw
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok((
        FileHeader {
            magic,
            tag,
            metric,
            dimension,
            count,
        },
        data,
        crc_actual,
    ))
}

/// Header fields and checksum of a persisted vector array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskState {
    pub embedder_id: String,
    pub dimension: usize,
    pub count: usize,
    pub crc: u32,
}

impl DiskState {
    /// Whether the array was written by a different embedder.
    pub fn is_foreign(&self, embedder_id: &str, dimension: usize) -> bool {
        self.embedder_id != embedder_id || self.dimension != dimension
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[derive(Debug)]
pub struct VectorIndex {
    dir: PathBuf,
    embedder_id: String,
    dimension: usize,
    /// Raw vector array, row-major.
    vectors: Vec<f32>,
    /// Flat search structure; always the same rows as `vectors`.
    flat: Vec<f32>,
    /// CRC of `embeddings.vec` as this instance last saw it on disk.
    observed_crc: Option<u32>,
}

impl VectorIndex {
    /// Create an empty, unsaved index.
    pub fn new(dir: impl Into<PathBuf>, embedder_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            dir: dir.into(),
            embedder_id: embedder_id.into(),
            dimension,
            vectors: Vec::new(),
            flat: Vec::new(),
            observed_crc: None,
        }
    }

    /// Create an index holding `rows` and persist it, replacing whatever
    /// the directory held.
    pub fn rebuild(
        dir: impl Into<PathBuf>,
        embedder_id: impl Into<String>,
        dimension: usize,
        rows: &[Vec<f32>],
    ) -> Result<Self> {
        let mut index = Self::new(dir, embedder_id, dimension);
        for row in rows {
            if row.len() != dimension {
                bail!(
                    "vector dimension mismatch: expected {dimension}, got {}",
                    row.len()
                );
            }
            index.vectors.extend_from_slice(row);
        }
        index.flat = index.vectors.clone();
        index.save()?;
        Ok(index)
    }

    /// Read the header and checksum of `dir/embeddings.vec` without loading
    /// the payload. `None` when the file does not exist.
    pub fn read_state(dir: &Path) -> Result<Option<DiskState>> {
        let path = dir.join(VECTORS_FILE);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("open {path:?}")),
        };

        let mut fixed = [0u8; 8];
        file.read_exact(&mut fixed).context("read vector array header")?;
        let mut r = Reader {
            bytes: &fixed,
            pos: 0,
        };
        if r.take(4)? != VECTORS_MAGIC {
            bail!("invalid magic in {path:?}");
        }
        let version = r.u16()?;
        if version != FORMAT_VERSION {
            bail!("unsupported version: {version}");
        }
        let tag_len = r.u16()? as usize;

        let mut rest = vec![0u8; tag_len + 8];
        file.read_exact(&mut rest).context("read vector array header")?;
        let mut r = Reader {
            bytes: &rest,
            pos: 0,
        };
        let embedder_id =
            String::from_utf8(r.take(tag_len)?.to_vec()).context("embedder id is not UTF-8")?;
        let dimension = r.u32()? as usize;
        let count = r.u32()? as usize;

        file.seek(SeekFrom::End(-4)).context("seek to checksum")?;
        let mut crc = [0u8; 4];
        file.read_exact(&mut crc).context("read checksum")?;

        Ok(Some(DiskState {
            embedder_id,
            dimension,
            count,
            crc: u32::from_le_bytes(crc),
        }))
    }

    /// Whether `embeddings.vec` changed since this instance last read or
    /// wrote it. An unreadable header counts as changed.
    pub fn is_stale(&self) -> bool {
        match Self::read_state(&self.dir) {
            Ok(Some(state)) => Some(state.crc) != self.observed_crc,
            Ok(None) => self.observed_crc.is_some(),
            Err(err) => {
                debug!(error = %err, "vector array header unreadable");
                true
            }
        }
    }

    /// Load from `dir`, recovering from missing or damaged files.
    ///
    /// Never fails: an unreadable vector array (or one written by another
    /// embedder) yields an empty index, and an unusable search structure is
    /// rebuilt from the vector array.
    pub fn open(dir: impl Into<PathBuf>, embedder_id: &str, dimension: usize) -> Self {
        let mut index = Self::new(dir, embedder_id, dimension);
        let vectors_path = index.vectors_path();
        let index_path = index.index_path();

        if vectors_path.exists() {
            match read_file(&vectors_path, VECTORS_MAGIC) {
                Ok((header, data, _))
                    if header.tag == embedder_id && header.dimension as usize == dimension =>
                {
                    index.vectors = data;
                }
                Ok((header, _, _)) => warn!(
                    path = %vectors_path.display(),
                    found_embedder = %header.tag,
                    found_dimension = header.dimension,
                    "vector array belongs to a different embedder; starting empty"
                ),
                Err(err) => warn!(
                    path = %vectors_path.display(),
                    error = %err,
                    "vector array unreadable; starting empty"
                ),
            }
        }

        let flat = if index_path.exists() {
            match read_file(&index_path, INDEX_MAGIC) {
                Ok((header, data, _))
                    if header.metric == METRIC_L2
                        && header.dimension as usize == dimension
                        && data.len() == index.vectors.len() =>
                {
                    Some(data)
                }
                Ok(_) => {
                    warn!(path = %index_path.display(), "search structure out of step; rebuilding");
                    None
                }
                Err(err) => {
                    warn!(path = %index_path.display(), error = %err, "search structure unreadable; rebuilding");
                    None
                }
            }
        } else {
            None
        };

        index.observed_crc = Self::read_state(&index.dir)
            .ok()
            .flatten()
            .map(|state| state.crc);

        match flat {
            Some(data) => index.flat = data,
            None => {
                index.flat = index.vectors.clone();
                if !index.vectors.is_empty()
                    && let Err(err) = index.save()
                {
                    warn!(error = %err, "failed to persist rebuilt search structure");
                }
            }
        }

        debug!(
            count = index.len(),
            dimension,
            embedder = embedder_id,
            "vector index loaded"
        );
        index
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Append a vector and persist both files. Returns its position.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            bail!(
                "vector dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            );
        }
        let position = self.len();
        self.vectors.extend_from_slice(vector);
        self.flat.extend_from_slice(vector);
        if let Err(err) = self.save() {
            self.vectors.truncate(position * self.dimension);
            self.flat.truncate(position * self.dimension);
            return Err(err);
        }
        Ok(position)
    }

    /// Up to `k` entries with similarity `>= threshold`, best first.
    pub fn search(&self, query: &[f32], threshold: f32, k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            bail!(
                "query dimension mismatch: expected {}, got {}",
                self.dimension,
                query.len()
            );
        }

        let mut heap = BinaryHeap::with_capacity(k + 1);
        for (position, row) in self.flat.chunks_exact(self.dimension).enumerate() {
            heap.push(std::cmp::Reverse(ScoredEntry {
                similarity: similarity(query, row),
                position,
            }));
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut ranked: Vec<ScoredEntry> = heap.into_iter().map(|entry| entry.0).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        Ok(ranked
            .into_iter()
            .take_while(|entry| entry.similarity >= threshold)
            .map(|entry| SearchHit {
                position: entry.position,
                similarity: entry.similarity,
            })
            .collect())
    }

    pub fn save(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create index directory {:?}", self.dir))?;
        let dimension =
            u32::try_from(self.dimension).map_err(|_| anyhow!("dimension out of range"))?;
        let count = u32::try_from(self.len()).map_err(|_| anyhow!("index too large"))?;
        let crc = write_file(
            &self.vectors_path(),
            &FileHeader {
                magic: VECTORS_MAGIC,
                tag: self.embedder_id.clone(),
                metric: METRIC_L2,
                dimension,
                count,
            },
            &self.vectors,
        )?;
        write_file(
            &self.index_path(),
            &FileHeader {
                magic: INDEX_MAGIC,
                tag: String::new(),
                metric: METRIC_L2,
                dimension,
                count,
            },
            &self.flat,
        )?;
        self.observed_crc = Some(crc);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ScoredEntry {
    similarity: f32,
    position: usize,
}

impl PartialEq for ScoredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredEntry {}

impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredEntry {
    // Ties prefer the older entry.
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.position.cmp(&self.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(values: &[f32]) -> Vec<f32> {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        values.iter().map(|v| v / norm).collect()
    }

    #[test]
    fn positions_start_at_zero_and_increase() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "test", 3);
        assert_eq!(index.add(&unit(&[1.0, 0.0, 0.0])).unwrap(), 0);
        assert_eq!(index.add(&unit(&[0.0, 1.0, 0.0])).unwrap(), 1);
        assert_eq!(index.add(&unit(&[0.0, 0.0, 1.0])).unwrap(), 2);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::new(tmp.path(), "test", 3);
        let hits = index.search(&[1.0, 0.0, 0.0], 0.0, 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_orders_descending_and_respects_threshold() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "test", 2);
        index.add(&unit(&[0.0, 1.0])).unwrap();
        index.add(&unit(&[1.0, 0.1])).unwrap();
        index.add(&unit(&[1.0, 0.0])).unwrap();

        let hits = index.search(&[1.0, 0.0], 0.5, 10).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![2, 1]);
        assert!(hits[0].similarity >= hits[1].similarity);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_clamp_to_zero() {
        assert_eq!(similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn search_limits_to_k() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "test", 2);
        for _ in 0..5 {
            index.add(&[1.0, 0.0]).unwrap();
        }
        let hits = index.search(&[1.0, 0.0], 0.0, 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].position, 0);
    }

    #[test]
    fn reload_preserves_vectors() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "test", 2);
        index.add(&unit(&[3.0, 4.0])).unwrap();
        index.add(&unit(&[4.0, 3.0])).unwrap();

        let reloaded = VectorIndex::open(tmp.path(), "test", 2);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.vector(1), index.vector(1));
    }

    #[test]
    fn missing_search_structure_is_rebuilt_from_vectors() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "test", 2);
        index.add(&[1.0, 0.0]).unwrap();
        std::fs::remove_file(index.index_path()).unwrap();

        let reloaded = VectorIndex::open(tmp.path(), "test", 2);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.index_path().exists());
        let hits = reloaded.search(&[1.0, 0.0], 0.9, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn corrupt_search_structure_is_rebuilt() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "test", 2);
        index.add(&[1.0, 0.0]).unwrap();
        std::fs::write(index.index_path(), b"garbage").unwrap();

        let reloaded = VectorIndex::open(tmp.path(), "test", 2);
        assert_eq!(reloaded.search(&[1.0, 0.0], 0.9, 10).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_vector_array_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "test", 2);
        index.add(&[1.0, 0.0]).unwrap();
        let mut bytes = std::fs::read(index.vectors_path()).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xFF;
        std::fs::write(index.vectors_path(), bytes).unwrap();

        let reloaded = VectorIndex::open(tmp.path(), "test", 2);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn embedder_mismatch_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "minilm-384", 2);
        index.add(&[1.0, 0.0]).unwrap();

        let reloaded = VectorIndex::open(tmp.path(), "fnv1a-384", 2);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn another_writer_makes_index_stale() {
        let tmp = TempDir::new().unwrap();
        let mut mine = VectorIndex::open(tmp.path(), "test", 2);
        assert!(!mine.is_stale());
        mine.add(&[1.0, 0.0]).unwrap();
        assert!(!mine.is_stale());

        let mut theirs = VectorIndex::open(tmp.path(), "test", 2);
        theirs.add(&[0.0, 1.0]).unwrap();
        assert!(mine.is_stale());
        assert!(!theirs.is_stale());

        let state = VectorIndex::read_state(tmp.path()).unwrap().unwrap();
        assert_eq!(state.count, 2);
        assert_eq!(state.embedder_id, "test");
        assert!(!state.is_foreign("test", 2));
        assert!(state.is_foreign("other", 2));
    }

    #[test]
    fn missing_array_has_no_state() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(VectorIndex::read_state(tmp.path()).unwrap(), None);
    }

    #[test]
    fn rebuild_replaces_foreign_array() {
        let tmp = TempDir::new().unwrap();
        let mut old = VectorIndex::new(tmp.path(), "minilm-384", 2);
        old.add(&[1.0, 0.0]).unwrap();

        let rebuilt =
            VectorIndex::rebuild(tmp.path(), "fnv1a-384", 2, &[vec![0.0, 1.0], vec![1.0, 0.0]])
                .unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert!(!rebuilt.is_stale());

        let reopened = VectorIndex::open(tmp.path(), "fnv1a-384", 2);
        assert_eq!(reopened.vector(0), Some(&[0.0, 1.0][..]));
        assert!(VectorIndex::rebuild(tmp.path(), "x", 2, &[vec![1.0]]).is_err());
    }

    #[test]
    fn dimension_mismatch_is_rejected_on_add() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), "test", 3);
        assert!(index.add(&[1.0, 0.0]).is_err());
        assert!(index.is_empty());
    }
}
