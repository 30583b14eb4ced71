//! Download and verification of the MiniLM model files.
//!
//! Files come from the Hugging Face hub. Each one is hashed with SHA-256
//! while it streams to disk; when the hub publishes a digest for it
//! (`X-Linked-Etag`, sent for LFS files such as the ONNX weights) the two
//! must agree. Everything lands in a staging directory next to the target
//! and is moved into place only once complete, together with a
//! `manifest.json` recording size and digest per file so [`verify`] can
//! re-check an installation later.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::embedder::REQUIRED_ONNX_FILES;

pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";
pub const MINILM_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const MINILM_REVISION: &str = "main";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Local file name and its path inside the hub repository.
pub const MINILM_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
    ("special_tokens_map.json", "special_tokens_map.json"),
    ("tokenizer_config.json", "tokenizer_config.json"),
];

const LINKED_ETAG: &str = "x-linked-etag";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const HEAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url}: expected {expected} bytes, received {actual}")]
    Truncated {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    Checksum {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("model files in {} are not installed: {reason}", .dir.display())]
    NotInstalled { dir: PathBuf, reason: String },

    #[error("model manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("model I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub repo: String,
    pub revision: String,
    pub downloaded_at: DateTime<Utc>,
    pub files: BTreeMap<String, ManifestEntry>,
}

/// What `models status` reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub dir: PathBuf,
    pub installed: bool,
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ModelManifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ModelDownloader {
    hub_url: String,
    repo: String,
    revision: String,
    client: Client,
    // Redirects stay unfollowed so the hub's own headers are visible.
    head_client: Client,
}

impl ModelDownloader {
    pub fn new(hub_url: impl Into<String>) -> ModelResult<Self> {
        let user_agent = concat!("speakcache/", env!("CARGO_PKG_VERSION"));
        let build_err = |source| ModelError::Http {
            url: "client setup".into(),
            source,
        };
        let client = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(build_err)?;
        let head_client = Client::builder()
            .timeout(HEAD_TIMEOUT)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(build_err)?;
        Ok(Self {
            hub_url: hub_url.into().trim_end_matches('/').to_string(),
            repo: MINILM_REPO.to_string(),
            revision: MINILM_REVISION.to_string(),
            client,
            head_client,
        })
    }

    pub fn file_url(&self, remote: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.hub_url, self.repo, self.revision, remote
        )
    }

    /// Fetch every model file into `model_dir`, replacing what is there.
    ///
    /// An installation that still verifies is left alone unless `force`.
    pub fn download(&self, model_dir: &Path, force: bool) -> ModelResult<ModelManifest> {
        if !force {
            match verify(model_dir) {
                Ok(manifest) => {
                    info!(dir = %model_dir.display(), "model already installed");
                    return Ok(manifest);
                }
                Err(err) => debug!(error = %err, "installing model"),
            }
        }

        let parent = model_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(parent)?;

        let mut files = BTreeMap::new();
        for (local, remote) in MINILM_FILES {
            let url = self.file_url(remote);
            let published = self.published_digest(&url);
            let entry = self.fetch(&url, &staging.path().join(local))?;
            if let Some(expected) = &published
                && *expected != entry.sha256
            {
                return Err(ModelError::Checksum {
                    file: local.to_string(),
                    expected: expected.clone(),
                    actual: entry.sha256,
                });
            }
            info!(
                file = local,
                size = entry.size,
                checked_against_hub = published.is_some(),
                "model file downloaded"
            );
            files.insert(local.to_string(), entry);
        }

        let manifest = ModelManifest {
            repo: self.repo.clone(),
            revision: self.revision.clone(),
            downloaded_at: Utc::now(),
            files,
        };
        fs::write(
            staging.path().join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        if model_dir.exists() {
            fs::remove_dir_all(model_dir)?;
        }
        fs::rename(staging.path(), model_dir)?;
        info!(dir = %model_dir.display(), "model installed");
        Ok(manifest)
    }

    /// SHA-256 the hub publishes for `url`, if any.
    fn published_digest(&self, url: &str) -> Option<String> {
        let resp = match self.head_client.head(url).send() {
            Ok(resp) => resp,
            Err(err) => {
                debug!(url, error = %err, "HEAD request failed");
                return None;
            }
        };
        let tag = resp.headers().get(LINKED_ETAG)?.to_str().ok()?;
        let tag = tag.trim_start_matches("W/").trim_matches('"');
        (tag.len() == 64 && tag.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| tag.to_ascii_lowercase())
    }

    fn fetch(&self, url: &str, dest: &Path) -> ModelResult<ManifestEntry> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .map_err(|source| ModelError::Http {
                url: url.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(ModelError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let expected = resp.content_length();

        let mut writer = BufWriter::new(File::create(dest)?);
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = resp.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n])?;
            size += n as u64;
        }
        writer
            .into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()?;

        if let Some(expected) = expected
            && expected != size
        {
            return Err(ModelError::Truncated {
                url: url.to_string(),
                expected,
                actual: size,
            });
        }
        Ok(ManifestEntry {
            sha256: hex::encode(hasher.finalize()),
            size,
        })
    }
}

pub fn read_manifest(model_dir: &Path) -> ModelResult<ModelManifest> {
    let raw = fs::read(model_dir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Re-hash every model file against the manifest.
pub fn verify(model_dir: &Path) -> ModelResult<ModelManifest> {
    let not_installed = |reason: String| ModelError::NotInstalled {
        dir: model_dir.to_path_buf(),
        reason,
    };
    let manifest = read_manifest(model_dir).map_err(|err| not_installed(err.to_string()))?;

    for name in REQUIRED_ONNX_FILES {
        let entry = manifest
            .files
            .get(*name)
            .ok_or_else(|| not_installed(format!("{name} missing from manifest")))?;
        let path = model_dir.join(name);
        let size = fs::metadata(&path)
            .map_err(|err| not_installed(format!("{name}: {err}")))?
            .len();
        if size != entry.size {
            return Err(not_installed(format!(
                "{name}: size {size}, expected {}",
                entry.size
            )));
        }
        let actual = file_sha256(&path)?;
        if actual != entry.sha256 {
            return Err(ModelError::Checksum {
                file: name.to_string(),
                expected: entry.sha256.clone(),
                actual,
            });
        }
    }
    Ok(manifest)
}

pub fn status(model_dir: &Path) -> ModelStatus {
    let missing: Vec<String> = REQUIRED_ONNX_FILES
        .iter()
        .filter(|f| !model_dir.join(f).is_file())
        .map(|f| f.to_string())
        .collect();
    let (manifest, error) = if missing.is_empty() {
        match verify(model_dir) {
            Ok(manifest) => (Some(manifest), None),
            Err(err) => {
                warn!(dir = %model_dir.display(), error = %err, "model verification failed");
                (None, Some(err.to_string()))
            }
        }
    } else {
        (None, None)
    };
    ModelStatus {
        dir: model_dir.to_path_buf(),
        installed: manifest.is_some(),
        missing,
        manifest,
        error,
    }
}

fn file_sha256(path: &Path) -> ModelResult<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn download_list_covers_required_files() {
        let names: Vec<&str> = MINILM_FILES.iter().map(|(local, _)| *local).collect();
        assert_eq!(names, REQUIRED_ONNX_FILES);
    }

    #[test]
    fn file_urls_follow_hub_layout() {
        let downloader = ModelDownloader::new("https://hub.example/").unwrap();
        assert_eq!(
            downloader.file_url("onnx/model.onnx"),
            "https://hub.example/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx"
        );
    }

    #[test]
    fn empty_dir_is_not_installed() {
        let tmp = TempDir::new().unwrap();
        let status = status(tmp.path());
        assert!(!status.installed);
        assert_eq!(status.missing.len(), REQUIRED_ONNX_FILES.len());
        assert!(matches!(
            verify(tmp.path()),
            Err(ModelError::NotInstalled { .. })
        ));
    }

    #[test]
    fn files_without_manifest_fail_verification() {
        let tmp = TempDir::new().unwrap();
        for name in REQUIRED_ONNX_FILES {
            fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let status = status(tmp.path());
        assert!(status.missing.is_empty());
        assert!(!status.installed);
        assert!(status.error.unwrap().contains("not installed"));
    }

    #[test]
    fn sha256_of_known_input() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
