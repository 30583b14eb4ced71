//! Layered configuration: defaults, then `config.toml`, then environment.
//! CLI flags are applied last by the command handlers.
//!
//! ```toml
//! [tts]
//! provider = "elevenlabs"
//! voice = "Rachel"
//! kokoro_url = "http://127.0.0.1:8880"
//!
//! [cache]
//! enabled = true
//! threshold = 0.95
//! embedder = "auto"
//!
//! [http]
//! enabled = false
//! host = "127.0.0.1"
//! port = 7733
//!
//! [daemon]
//! request_timeout_secs = 30
//! spawn_timeout_secs = 30
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.toml";
pub const APP_NAME: &str = "speakcache";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", APP_NAME, APP_NAME)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevenlabs_api_key: Option<String>,
    /// Base URL of a local Kokoro server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kokoro_url: Option<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "elevenlabs".into(),
            voice: None,
            elevenlabs_api_key: None,
            kokoro_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub threshold: f32,
    /// `auto`, `minilm` or `hash`.
    pub embedder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: crate::cache::DEFAULT_THRESHOLD,
            embedder: crate::cache::embedder::AUTO_EMBEDDER.into(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 7733,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub spawn_timeout_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            request_timeout_secs: 30,
            spawn_timeout_secs: 30,
        }
    }
}

impl DaemonSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tts: TtsConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub daemon: DaemonSettings,
}

impl Config {
    /// Config file (or `SPEAKCACHE_CONFIG`) plus environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_from(&config_path())?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from environment variables (and `.env`).
    pub fn apply_env(&mut self) {
        if let Ok(v) = dotenvy::var("SPEAKCACHE_PROVIDER") {
            self.tts.provider = v;
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_VOICE") {
            self.tts.voice = Some(v);
        }
        if let Ok(v) = dotenvy::var("ELEVENLABS_API_KEY")
            && !v.trim().is_empty()
        {
            self.tts.elevenlabs_api_key = Some(v);
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_KOKORO_URL")
            && !v.trim().is_empty()
        {
            self.tts.kokoro_url = Some(v);
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_CACHE_THRESHOLD")
            && let Ok(t) = v.parse()
        {
            self.cache.threshold = t;
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_EMBEDDER") {
            self.cache.embedder = v;
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_HTTP_HOST") {
            self.http.host = v;
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_HTTP_PORT")
            && let Ok(port) = v.parse()
        {
            self.http.port = port;
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_API_KEY")
            && !v.trim().is_empty()
        {
            self.http.api_key = Some(v);
        }
        if let Ok(v) = dotenvy::var("SPEAKCACHE_RUNTIME_DIR") {
            self.daemon.runtime_dir = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cache.threshold) {
            bail!(
                "cache threshold must be between 0.0 and 1.0, got {}",
                self.cache.threshold
            );
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| default_cache_dir().join("audio_cache"))
    }

    /// Model files live under `<data_dir>/models/`.
    pub fn data_dir(&self) -> PathBuf {
        project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
    }

    /// First usable of: configured dir, `$XDG_RUNTIME_DIR/speakcache`, the
    /// cache dir, `/tmp/speakcache-<uid>`. The chosen dir is created 0700.
    pub fn runtime_dir(&self) -> Result<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = &self.daemon.runtime_dir {
            candidates.push(dir.clone());
        }
        if let Ok(xdg) = dotenvy::var("XDG_RUNTIME_DIR")
            && !xdg.is_empty()
        {
            candidates.push(PathBuf::from(xdg).join(APP_NAME));
        }
        candidates.push(default_cache_dir());
        candidates.push(std::env::temp_dir().join(format!("{APP_NAME}-{}", current_uid())));

        let mut last_err = None;
        for dir in candidates {
            match ensure_private_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) => Err(err).context("no usable runtime directory"),
            None => bail!("no usable runtime directory"),
        }
    }

    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config dir {}", parent.display()))?;
        }
        let body = toml::to_string_pretty(&Self::default()).context("serializing config")?;
        fs::write(path, body).with_context(|| format!("writing config {}", path.display()))
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = dotenvy::var("SPEAKCACHE_CONFIG") {
        return PathBuf::from(path);
    }
    project_dirs()
        .map(|d| d.config_dir().join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

fn default_cache_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

/// Create `dir` (and parents) and restrict it to the owner.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("chmod 0700 {}", dir.display()))?;
    }
    Ok(())
}
