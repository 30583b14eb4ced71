//! Audio output: play through a system player or save to disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::audio_extension;
use crate::error::{SpeakError, SpeakResult};

pub trait AudioOutput: Send + Sync {
    /// Resolve devices or players ahead of the first request.
    fn warm(&self) -> SpeakResult<()>;

    /// Play `audio`, returning when playback has finished.
    fn play(&self, audio: &[u8]) -> SpeakResult<()>;

    fn save(&self, audio: &[u8], path: &Path) -> SpeakResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, audio)?;
        Ok(())
    }
}

struct PlayerSpec {
    binary: &'static str,
    args: &'static [&'static str],
    mp3: bool,
}

const PLAYERS: &[PlayerSpec] = &[
    PlayerSpec {
        binary: "afplay",
        args: &[],
        mp3: true,
    },
    PlayerSpec {
        binary: "ffplay",
        args: &["-nodisp", "-autoexit", "-loglevel", "quiet"],
        mp3: true,
    },
    PlayerSpec {
        binary: "mpv",
        args: &["--no-video", "--really-quiet"],
        mp3: true,
    },
    PlayerSpec {
        binary: "paplay",
        args: &[],
        mp3: false,
    },
    PlayerSpec {
        binary: "aplay",
        args: &["-q"],
        mp3: false,
    },
];

/// Plays audio by shelling out to the first installed player that can
/// handle the format.
#[derive(Default)]
pub struct CommandPlayer {
    resolved: Mutex<Option<(PathBuf, &'static PlayerSpec)>>,
}

impl CommandPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(mp3: bool) -> Option<(PathBuf, &'static PlayerSpec)> {
        PLAYERS
            .iter()
            .filter(|p| p.mp3 || !mp3)
            .find_map(|p| which::which(p.binary).ok().map(|path| (path, p)))
    }

    fn player_for(&self, mp3: bool) -> SpeakResult<(PathBuf, &'static PlayerSpec)> {
        let mut resolved = self.resolved.lock();
        if let Some((path, spec)) = resolved.as_ref()
            && (spec.mp3 || !mp3)
        {
            return Ok((path.clone(), *spec));
        }
        let found = Self::find(mp3).ok_or_else(|| {
            SpeakError::Playback(format!(
                "no audio player found (tried: {})",
                PLAYERS
                    .iter()
                    .filter(|p| p.mp3 || !mp3)
                    .map(|p| p.binary)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        *resolved = Some(found.clone());
        Ok(found)
    }
}

impl AudioOutput for CommandPlayer {
    fn warm(&self) -> SpeakResult<()> {
        let (path, _) = self.player_for(true)?;
        info!(player = %path.display(), "audio player ready");
        Ok(())
    }

    fn play(&self, audio: &[u8]) -> SpeakResult<()> {
        let ext = audio_extension(audio);
        let (player, spec) = self.player_for(ext == "mp3")?;

        let mut file = tempfile::Builder::new()
            .prefix("speakcache-play-")
            .suffix(&format!(".{ext}"))
            .tempfile()?;
        file.write_all(audio)?;
        file.flush()?;

        debug!(player = %player.display(), bytes = audio.len(), "playing audio");
        let status = Command::new(&player)
            .args(spec.args)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| SpeakError::Playback(format!("{}: {e}", player.display())))?;
        if !status.success() {
            return Err(SpeakError::Playback(format!(
                "{} exited with {status}",
                spec.binary
            )));
        }
        Ok(())
    }
}
