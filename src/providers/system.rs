//! OS speech command backend: `say` + `afconvert` on macOS, espeak elsewhere.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use super::{TtsProvider, Voice};
use crate::error::{SpeakError, SpeakResult};

#[derive(Debug, Default)]
pub struct SystemProvider;

impl SystemProvider {
    pub fn new() -> Self {
        Self
    }
}

fn espeak_binary() -> SpeakResult<PathBuf> {
    ["espeak-ng", "espeak"]
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| {
            SpeakError::NotFound(
                "espeak not found. Install it with: sudo apt-get install espeak-ng".into(),
            )
        })
}

fn run(cmd: &mut Command) -> SpeakResult<std::process::Output> {
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(SpeakError::api(
            format!(
                "System TTS failed with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            None,
        ));
    }
    Ok(output)
}

fn voice_arg(voice: Option<&str>) -> Option<&str> {
    voice.filter(|v| !v.is_empty() && *v != "default")
}

#[cfg(target_os = "macos")]
fn synthesize_to(text: &str, voice: Option<&str>, wav: &Path) -> SpeakResult<()> {
    let aiff = tempfile::Builder::new()
        .prefix("speakcache-")
        .suffix(".aiff")
        .tempfile()?;
    let mut say = Command::new("say");
    say.arg("-o").arg(aiff.path());
    if let Some(v) = voice_arg(voice) {
        say.arg("-v").arg(v);
    }
    run(say.arg(text))?;
    run(Command::new("afconvert")
        .args(["-f", "WAVE", "-d", "LEI16"])
        .arg(aiff.path())
        .arg(wav))?;
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn synthesize_to(text: &str, voice: Option<&str>, wav: &Path) -> SpeakResult<()> {
    let mut espeak = Command::new(espeak_binary()?);
    espeak.arg("-w").arg(wav);
    if let Some(v) = voice_arg(voice) {
        espeak.arg("-v").arg(v);
    }
    run(espeak.arg(text))?;
    Ok(())
}

/// Voice ids from `say -v ?` (first column) or `espeak --voices`
/// (second column after the header).
pub fn parse_voice_listing(output: &str, macos: bool) -> Vec<Voice> {
    let lines = output.lines().filter(|l| !l.trim().is_empty());
    let ids: Vec<String> = if macos {
        lines
            .filter(|l| !l.starts_with('#'))
            .filter_map(|l| l.split_whitespace().next().map(str::to_string))
            .collect()
    } else {
        lines
            .skip(1)
            .filter_map(|l| l.split_whitespace().nth(1).map(str::to_string))
            .collect()
    };
    ids.into_iter()
        .map(|id| Voice {
            name: id.clone(),
            id,
            provider: "system".into(),
        })
        .collect()
}

impl TtsProvider for SystemProvider {
    fn name(&self) -> &str {
        "system"
    }

    fn synthesize(&self, text: &str, voice: Option<&str>) -> SpeakResult<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(SpeakError::validation("Text cannot be empty"));
        }
        let wav = tempfile::Builder::new()
            .prefix("speakcache-")
            .suffix(".wav")
            .tempfile()?;
        synthesize_to(text, voice, wav.path())?;
        let bytes = std::fs::read(wav.path())?;
        debug!(bytes = bytes.len(), "system speech synthesized");
        Ok(bytes)
    }

    fn list_voices(&self) -> SpeakResult<Vec<Voice>> {
        let macos = cfg!(target_os = "macos");
        let output = if macos {
            Command::new("say").args(["-v", "?"]).output()
        } else {
            match espeak_binary() {
                Ok(bin) => Command::new(bin).arg("--voices").output(),
                Err(err) => {
                    warn!(error = %err, "no system voices available");
                    return Ok(Vec::new());
                }
            }
        };
        match output {
            Ok(out) if out.status.success() => Ok(parse_voice_listing(
                &String::from_utf8_lossy(&out.stdout),
                macos,
            )),
            Ok(out) => {
                warn!(status = %out.status, "voice listing command failed");
                Ok(Vec::new())
            }
            Err(err) => {
                warn!(error = %err, "voice listing command failed");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_espeak_listing() {
        let listing = "Pty Language       Age/Gender VoiceName          File                 Other Languages\n 5  af              --/M      Afrikaans          gmw/af\n 5  en-us           --/M      English_(America)  gmw/en-US\n";
        let voices = parse_voice_listing(listing, false);
        let ids: Vec<&str> = voices.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["af", "en-us"]);
        assert!(voices.iter().all(|v| v.provider == "system"));
    }

    #[test]
    fn parses_say_listing() {
        let listing = "Alex                en_US    # Most people recognize me by my voice.\nSamantha            en_US    # Hello, my name is Samantha.\n";
        let voices = parse_voice_listing(listing, true);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[1].name, "Samantha");
    }

    #[test]
    fn empty_text_is_rejected_before_running_anything() {
        let err = SystemProvider::new().synthesize("  ", None).unwrap_err();
        assert!(matches!(err, SpeakError::Validation(_)));
    }
}
