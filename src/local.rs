//! Local engine backend: drives an espeak-ng compatible command-line synthesizer.

use crate::backend::{Output, TtsBackend};
use crate::error::TtsError;
use crate::prosody::ProsodySettings;
use crate::ssml::{self, Dialect};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_ENGINE: &str = "espeak-ng";

/// Engine speed, in words per minute, at a rate of 0%.
const BASE_WPM: i32 = 175;

#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Engine program; must accept `-m`, `-v`, `-w`, `-s`, `-a` and `--stdin`.
    pub program: String,
    /// Fixed voice list. When empty, voices are read from `{program} --voices`.
    pub voices: Vec<String>,
    /// Voice to start with.
    pub voice: Option<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_ENGINE.to_string(),
            voices: Vec::new(),
            voice: None,
        }
    }
}

pub struct LocalBackend {
    config: LocalConfig,
    voices: Mutex<Vec<String>>,
    current: Mutex<Option<String>>,
    cancel: Mutex<CancellationToken>,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Self {
        let voices = config.voices.clone();
        let current = config.voice.clone().or_else(|| voices.first().cloned());
        Self {
            config,
            voices: Mutex::new(voices),
            current: Mutex::new(current),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Replaces the cancellation token for a new synthesis call.
    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    fn command(&self, prosody: &ProsodySettings, voice: Option<&str>, output: &Output) -> Command {
        let mut cmd = Command::new(&self.config.program);
        if prosody.use_markup {
            cmd.arg("-m");
        } else {
            cmd.arg("-s").arg(words_per_minute(prosody.rate_percent).to_string());
            cmd.arg("-a").arg(amplitude(prosody).to_string());
        }
        if let Some(voice) = voice {
            cmd.arg("-v").arg(voice);
        }
        if let Output::File(path) = output {
            cmd.arg("-w").arg(path);
        }
        cmd.arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn query_voices(&self) -> Vec<String> {
        let output = Command::new(&self.config.program)
            .arg("--voices")
            .stdin(Stdio::null())
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                parse_voice_listing(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                warn!(status = %out.status, "voice listing failed");
                Vec::new()
            }
            Err(e) => {
                warn!(program = %self.config.program, "could not run engine: {}", e);
                Vec::new()
            }
        }
    }
}

fn words_per_minute(rate_percent: i32) -> i32 {
    (BASE_WPM.saturating_mul(100i32.saturating_add(rate_percent)) / 100).clamp(80, 500)
}

/// Engine amplitude runs 0-200 with 100 as normal.
fn amplitude(prosody: &ProsodySettings) -> u32 {
    prosody.volume.percent() * 2
}

/// Extracts voice names from `--voices` output (the fourth column).
pub fn parse_voice_listing(listing: &str) -> Vec<String> {
    let mut voices: Vec<String> = Vec::new();
    for line in listing.lines().skip(1) {
        if let Some(name) = line.split_whitespace().nth(3) {
            if !voices.iter().any(|v| v == name) {
                voices.push(name.to_string());
            }
        }
    }
    voices
}

#[async_trait]
impl TtsBackend for LocalBackend {
    fn name(&self) -> &str {
        "Local engine"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Local
    }

    async fn list_voices(&self) -> Vec<String> {
        let cached = self.voices.lock().clone();
        if !cached.is_empty() {
            return cached;
        }
        let voices = self.query_voices().await;
        info!(count = voices.len(), "loaded engine voices");
        *self.voices.lock() = voices.clone();
        let mut current = self.current.lock();
        if current.is_none() {
            *current = voices.first().cloned();
        }
        voices
    }

    fn current_voice(&self) -> Option<String> {
        self.current.lock().clone()
    }

    fn select_voice(&self, name: &str) {
        let voices = self.voices.lock().clone();
        let chosen = if voices.is_empty() || voices.iter().any(|v| v == name) {
            Some(name.to_string())
        } else {
            voices
                .iter()
                .find(|v| v.contains(name) || name.contains(v.as_str()))
                .cloned()
        };
        match chosen {
            Some(voice) => {
                debug!(voice = %voice, "voice selected");
                *self.current.lock() = Some(voice);
            }
            None => warn!(voice = %name, "unknown voice, keeping current"),
        }
    }

    async fn synthesize(
        &self,
        text: &str,
        prosody: &ProsodySettings,
        output: &Output,
    ) -> Result<(), TtsError> {
        let token = self.arm();
        let voice = self.current_voice();
        let input = if prosody.use_markup {
            ssml::build(text, prosody, Dialect::Local, voice.as_deref())
        } else {
            text.to_string()
        };
        debug!(input = %input, "engine input");

        let mut child = self.command(prosody, voice.as_deref(), output).spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }

        tokio::select! {
            result = child.wait_with_output() => {
                let out = result?;
                if out.status.success() {
                    Ok(())
                } else {
                    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                    error!(status = %out.status, "engine failed: {}", stderr);
                    Err(TtsError::Engine(format!("{} exited with {}: {}", self.config.program, out.status, stderr)))
                }
            }
            _ = token.cancelled() => {
                info!("engine synthesis cancelled");
                Err(TtsError::Cancelled)
            }
        }
    }

    fn cancel_current(&self) {
        self.cancel.lock().cancel();
    }
}
