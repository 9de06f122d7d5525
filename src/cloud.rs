//! Cloud backend speaking the Google Cloud Text-to-Speech REST shape.

use crate::backend::{Output, TtsBackend};
use crate::error::TtsError;
use crate::prosody::ProsodySettings;
use crate::ssml::{self, Dialect};
use async_trait::async_trait;
use base64::prelude::*;
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const SYNTHESIZE_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Voice used when a requested voice matches nothing.
pub const FALLBACK_VOICE: &str = "en-US-Standard-A";

const INITIAL_VOICE: &str = "en-US-Wavenet-D";

/// Display name and voice id.
static VOICES: [(&str, &str); 15] = [
    ("en-US-Wavenet-A (Female)", "en-US-Wavenet-A"),
    ("en-US-Wavenet-B (Male)", "en-US-Wavenet-B"),
    ("en-US-Wavenet-C (Female)", "en-US-Wavenet-C"),
    ("en-US-Wavenet-D (Male)", "en-US-Wavenet-D"),
    ("en-US-Wavenet-E (Female)", "en-US-Wavenet-E"),
    ("en-US-Wavenet-F (Female)", "en-US-Wavenet-F"),
    ("en-US-Neural2-A (Male)", "en-US-Neural2-A"),
    ("en-US-Neural2-C (Female)", "en-US-Neural2-C"),
    ("en-US-Neural2-D (Male)", "en-US-Neural2-D"),
    ("en-US-Neural2-E (Female)", "en-US-Neural2-E"),
    ("en-US-Standard-A (Male)", "en-US-Standard-A"),
    ("en-US-Standard-B (Male)", "en-US-Standard-B"),
    ("en-US-Standard-C (Female)", "en-US-Standard-C"),
    ("en-US-Standard-D (Male)", "en-US-Standard-D"),
    ("en-US-Standard-E (Female)", "en-US-Standard-E"),
];

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub api_key: String,
    pub endpoint: String,
    pub timeout: Duration,
    /// Command that plays a WAV file, used for live playback.
    pub player: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: SYNTHESIZE_URL.to_string(),
            timeout: Duration::from_secs(30),
            player: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: Option<String>,
}

pub struct CloudBackend {
    client: reqwest::Client,
    config: CloudConfig,
    current: Mutex<String>,
    cancel: Mutex<CancellationToken>,
}

/// Maps a display name, a voice id, or a fragment of either onto a voice id.
pub fn resolve_voice(name: &str) -> Option<&'static str> {
    VOICES
        .iter()
        .find(|(display, id)| *display == name || *id == name)
        .or_else(|| {
            VOICES
                .iter()
                .find(|(display, id)| display.contains(name) || id.contains(name))
        })
        .map(|(_, id)| *id)
}

impl CloudBackend {
    pub fn new(config: CloudConfig) -> Result<Self, TtsError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            current: Mutex::new(INITIAL_VOICE.to_string()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    async fn fetch_audio(&self, text: &str, prosody: &ProsodySettings) -> Result<Vec<u8>, TtsError> {
        let voice = self.current.lock().clone();
        let body = ssml::cloud_request(text, prosody, &voice);
        debug!(voice = %voice, gender = ?body.voice.ssml_gender, "cloud synthesis request");

        let response = self
            .client
            .post(&self.config.endpoint)
            .query(&[("key", &self.config.api_key)])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            match status {
                reqwest::StatusCode::FORBIDDEN => {
                    warn!("api key may be invalid or the text-to-speech api is not enabled")
                }
                reqwest::StatusCode::BAD_REQUEST => warn!(voice = %voice, "bad request"),
                _ => {}
            }
            return Err(TtsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SynthesizeResponse = response.json().await?;
        let content = parsed
            .audio_content
            .ok_or_else(|| TtsError::Decode("no audio content in response".to_string()))?;
        BASE64_STANDARD
            .decode(content)
            .map_err(|e| TtsError::Decode(e.to_string()))
    }

    async fn play(&self, audio: &[u8]) -> Result<(), TtsError> {
        let Some(player) = &self.config.player else {
            return Err(TtsError::Unsupported(
                "cloud playback needs a player command".to_string(),
            ));
        };
        let file = tempfile::Builder::new()
            .prefix("speechcraft")
            .suffix(".wav")
            .tempfile()?;
        tokio::fs::write(file.path(), audio).await?;
        let status = Command::new(player)
            .arg(file.path())
            .kill_on_drop(true)
            .status()
            .await?;
        if !status.success() {
            return Err(TtsError::Engine(format!("{} exited with {}", player, status)));
        }
        Ok(())
    }

    async fn synthesize_inner(
        &self,
        text: &str,
        prosody: &ProsodySettings,
        output: &Output,
    ) -> Result<(), TtsError> {
        let audio = self.fetch_audio(text, prosody).await?;
        match output {
            Output::File(path) => {
                tokio::fs::write(path, &audio).await?;
                info!(path = %path.display(), bytes = audio.len(), "saved cloud audio");
            }
            Output::Playback => self.play(&audio).await?,
        }
        Ok(())
    }
}

#[async_trait]
impl TtsBackend for CloudBackend {
    fn name(&self) -> &str {
        "Google Cloud TTS"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Cloud
    }

    async fn list_voices(&self) -> Vec<String> {
        VOICES.iter().map(|(display, _)| display.to_string()).collect()
    }

    fn current_voice(&self) -> Option<String> {
        Some(self.current.lock().clone())
    }

    fn select_voice(&self, name: &str) {
        let id = resolve_voice(name).unwrap_or_else(|| {
            debug!(voice = %name, "voice not found, using {}", FALLBACK_VOICE);
            FALLBACK_VOICE
        });
        *self.current.lock() = id.to_string();
    }

    async fn synthesize(
        &self,
        text: &str,
        prosody: &ProsodySettings,
        output: &Output,
    ) -> Result<(), TtsError> {
        let token = self.arm();
        tokio::select! {
            result = self.synthesize_inner(text, prosody, output) => result,
            _ = token.cancelled() => Err(TtsError::Cancelled),
        }
    }

    fn cancel_current(&self) {
        self.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_names_ids_and_fragments() {
        assert_eq!(resolve_voice("en-US-Wavenet-C (Female)"), Some("en-US-Wavenet-C"));
        assert_eq!(resolve_voice("en-US-Neural2-E"), Some("en-US-Neural2-E"));
        assert_eq!(resolve_voice("Standard-D"), Some("en-US-Standard-D"));
        assert_eq!(resolve_voice("nobody"), None);
    }

    #[tokio::test]
    async fn lists_display_names_and_selects_ids() {
        let backend = CloudBackend::new(CloudConfig::default()).unwrap();
        let voices = backend.list_voices().await;
        assert_eq!(voices.len(), 15);
        assert_eq!(backend.current_voice().as_deref(), Some("en-US-Wavenet-D"));

        backend.select_voice(&voices[0]);
        assert_eq!(backend.current_voice().as_deref(), Some("en-US-Wavenet-A"));

        // restoring by id works as well as by display name
        backend.select_voice("en-US-Wavenet-D");
        assert_eq!(backend.current_voice().as_deref(), Some("en-US-Wavenet-D"));
    }

    #[tokio::test]
    async fn playback_without_player_is_unsupported() {
        let backend = CloudBackend::new(CloudConfig::default()).unwrap();
        let result = backend.play(b"RIFF").await;
        assert!(matches!(result, Err(TtsError::Unsupported(_))));
    }

    #[test]
    fn decodes_response_body() {
        let parsed: SynthesizeResponse =
            serde_json::from_str(r#"{"audioContent":"UklGRg=="}"#).unwrap();
        let bytes = BASE64_STANDARD.decode(parsed.audio_content.unwrap()).unwrap();
        assert_eq!(bytes, b"RIFF");
    }
}
