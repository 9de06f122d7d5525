//! The capability every speech backend exposes to the orchestrator.

use crate::error::TtsError;
use crate::prosody::ProsodySettings;
use crate::ssml::Dialect;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Where synthesized audio goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Live playback on the default device.
    Playback,
    /// A WAV file written by the backend.
    File(PathBuf),
}

impl Output {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }
}

/// A text-to-speech backend with one active voice at a time.
///
/// Backends are shared behind `Arc`, so voice selection and cancellation use
/// interior mutability. Synthesis calls must not overlap on one backend; the
/// session serializes them.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// The markup dialect this backend consumes.
    fn dialect(&self) -> Dialect;

    /// Voices in display order.
    async fn list_voices(&self) -> Vec<String>;

    /// The active voice, if one has been chosen.
    fn current_voice(&self) -> Option<String>;

    /// Makes `name` the active voice. Unknown names fall back according to
    /// the backend's own policy; this never fails.
    fn select_voice(&self, name: &str);

    /// Speaks `text` with the active voice into `output`.
    async fn synthesize(
        &self,
        text: &str,
        prosody: &ProsodySettings,
        output: &Output,
    ) -> Result<(), TtsError>;

    /// Aborts the synthesis in flight, if any. It then returns `TtsError::Cancelled`.
    fn cancel_current(&self);
}
