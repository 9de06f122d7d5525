//! Time markers and the segments derived from them.

use crate::prosody::ProsodySettings;
use crate::tags::split_chunks;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a marker, independent of its time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerId(Uuid);

impl MarkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MarkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point on the timeline carrying the voice for the segment it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeMarker {
    pub id: MarkerId,
    pub time: f64,
    pub voice: String,
    /// `None` until settings are applied through a segment.
    pub prosody: Option<ProsodySettings>,
}

impl TimeMarker {
    pub fn new(time: f64, voice: impl Into<String>) -> Self {
        Self {
            id: MarkerId::new(),
            time,
            voice: voice.into(),
            prosody: None,
        }
    }
}

/// The span between two adjacent markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub voice: String,
    pub text: String,
    pub prosody: Option<ProsodySettings>,
    /// The start marker this segment was derived from.
    pub marker: MarkerId,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }

    /// The segment's own prosody, or `global` when it has none.
    pub fn effective_prosody(&self, global: &ProsodySettings) -> ProsodySettings {
        self.prosody.clone().unwrap_or_else(|| global.clone())
    }
}

/// Pairs each marker with its successor, taking voice and prosody from the
/// start marker and text from the matching split-tag chunk.
///
/// Fewer than two markers yield no segments.
pub fn derive_segments(markers: &[TimeMarker], source_text: &str) -> Vec<Segment> {
    if markers.len() < 2 {
        return Vec::new();
    }

    let mut sorted: Vec<&TimeMarker> = markers.iter().collect();
    sorted.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut chunks = split_chunks(source_text).into_iter();
    sorted
        .windows(2)
        .map(|pair| Segment {
            start: pair[0].time,
            end: pair[1].time,
            voice: pair[0].voice.clone(),
            text: chunks.next().unwrap_or_default().to_string(),
            prosody: pair[0].prosody.clone(),
            marker: pair[0].id,
        })
        .collect()
}
