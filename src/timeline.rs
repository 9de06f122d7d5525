//! Keeps time markers and their derived segments in lockstep.
//!
//! Markers are the record; segments are rebuilt from them by [`Timeline::recompute`]
//! after every marker mutation. Edits made through a segment are written back to
//! its start marker before the rebuild so they survive it.

use crate::prosody::ProsodySettings;
use crate::segment::{derive_segments, MarkerId, Segment, TimeMarker};
use crate::tags::{self, DEFAULT_VOICE};
use tracing::{debug, info};

/// Default timeline length, in seconds, when no audio has been loaded.
pub const DEFAULT_DURATION: f64 = 10.0;

type Observer = Box<dyn Fn(&[Segment]) + Send + Sync>;

pub struct Timeline {
    markers: Vec<TimeMarker>,
    segments: Vec<Segment>,
    duration: f64,
    voices: Vec<String>,
    source_text: String,
    observer: Option<Observer>,
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("markers", &self.markers)
            .field("segments", &self.segments)
            .field("duration", &self.duration)
            .field("voices", &self.voices)
            .finish_non_exhaustive()
    }
}

impl Timeline {
    pub fn new(duration: f64, voices: Vec<String>) -> Self {
        Self {
            markers: Vec::new(),
            segments: Vec::new(),
            duration: duration.max(0.0),
            voices,
            source_text: String::new(),
            observer: None,
        }
    }

    /// Runs the full tagged-text flow: voice tags become split tags, markers are
    /// spread evenly over `duration`, and each segment takes the voice its tag named.
    pub fn from_tagged_text(text: &str, voices: Vec<String>, duration: f64) -> Self {
        let mut timeline = Self::new(duration, voices);
        if tags::contains_voice_tags(text) && !timeline.voices.is_empty() {
            let processed = tags::process_voice_tags(text, &timeline.voices);
            let assignments = tags::voice_assignments(text, &timeline.voices);
            timeline.derive_from_text(&processed);
            timeline.apply_voice_assignments(&assignments);
            info!(
                segments = timeline.segments.len(),
                "generated timeline with voice assignments from tags"
            );
        } else {
            timeline.derive_from_text(text);
        }
        timeline
    }

    /// Registers the callback that receives every recomputed segment list.
    pub fn set_observer(&mut self, observer: impl Fn(&[Segment]) + Send + Sync + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn markers(&self) -> &[TimeMarker] {
        &self.markers
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn voices(&self) -> &[String] {
        &self.voices
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn set_source_text(&mut self, text: impl Into<String>) {
        self.source_text = text.into();
        self.recompute();
    }

    pub fn set_voices(&mut self, voices: Vec<String>) {
        self.voices = voices;
    }

    /// Sets the audio length and seeds start/end markers on an empty timeline.
    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        if self.markers.is_empty() {
            self.insert(TimeMarker::new(0.0, self.fallback_voice()));
            self.insert(TimeMarker::new(self.duration, self.fallback_voice()));
            self.recompute();
        }
    }

    fn fallback_voice(&self) -> String {
        self.voices
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_VOICE.to_string())
    }

    fn resolve_voice(&self, voice: &str) -> String {
        if self.voices.iter().any(|v| v == voice) {
            voice.to_string()
        } else {
            self.fallback_voice()
        }
    }

    /// Inserts after any markers at the same time, so ties keep insertion order.
    fn insert(&mut self, marker: TimeMarker) -> MarkerId {
        let id = marker.id;
        let at = self.markers.partition_point(|m| m.time <= marker.time);
        self.markers.insert(at, marker);
        id
    }

    /// Adds a marker at `time` clamped to the timeline, then recomputes.
    /// Unknown voices fall back to the first available one.
    pub fn add_marker(&mut self, time: f64, voice: Option<&str>) -> MarkerId {
        let time = time.clamp(0.0, self.duration);
        let voice = match voice {
            Some(voice) => self.resolve_voice(voice),
            None => self.fallback_voice(),
        };
        let id = self.insert(TimeMarker::new(time, voice));
        debug!(%id, time, "marker added");
        self.recompute();
        id
    }

    /// Removes a marker unless that would leave fewer than two.
    pub fn delete_marker(&mut self, id: MarkerId) -> bool {
        if self.markers.len() < 3 {
            debug!(%id, "refusing to delete: marker floor reached");
            return false;
        }
        let Some(pos) = self.markers.iter().position(|m| m.id == id) else {
            return false;
        };
        self.markers.remove(pos);
        self.recompute();
        true
    }

    pub fn clear_markers(&mut self) {
        self.markers.clear();
        self.recompute();
    }

    /// Rebuilds segments from the markers and notifies the observer.
    pub fn recompute(&mut self) -> &[Segment] {
        self.segments = derive_segments(&self.markers, &self.source_text);
        if let Some(observer) = &self.observer {
            observer(&self.segments);
        }
        &self.segments
    }

    /// Applies voice and prosody to segment `index` by writing them to its start
    /// marker. Unknown voices fall back to the first available one.
    pub fn apply_segment_settings(
        &mut self,
        index: usize,
        voice: &str,
        prosody: ProsodySettings,
    ) -> bool {
        let Some(segment) = self.segments.get(index) else {
            return false;
        };
        let marker_id = segment.marker;
        let voice = self.resolve_voice(voice);
        let Some(marker) = self.markers.iter_mut().find(|m| m.id == marker_id) else {
            return false;
        };
        marker.voice = voice;
        marker.prosody = Some(prosody);
        info!(index, voice = %marker.voice, "applied settings to segment");
        self.recompute();
        true
    }

    /// Replaces all markers with ones derived from the split tags in `text`.
    ///
    /// `k` split tags give `k + 2` evenly spaced markers with voices cycling
    /// through the voice list; untagged text gets a start and an end marker.
    pub fn derive_from_text(&mut self, text: &str) {
        self.markers.clear();
        self.source_text = text.to_string();

        let parts = tags::split_raw(text).len();
        if parts > 1 {
            let step = self.duration / parts as f64;
            for i in 0..=parts {
                let voice = if self.voices.is_empty() {
                    DEFAULT_VOICE.to_string()
                } else {
                    self.voices[i % self.voices.len()].clone()
                };
                self.insert(TimeMarker::new(i as f64 * step, voice));
            }
        } else {
            self.insert(TimeMarker::new(0.0, self.fallback_voice()));
            self.insert(TimeMarker::new(self.duration, self.fallback_voice()));
        }
        self.recompute();
    }

    /// Gives sorted marker `i` the voice `assignments[i]`, falling back for
    /// voices that are not available.
    pub fn apply_voice_assignments(&mut self, assignments: &[String]) {
        let resolved: Vec<String> = assignments.iter().map(|v| self.resolve_voice(v)).collect();
        for (marker, voice) in self.markers.iter_mut().zip(resolved) {
            marker.voice = voice;
        }
        self.recompute();
    }

    /// Index of the first segment covering `time`.
    pub fn segment_at(&self, time: f64) -> Option<usize> {
        self.segments.iter().position(|s| s.contains(time))
    }
}
