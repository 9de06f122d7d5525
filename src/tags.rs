//! Inline tag parsing: `<voice=N>` selects a voice, `<split>` marks a segment boundary.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Voice name used when no voices are configured.
pub const DEFAULT_VOICE: &str = "Default";

/// Token inserted between segments whose voices differ.
pub const SPLIT_TAG: &str = "<split>";

static VOICE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*voice\s*=\s*(\d+)\s*>").expect("valid voice tag pattern"));

static SPLIT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*split\s*/?\s*>").expect("valid split tag pattern"));

/// A run of text spoken by one voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSegment {
    pub text: String,
    pub voice_index: usize,
    pub voice_name: String,
}

/// Maps a 1-based tag number onto a 0-based index within `[0, count-1]`.
///
/// Numbers too large to parse clamp to the last voice.
fn resolve_voice_index(digits: &str, count: usize) -> usize {
    let last = count.saturating_sub(1);
    match digits.parse::<usize>() {
        Ok(n) => n.saturating_sub(1).min(last),
        Err(_) => last,
    }
}

fn voice_name(index: usize, voices: &[String]) -> String {
    if voices.is_empty() {
        return DEFAULT_VOICE.to_string();
    }
    voices[index.min(voices.len() - 1)].clone()
}

/// Splits `text` into voice runs according to its `<voice=N>` tags.
pub fn parse_voice_segments(text: &str, voices: &[String]) -> Vec<VoiceSegment> {
    let mut segments = Vec::new();

    if !VOICE_TAG.is_match(text) {
        segments.push(VoiceSegment {
            text: text.trim().to_string(),
            voice_index: 0,
            voice_name: voice_name(0, voices),
        });
        return segments;
    }

    let mut push = |span: &str, index: usize| {
        let span = span.trim();
        if !span.is_empty() {
            segments.push(VoiceSegment {
                text: span.to_string(),
                voice_index: index,
                voice_name: voice_name(index, voices),
            });
        }
    };

    let mut position = 0;
    let mut current = 0;
    for caps in VOICE_TAG.captures_iter(text) {
        let Some(tag) = caps.get(0) else { continue };
        push(&text[position..tag.start()], current);
        if let Some(digits) = caps.get(1) {
            current = resolve_voice_index(digits.as_str(), voices.len());
        }
        position = tag.end();
    }
    push(&text[position..], current);

    debug!(count = segments.len(), "parsed voice segments");
    segments
}

/// Joins segments with spaces, inserting a split tag wherever the voice changes.
pub fn build_output_with_split_tags(segments: &[VoiceSegment]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(segments.len() * 2);
    for (i, segment) in segments.iter().enumerate() {
        parts.push(&segment.text);
        if let Some(next) = segments.get(i + 1) {
            if next.voice_index != segment.voice_index {
                parts.push(SPLIT_TAG);
            }
        }
    }
    parts.join(" ")
}

/// Rewrites voice-tagged text into split-tagged text.
///
/// Empty input, or an empty voice list, is returned unchanged.
pub fn process_voice_tags(text: &str, voices: &[String]) -> String {
    if text.is_empty() || voices.is_empty() {
        return text.to_string();
    }
    build_output_with_split_tags(&parse_voice_segments(text, voices))
}

/// Voice name for every chunk of [`process_voice_tags`] output, in order.
///
/// Adjacent runs with the same voice share one chunk, so they share one entry.
pub fn voice_assignments(text: &str, voices: &[String]) -> Vec<String> {
    let segments = parse_voice_segments(text, voices);
    let mut assignments: Vec<String> = Vec::new();
    let mut last: Option<usize> = None;
    for segment in segments {
        if last != Some(segment.voice_index) {
            assignments.push(segment.voice_name);
            last = Some(segment.voice_index);
        }
    }
    assignments
}

pub fn contains_voice_tags(text: &str) -> bool {
    VOICE_TAG.is_match(text)
}

/// Strips voice tags, leaving the spoken text.
pub fn remove_voice_tags(text: &str) -> String {
    VOICE_TAG.replace_all(text, "").trim().to_string()
}

/// Replaces split tags with spaces, for speaking the text in one go.
pub fn strip_split_tags(text: &str) -> String {
    SPLIT_TAG_RE.replace_all(text, " ").into_owned()
}

/// Raw parts between split tags: `k` tags always give `k + 1` parts.
pub fn split_raw(text: &str) -> Vec<&str> {
    SPLIT_TAG_RE.split(text).collect()
}

/// Trimmed parts between split tags, empty ones included, so that part `i`
/// always belongs to segment `i`.
pub fn split_chunks(text: &str) -> Vec<&str> {
    split_raw(text).into_iter().map(str::trim).collect()
}

/// Trimmed, non-empty chunks between split tags. Never empty: text with
/// no content yields a single empty chunk.
pub fn split_text(text: &str) -> Vec<String> {
    let mut chunks: Vec<String> = split_raw(text)
        .into_iter()
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect();
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voices(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn two_voices_become_split_text() {
        let v = voices(&["Alice", "Bob"]);
        let segments = parse_voice_segments("<voice=1>Hello <voice=2>World", &v);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello");
        assert_eq!(segments[0].voice_name, "Alice");
        assert_eq!(segments[1].text, "World");
        assert_eq!(segments[1].voice_name, "Bob");
        assert_eq!(build_output_with_split_tags(&segments), "Hello <split> World");
    }

    #[test]
    fn out_of_range_indices_clamp() {
        let v = voices(&["A", "B"]);
        let high = parse_voice_segments("<voice=5>loud", &v);
        assert_eq!(high[0].voice_index, 1);
        assert_eq!(high[0].voice_name, "B");

        let low = parse_voice_segments("<voice=0>quiet", &v);
        assert_eq!(low[0].voice_index, 0);

        let huge = parse_voice_segments("<voice=99999999999999999999999>x", &v);
        assert_eq!(huge[0].voice_index, 1);
    }

    #[test]
    fn resolved_index_always_in_range() {
        let v = voices(&["A", "B", "C"]);
        for n in 0..20 {
            let text = format!("<voice={n}>word");
            let segments = parse_voice_segments(&text, &v);
            assert!(segments[0].voice_index < v.len(), "n = {n}");
        }
    }

    #[test]
    fn no_tags_is_one_default_segment() {
        let segments = parse_voice_segments("  just text  ", &voices(&["V1"]));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "just text");
        assert_eq!(segments[0].voice_name, "V1");

        let segments = parse_voice_segments("text", &[]);
        assert_eq!(segments[0].voice_name, DEFAULT_VOICE);
    }

    #[test]
    fn tags_are_case_and_space_tolerant() {
        let v = voices(&["A", "B"]);
        let segments = parse_voice_segments("< VOICE = 2 >hi<Voice=1>there", &v);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].voice_index, 1);
        assert_eq!(segments[1].voice_index, 0);
    }

    #[test]
    fn empty_spans_are_dropped() {
        let v = voices(&["A", "B"]);
        let segments = parse_voice_segments("<voice=1>  <voice=2>only", &v);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "only");
        assert_eq!(segments[0].voice_index, 1);
    }

    #[test]
    fn text_before_first_tag_uses_first_voice() {
        let v = voices(&["A", "B"]);
        let segments = parse_voice_segments("intro <voice=2>rest", &v);
        assert_eq!(segments[0].text, "intro");
        assert_eq!(segments[0].voice_index, 0);
        assert_eq!(segments[1].voice_index, 1);
    }

    #[test]
    fn split_tags_only_between_voice_changes() {
        let v = voices(&["A", "B"]);
        let text = "<voice=1>one <voice=1>two <voice=2>three <voice=1>four";
        let segments = parse_voice_segments(text, &v);
        let output = build_output_with_split_tags(&segments);
        assert_eq!(output, "one two <split> three <split> four");

        let changes = segments
            .windows(2)
            .filter(|w| w[0].voice_index != w[1].voice_index)
            .count();
        assert_eq!(split_raw(&output).len(), changes + 1);
    }

    #[test]
    fn assignments_line_up_with_chunks() {
        let v = voices(&["A", "B"]);
        let text = "<voice=1>one <voice=1>two <voice=2>three";
        let chunks = split_text(&process_voice_tags(text, &v));
        let assignments = voice_assignments(text, &v);
        assert_eq!(chunks, vec!["one two", "three"]);
        assert_eq!(assignments, vec!["A", "B"]);
    }

    #[test]
    fn process_without_voices_is_identity() {
        assert_eq!(process_voice_tags("<voice=1>x", &[]), "<voice=1>x");
        assert_eq!(process_voice_tags("", &voices(&["A"])), "");
    }

    #[test]
    fn raw_split_counts_tags() {
        assert_eq!(split_raw("a <split> b <SPLIT/> c").len(), 3);
        assert_eq!(split_raw("no tags").len(), 1);
        assert_eq!(split_raw("<split><split>").len(), 3);
    }

    #[test]
    fn simple_split_trims_and_drops_empties() {
        assert_eq!(split_text("A <split> B <split> C"), vec!["A", "B", "C"]);
        assert_eq!(split_text(" <split/> x <split> "), vec!["x"]);
        assert_eq!(split_text("<split>"), vec![""]);
        assert_eq!(split_chunks("A <split> <split> C"), vec!["A", "", "C"]);
        assert_eq!(split_chunks(" x "), vec!["x"]);
        assert_eq!(split_text(""), vec![""]);
    }

    #[test]
    fn removes_and_strips_tags() {
        assert_eq!(remove_voice_tags("<voice=1>Hi <voice=2>there"), "Hi there");
        assert!(contains_voice_tags("x <voice = 3> y"));
        assert!(!contains_voice_tags("x <voice> y"));
        assert_eq!(strip_split_tags("a<split>b"), "a b");
    }
}
