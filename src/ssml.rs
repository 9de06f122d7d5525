//! Markup generation for the two backend dialects.
//!
//! The local dialect carries everything in the document: voice, prosody,
//! emphasis and breaks. The cloud dialect keeps only emphasis and breaks in
//! the markup and sends voice, rate, pitch and volume in a sibling request
//! config ([`SynthesisRequest`]).

use crate::prosody::{EmphasisLevel, ProsodySettings};
use crate::segment::Segment;
use crate::tags::split_chunks;
use serde::{Deserialize, Serialize};

pub const LANGUAGE_CODE: &str = "en-US";

const SPEAK_OPEN: &str = r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="en-US">"#;

const PREVIEW_PLACEHOLDER: &str = "Sample text";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Native OS / command-line engine.
    Local,
    /// Cloud HTTP service.
    Cloud,
}

/// Escapes text for use inside markup content or attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Markup writer that either packs nodes onto one line or puts each node on
/// its own indented line.
struct Markup {
    out: String,
    indented: bool,
    depth: usize,
}

impl Markup {
    fn new(indented: bool) -> Self {
        Self {
            out: String::new(),
            indented,
            depth: 0,
        }
    }

    fn node(&mut self, node: &str) {
        if self.indented {
            for _ in 0..self.depth {
                self.out.push_str("  ");
            }
            self.out.push_str(node);
            self.out.push('\n');
        } else {
            self.out.push_str(node);
        }
    }

    fn open(&mut self, tag: &str) {
        self.node(tag);
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.node(tag);
    }

    fn text(&mut self, text: &str) {
        self.node(&escape(text));
    }

    fn finish(mut self) -> String {
        let len = self.out.trim_end_matches('\n').len();
        self.out.truncate(len);
        self.out
    }
}

fn push_emphasized(m: &mut Markup, text: &str, emphasis: EmphasisLevel) {
    if emphasis == EmphasisLevel::None {
        m.text(text);
    } else {
        m.open(&format!(r#"<emphasis level="{emphasis}">"#));
        m.text(text);
        m.close("</emphasis>");
    }
}

fn push_break(m: &mut Markup, break_ms: u32) {
    if break_ms > 0 {
        m.node(&format!(r#"<break time="{break_ms}ms"/>"#));
    }
}

fn push_prosody(m: &mut Markup, text: &str, prosody: &ProsodySettings) {
    m.open(&format!(
        r#"<prosody rate="{}" pitch="{}" volume="{}">"#,
        prosody.rate_attr(),
        prosody.pitch_attr(),
        prosody.volume
    ));
    push_emphasized(m, text, prosody.emphasis);
    m.close("</prosody>");
}

/// Local dialect fragment for one piece of text: optional voice element,
/// prosody, emphasis and break. The break goes inside the voice element when
/// `break_in_voice` is set, after it otherwise.
fn push_fragment(
    m: &mut Markup,
    voice: Option<&str>,
    text: &str,
    prosody: &ProsodySettings,
    break_in_voice: bool,
) {
    let voice = voice.filter(|v| !v.is_empty());
    if let Some(name) = voice {
        m.open(&format!(r#"<voice name="{}">"#, escape(name)));
    }
    push_prosody(m, text, prosody);
    if voice.is_some() {
        if break_in_voice {
            push_break(m, prosody.break_ms);
        }
        m.close("</voice>");
        if break_in_voice {
            return;
        }
    }
    push_break(m, prosody.break_ms);
}

/// Renders one piece of text as a complete markup document.
///
/// `voice` is only used by the local dialect, which names the active voice
/// in the document.
pub fn build(text: &str, prosody: &ProsodySettings, dialect: Dialect, voice: Option<&str>) -> String {
    let mut m = Markup::new(false);
    match dialect {
        Dialect::Local => {
            m.open(SPEAK_OPEN);
            push_fragment(&mut m, voice, text, prosody, false);
        }
        Dialect::Cloud => {
            m.open("<speak>");
            push_emphasized(&mut m, text, prosody.emphasis);
            push_break(&mut m, prosody.break_ms);
        }
    }
    m.close("</speak>");
    m.finish()
}

/// One voice's contribution to a multi-voice document.
#[derive(Debug, Clone, Copy)]
pub struct VoicePart<'a> {
    pub voice: &'a str,
    pub text: &'a str,
    pub prosody: &'a ProsodySettings,
}

/// Renders several parts into one local-dialect document, each part in its
/// own voice element.
pub fn build_multi_voice(parts: &[VoicePart<'_>]) -> String {
    let mut m = Markup::new(true);
    m.open(SPEAK_OPEN);
    for part in parts {
        push_fragment(&mut m, Some(part.voice), part.text, part.prosody, true);
    }
    m.close("</speak>");
    m.finish()
}

/// Preview of what will be spoken for `source_text`.
///
/// With segments, chunk `i` of the text is paired with segment `i`, empty
/// chunks are left out, and the result is a multi-voice document. Without
/// segments, the first chunk is rendered with `global` settings.
pub fn preview(source_text: &str, segments: &[Segment], global: &ProsodySettings) -> String {
    if source_text.trim().is_empty() {
        return format!("<speak>{PREVIEW_PLACEHOLDER}</speak>");
    }
    let chunks = split_chunks(source_text);

    if !segments.is_empty() {
        let prosodies: Vec<ProsodySettings> = segments
            .iter()
            .map(|s| s.effective_prosody(global))
            .collect();
        let parts: Vec<VoicePart<'_>> = segments
            .iter()
            .zip(&prosodies)
            .zip(&chunks)
            .filter(|(_, chunk)| !chunk.is_empty())
            .map(|((segment, prosody), chunk)| VoicePart {
                voice: &segment.voice,
                text: chunk,
                prosody,
            })
            .collect();
        return build_multi_voice(&parts);
    }

    let first = chunks
        .first()
        .copied()
        .filter(|c| !c.is_empty())
        .unwrap_or(PREVIEW_PLACEHOLDER);
    let mut m = Markup::new(true);
    m.open(SPEAK_OPEN);
    push_fragment(&mut m, None, first, global, false);
    m.close("</speak>");
    m.finish()
}

/// Request body for the cloud `text:synthesize` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub input: SynthesisInput,
    pub voice: VoiceSelection,
    pub audio_config: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisInput {
    Ssml(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSelection {
    pub language_code: String,
    pub name: String,
    pub ssml_gender: VoiceGender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoiceGender {
    Female,
    Male,
    Neutral,
}

impl VoiceGender {
    /// Guesses the gender from a cloud voice id or display name.
    pub fn infer(voice: &str) -> Self {
        const FEMALE: [&str; 5] = ["Female", "-C", "-E", "-F", "-H"];
        const MALE: [&str; 6] = ["Male", "-A", "-B", "-D", "-I", "-J"];
        if FEMALE.iter().any(|m| voice.contains(m)) {
            Self::Female
        } else if MALE.iter().any(|m| voice.contains(m)) {
            Self::Male
        } else {
            Self::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    pub audio_encoding: String,
    pub speaking_rate: f64,
    pub pitch: i32,
    pub volume_gain_db: f64,
}

/// Builds the cloud request: markup body plus the synthesis config carrying
/// voice, rate, pitch and volume.
pub fn cloud_request(text: &str, prosody: &ProsodySettings, voice_id: &str) -> SynthesisRequest {
    let input = if prosody.use_markup {
        SynthesisInput::Ssml(build(text, prosody, Dialect::Cloud, None))
    } else {
        SynthesisInput::Text(text.to_string())
    };
    SynthesisRequest {
        input,
        voice: VoiceSelection {
            language_code: LANGUAGE_CODE.to_string(),
            name: voice_id.to_string(),
            ssml_gender: VoiceGender::infer(voice_id),
        },
        audio_config: AudioConfig {
            audio_encoding: "LINEAR16".to_string(),
            speaking_rate: prosody.speaking_rate(),
            pitch: prosody.pitch_semitones,
            volume_gain_db: prosody.volume.gain_db(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prosody::VolumeLevel;
    use crate::segment::{derive_segments, TimeMarker};

    fn loud_with_break() -> ProsodySettings {
        ProsodySettings {
            rate_percent: 10,
            pitch_semitones: -2,
            volume: VolumeLevel::Loud,
            emphasis: EmphasisLevel::None,
            break_ms: 300,
            use_markup: true,
        }
    }

    #[test]
    fn local_document() {
        let doc = build("Hi", &loud_with_break(), Dialect::Local, Some("Zira"));
        assert_eq!(
            doc,
            concat!(
                r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="en-US">"#,
                r#"<voice name="Zira"><prosody rate="110%" pitch="-2st" volume="loud">Hi</prosody></voice>"#,
                r#"<break time="300ms"/></speak>"#
            )
        );
        assert!(!doc.contains("emphasis"));
    }

    #[test]
    fn local_without_voice_or_break() {
        let prosody = ProsodySettings {
            emphasis: EmphasisLevel::Strong,
            ..Default::default()
        };
        let doc = build("a < b", &prosody, Dialect::Local, None);
        assert!(!doc.contains("<voice"));
        assert!(!doc.contains("<break"));
        assert!(doc.contains(r#"pitch="+0st""#));
        assert!(doc.contains(r#"rate="100%""#));
        assert!(doc.contains(r#"<emphasis level="strong">a &lt; b</emphasis>"#));
    }

    #[test]
    fn cloud_markup_has_no_prosody() {
        let prosody = ProsodySettings {
            emphasis: EmphasisLevel::Moderate,
            ..loud_with_break()
        };
        let doc = build("Tom & Jerry", &prosody, Dialect::Cloud, Some("ignored"));
        assert_eq!(
            doc,
            r#"<speak><emphasis level="moderate">Tom &amp; Jerry</emphasis><break time="300ms"/></speak>"#
        );
    }

    #[test]
    fn escapes_all_specials() {
        assert_eq!(escape(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&apos;&amp;&apos;&lt;/a&gt;");
    }

    #[test]
    fn cloud_request_config() {
        let mut prosody = ProsodySettings {
            volume: VolumeLevel::XLoud,
            rate_percent: 25,
            pitch_semitones: 3,
            ..Default::default()
        };
        let req = cloud_request("hello", &prosody, "en-US-Wavenet-D");
        assert_eq!(req.audio_config.volume_gain_db, 12.0);
        assert_eq!(req.audio_config.speaking_rate, 1.25);
        assert_eq!(req.audio_config.pitch, 3);
        assert_eq!(req.voice.ssml_gender, VoiceGender::Male);
        assert_eq!(req.input, SynthesisInput::Ssml("<speak>hello</speak>".into()));

        prosody.volume = VolumeLevel::Silent;
        prosody.use_markup = false;
        let req = cloud_request("hello", &prosody, "en-US-Wavenet-C");
        assert_eq!(req.audio_config.volume_gain_db, -96.0);
        assert_eq!(req.voice.ssml_gender, VoiceGender::Female);
        assert_eq!(req.input, SynthesisInput::Text("hello".into()));
    }

    #[test]
    fn cloud_request_json_shape() {
        let req = cloud_request("hi", &ProsodySettings::default(), "custom");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["input"]["ssml"], "<speak>hi</speak>");
        assert_eq!(json["voice"]["languageCode"], "en-US");
        assert_eq!(json["voice"]["ssmlGender"], "NEUTRAL");
        assert_eq!(json["audioConfig"]["audioEncoding"], "LINEAR16");
        assert_eq!(json["audioConfig"]["volumeGainDb"], 0.0);
    }

    #[test]
    fn multi_voice_wraps_each_part() {
        let loud = loud_with_break();
        let plain = ProsodySettings::default();
        let doc = build_multi_voice(&[
            VoicePart { voice: "A", text: "one", prosody: &loud },
            VoicePart { voice: "B", text: "two", prosody: &plain },
        ]);
        assert_eq!(doc.matches("<speak").count(), 1);
        assert_eq!(doc.matches("<voice name=").count(), 2);
        assert!(doc.contains(r#"<voice name="A">"#));
        assert!(doc.contains(r#"<voice name="B">"#));
        assert_eq!(doc.matches("<break").count(), 1);
        assert!(doc.ends_with("</speak>"));
    }

    #[test]
    fn preview_pairs_chunks_with_segments() {
        let markers = vec![
            TimeMarker::new(0.0, "A"),
            TimeMarker::new(1.0, "B"),
            TimeMarker::new(2.0, "C"),
        ];
        let source = "first <split> second <split> third";
        let segments = derive_segments(&markers, source);
        let doc = preview(source, &segments, &ProsodySettings::default());
        assert!(doc.contains("first"));
        assert!(doc.contains("second"));
        assert!(!doc.contains("third"));
        assert!(!doc.contains(r#"<voice name="C">"#));
    }

    #[test]
    fn preview_skips_empty_chunk_but_keeps_its_segment() {
        let markers: Vec<_> = ["A", "B", "C", "D"]
            .iter()
            .enumerate()
            .map(|(i, v)| TimeMarker::new(i as f64, *v))
            .collect();
        let source = "Hello <split> <split> Bye";
        let segments = derive_segments(&markers, source);
        let doc = preview(source, &segments, &ProsodySettings::default());
        assert!(doc.contains(r#"<voice name="A">"#));
        assert!(!doc.contains(r#"<voice name="B">"#));
        let c = doc.find(r#"<voice name="C">"#).expect("voice C present");
        assert!(doc[c..].contains("Bye"));
    }

    #[test]
    fn multi_voice_layout() {
        let prosody = ProsodySettings {
            emphasis: EmphasisLevel::Strong,
            break_ms: 100,
            ..Default::default()
        };
        let doc = build_multi_voice(&[VoicePart { voice: "A", text: "hi", prosody: &prosody }]);
        let expected = [
            SPEAK_OPEN,
            r#"  <voice name="A">"#,
            r#"    <prosody rate="100%" pitch="+0st" volume="medium">"#,
            r#"      <emphasis level="strong">"#,
            "        hi",
            "      </emphasis>",
            "    </prosody>",
            r#"    <break time="100ms"/>"#,
            "  </voice>",
            "</speak>",
        ]
        .join("\n");
        assert_eq!(doc, expected);
    }

    #[test]
    fn extreme_rate_renders() {
        let prosody = ProsodySettings {
            rate_percent: i32::MAX,
            ..Default::default()
        };
        let doc = build("x", &prosody, Dialect::Local, None);
        assert!(doc.contains(&format!(r#"rate="{}%""#, i32::MAX)));
    }

    #[test]
    fn preview_without_segments() {
        let doc = preview("hello <split> later", &[], &loud_with_break());
        assert!(doc.contains("hello"));
        assert!(!doc.contains("later"));
        assert!(doc.contains(r#"<break time="300ms"/>"#));
        assert_eq!(preview("  ", &[], &ProsodySettings::default()), "<speak>Sample text</speak>");
    }
}
