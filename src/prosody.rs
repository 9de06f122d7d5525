//! Prosody vocabulary shared by markers, segments and the markup builder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeLevel {
    Silent,
    XSoft,
    Soft,
    #[default]
    Medium,
    Loud,
    XLoud,
}

impl VolumeLevel {
    pub const ALL: [VolumeLevel; 6] = [
        VolumeLevel::Silent,
        VolumeLevel::XSoft,
        VolumeLevel::Soft,
        VolumeLevel::Medium,
        VolumeLevel::Loud,
        VolumeLevel::XLoud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::XSoft => "x-soft",
            Self::Soft => "soft",
            Self::Medium => "medium",
            Self::Loud => "loud",
            Self::XLoud => "x-loud",
        }
    }

    /// Gain in decibels used by the cloud synthesis config.
    pub fn gain_db(&self) -> f64 {
        match self {
            Self::Silent => -96.0,
            Self::XSoft => -12.0,
            Self::Soft => -6.0,
            Self::Medium => 0.0,
            Self::Loud => 6.0,
            Self::XLoud => 12.0,
        }
    }

    /// Engine volume on a 0-100 scale, used when markup rendering is off.
    pub fn percent(&self) -> u32 {
        match self {
            Self::Silent => 0,
            Self::XSoft => 20,
            Self::Soft => 40,
            Self::Medium => 60,
            Self::Loud => 80,
            Self::XLoud => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmphasisLevel {
    #[default]
    None,
    Reduced,
    Moderate,
    Strong,
}

impl EmphasisLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Reduced => "reduced",
            Self::Moderate => "moderate",
            Self::Strong => "strong",
        }
    }
}

/// Returned when a level name is not part of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown level: {0}")]
pub struct UnknownLevel(pub String);

impl FromStr for VolumeLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

impl FromStr for EmphasisLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "reduced" => Ok(Self::Reduced),
            "moderate" => Ok(Self::Moderate),
            "strong" => Ok(Self::Strong),
            other => Err(UnknownLevel(other.to_string())),
        }
    }
}

impl fmt::Display for VolumeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EmphasisLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate, pitch, volume, emphasis and trailing pause for one piece of speech.
///
/// A value type: markers and segments each hold their own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProsodySettings {
    pub rate_percent: i32,
    pub pitch_semitones: i32,
    pub volume: VolumeLevel,
    pub emphasis: EmphasisLevel,
    pub break_ms: u32,
    /// Render through markup rather than plain engine parameters.
    pub use_markup: bool,
}

impl Default for ProsodySettings {
    fn default() -> Self {
        Self {
            rate_percent: 0,
            pitch_semitones: 0,
            volume: VolumeLevel::Medium,
            emphasis: EmphasisLevel::None,
            break_ms: 0,
            use_markup: true,
        }
    }
}

impl ProsodySettings {
    /// Local dialect rate attribute, e.g. `110%`.
    pub fn rate_attr(&self) -> String {
        format!("{}%", 100i32.saturating_add(self.rate_percent))
    }

    /// Local dialect pitch attribute with an explicit sign, e.g. `+2st` / `-2st`.
    pub fn pitch_attr(&self) -> String {
        if self.pitch_semitones >= 0 {
            format!("+{}st", self.pitch_semitones)
        } else {
            format!("{}st", self.pitch_semitones)
        }
    }

    /// Cloud dialect speaking rate factor.
    pub fn speaking_rate(&self) -> f64 {
        1.0 + f64::from(self.rate_percent) / 100.0
    }
}
