use clap::{Parser, Subcommand, ValueEnum};
use speechcraft::prosody::{EmphasisLevel, ProsodySettings, VolumeLevel};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "speechcraft", about = "Multi-voice text-to-speech from tagged text")]
pub struct Args {
    #[clap(long, value_enum, default_value_t = Provider::Local, global = true)]
    pub provider: Provider,

    #[clap(long, env = "SPEECHCRAFT_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    #[clap(long, env = "SPEECHCRAFT_ENGINE", default_value = "espeak-ng", global = true)]
    pub engine: String,

    /// Command used to play cloud audio.
    #[clap(long, env = "SPEECHCRAFT_PLAYER", default_value = "aplay", global = true)]
    pub player: String,

    /// Voice to start with.
    #[clap(long, global = true)]
    pub voice: Option<String>,

    /// Comma-separated voice list for the local engine.
    #[clap(long, value_delimiter = ',', global = true)]
    pub voices: Vec<String>,

    /// Timeline length in seconds.
    #[clap(long, default_value_t = 10.0, global = true)]
    pub duration: f64,

    #[clap(long, conflicts_with = "file", global = true)]
    pub text: Option<String>,

    #[clap(long, global = true)]
    pub file: Option<PathBuf>,

    #[clap(flatten)]
    pub prosody: ProsodyArgs,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Local,
    Cloud,
}

#[derive(clap::Args, Debug)]
pub struct ProsodyArgs {
    /// Rate change in percent.
    #[clap(long, default_value_t = 0, allow_hyphen_values = true, global = true,
           value_parser = clap::value_parser!(i32).range(-100..=100))]
    pub rate: i32,

    /// Pitch change in semitones.
    #[clap(long, default_value_t = 0, allow_hyphen_values = true, global = true,
           value_parser = clap::value_parser!(i32).range(-20..=20))]
    pub pitch: i32,

    #[clap(long, default_value = "medium", global = true)]
    pub volume: VolumeLevel,

    #[clap(long, default_value = "none", global = true)]
    pub emphasis: EmphasisLevel,

    /// Pause after each segment, in milliseconds.
    #[clap(long, default_value_t = 0, global = true)]
    pub break_ms: u32,

    /// Use plain engine parameters instead of markup.
    #[clap(long, global = true)]
    pub plain: bool,
}

impl ProsodyArgs {
    pub fn settings(&self) -> ProsodySettings {
        ProsodySettings {
            rate_percent: self.rate,
            pitch_semitones: self.pitch,
            volume: self.volume,
            emphasis: self.emphasis,
            break_ms: self.break_ms,
            use_markup: !self.plain,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the provider's voices.
    Voices,
    /// Show the voice runs found in the text and the split-tagged result.
    Tags {
        #[clap(long)]
        json: bool,
    },
    /// Show the markers and segments derived from the text.
    Segments {
        #[clap(long)]
        json: bool,
    },
    /// Print the markup preview document.
    Ssml,
    /// Speak every segment with its own voice. Ctrl-C stops.
    Speak {
        /// Speak only the segment at this index.
        #[clap(long)]
        segment: Option<usize>,
    },
    /// Save all segments into one file.
    Save {
        #[clap(long)]
        out: PathBuf,
        /// Save the whole text with the current voice.
        #[clap(long)]
        single: bool,
    },
    /// Save each chunk to its own numbered file.
    SaveSplit {
        #[clap(long)]
        out: PathBuf,
    },
    /// Speak a short test sentence with the current voice.
    TestVoice,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prosody_flags_are_bounded() {
        let args = Args::try_parse_from(["speechcraft", "--rate", "-40", "--pitch", "3", "ssml"]).unwrap();
        let settings = args.prosody.settings();
        assert_eq!(settings.rate_percent, -40);
        assert_eq!(settings.pitch_semitones, 3);

        assert!(Args::try_parse_from(["speechcraft", "--rate", "2147483647", "ssml"]).is_err());
        assert!(Args::try_parse_from(["speechcraft", "--pitch", "-50", "ssml"]).is_err());
    }

    #[test]
    fn levels_parse_from_markup_names() {
        let args =
            Args::try_parse_from(["speechcraft", "--volume", "x-loud", "--emphasis", "strong", "--plain", "voices"])
                .unwrap();
        let settings = args.prosody.settings();
        assert_eq!(settings.volume, VolumeLevel::XLoud);
        assert_eq!(settings.emphasis, EmphasisLevel::Strong);
        assert!(!settings.use_markup);
    }
}
