//! Multi-voice text-to-speech: tagged text becomes timed, voiced segments that
//! are spoken or saved through a local engine or a cloud service.

pub mod audio;
pub mod backend;
pub mod cloud;
pub mod error;
pub mod local;
pub mod prosody;
pub mod segment;
pub mod session;
pub mod ssml;
pub mod tags;
pub mod timeline;


pub use backend::{Output, TtsBackend};
pub use cloud::{CloudBackend, CloudConfig};
pub use error::{Result, SpeechError, TtsError};
pub use local::{LocalBackend, LocalConfig};
pub use prosody::{EmphasisLevel, ProsodySettings, VolumeLevel};
pub use segment::{MarkerId, Segment, TimeMarker};
pub use session::{AbortReason, RunReport, RunState, Session};
pub use ssml::Dialect;
pub use tags::VoiceSegment;
pub use timeline::Timeline;
