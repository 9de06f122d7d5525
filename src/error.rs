use std::io;

/// Error type for a single backend synthesis call.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("synthesis cancelled")]
    Cancelled,
    #[error("engine failed: {0}")]
    Engine(String),
    #[error("api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Error type for orchestrated runs and exports.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("another run is already in progress")]
    Busy,
    #[error("no segments to process")]
    NoSegments,
    #[error("tts error: {0}")]
    Tts(#[from] TtsError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("conversion failed: {0}")]
    Convert(String),
}

pub type Result<T> = std::result::Result<T, SpeechError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TtsError::Api {
            status: 403,
            body: "forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "api returned 403: forbidden");

        let err = SpeechError::from(TtsError::Cancelled);
        assert!(err.to_string().contains("cancelled"));
        assert_eq!(SpeechError::Busy.to_string(), "another run is already in progress");
    }
}
