use media_bus::BusError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    /// The source could not be inspected. The worker stays usable.
    #[error("cannot read media: {0}")]
    Parse(String),

    /// Neither the requested nor the fallback codec configuration was accepted.
    #[error("unsupported codec configuration: {0}")]
    ConfigUnsupported(String),

    /// The container writer rejected the track set, canonical tags included.
    #[error("output container rejected the tracks: {0}")]
    MuxerConfig(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("cancelled")]
    Cancel,

    #[error("media libraries unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn is_cancel(&self) -> bool {
        matches!(self, TranscodeError::Cancel)
    }
}

impl From<BusError> for TranscodeError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Malformed(msg) => TranscodeError::Parse(msg),
            BusError::Unsupported(msg) => TranscodeError::ConfigUnsupported(msg),
            BusError::Unavailable(msg) => TranscodeError::Unavailable(msg),
            BusError::Io(e) => TranscodeError::Io(e),
            other => TranscodeError::Transcode(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for TranscodeError {
    fn from(err: tokio::task::JoinError) -> Self {
        TranscodeError::Transcode(format!("stage task failed: {}", err))
    }
}
