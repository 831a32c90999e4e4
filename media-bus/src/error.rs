use thiserror::Error;

/// Errors reported by codec and container primitives.
#[derive(Error, Debug)]
pub enum BusError {
    /// The primitive refused the configuration it was given (codec string,
    /// profile, codec tag). Callers may retry with a more generic one.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    /// The source could not be parsed as the expected container.
    #[error("malformed container: {0}")]
    Malformed(String),

    /// A decode call failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// An encode call failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Writing the output container failed.
    #[error("mux failed: {0}")]
    Mux(String),

    /// The codec/container libraries are not usable in this process.
    #[error("media primitives unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, BusError::Unsupported(_))
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
