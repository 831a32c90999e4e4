//! FFmpeg implementation of the media primitives.

mod codecs;
mod decoder;
mod encoder;
mod input;
mod output;
mod scaler;

use std::path::Path;
use std::sync::OnceLock;

use ffmpeg_next::Rational;

use crate::backend::{
    Decoder, DecoderConfig, Demuxer, Encoder, EncoderConfig, MediaBackend, Muxer,
};
use crate::container::{ContainerKind, OutputFormat};
use crate::error::{BusError, Result};

pub use decoder::AvDecoder;
pub use encoder::AvEncoder;
pub use input::AvInput;
pub use output::AvOutput;

/// All chunk and frame times crossing the backend boundary are microseconds.
pub(crate) const MICROS: Rational = Rational(1, 1_000_000);

pub(crate) fn ff_error(kind: fn(String) -> BusError, error: ffmpeg_next::Error) -> BusError {
    kind(error.to_string())
}

/// Registers FFmpeg components. Safe to call more than once.
pub fn init() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ffmpeg_next::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(BusError::Unavailable)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn check_available(&self) -> Result<()> {
        init()
    }

    fn open(&self, path: &Path, kind: ContainerKind) -> Result<Box<dyn Demuxer>> {
        init()?;
        log::debug!("opening {} as {}", path.display(), kind);
        Ok(Box::new(AvInput::open(path)?))
    }

    fn create_decoder(&self, config: &DecoderConfig) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(AvDecoder::new(config)?))
    }

    fn create_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn Encoder>> {
        Ok(Box::new(AvEncoder::new(config)?))
    }

    fn create_muxer(&self, format: OutputFormat) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(AvOutput::new(format)?))
    }
}
