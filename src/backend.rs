use std::path::Path;
use std::sync::Arc;

use media_bus::{
    BusError, ContainerKind, Decoder, DecoderConfig, Demuxer, Encoder, EncoderConfig,
    MediaBackend, Muxer, OutputFormat,
};

/// The backend compiled into this build.
pub fn default_backend() -> Arc<dyn MediaBackend> {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(media_bus::ffmpeg::FfmpegBackend::new())
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Arc::new(UnavailableBackend)
    }
}

/// Stands in when no codec library was compiled in. Every call fails.
pub struct UnavailableBackend;

fn unavailable<T>() -> media_bus::Result<T> {
    Err(BusError::Unavailable(
        "built without the `ffmpeg` feature".to_string(),
    ))
}

impl MediaBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "none"
    }

    fn check_available(&self) -> media_bus::Result<()> {
        unavailable()
    }

    fn open(&self, _path: &Path, _kind: ContainerKind) -> media_bus::Result<Box<dyn Demuxer>> {
        unavailable()
    }

    fn create_decoder(&self, _config: &DecoderConfig) -> media_bus::Result<Box<dyn Decoder>> {
        unavailable()
    }

    fn create_encoder(&self, _config: &EncoderConfig) -> media_bus::Result<Box<dyn Encoder>> {
        unavailable()
    }

    fn create_muxer(&self, _format: OutputFormat) -> media_bus::Result<Box<dyn Muxer>> {
        unavailable()
    }
}
