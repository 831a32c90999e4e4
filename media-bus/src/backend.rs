//! Seams between the orchestrator and the codec/container implementation.
//!
//! All calls are blocking. Callers run them on blocking threads and never
//! interrupt a call in progress; a call always returns before its codec
//! instance is dropped.

use std::path::Path;

use bytes::Bytes;

use crate::container::{ContainerKind, OutputFormat};
use crate::error::Result;
use crate::frame::{Frame, FrameFormat};
use crate::packet::{Chunk, TrackId};
use crate::stream::{TrackInfo, TrackLayout};

#[derive(Clone, Debug, PartialEq)]
pub struct DecoderConfig {
    pub codec: String,
    pub layout: TrackLayout,
    pub description: Option<Bytes>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EncoderConfig {
    pub codec: String,
    /// Bits per second.
    pub bitrate: u64,
    /// Shape of the frames that will be submitted.
    pub input: FrameFormat,
    /// Shape of the encoded track; the encoder converts as needed.
    pub output: TrackLayout,
    pub frame_rate: Option<f64>,
}

/// Parameters of one track in the output container.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputTrack {
    pub codec: String,
    pub layout: TrackLayout,
    pub decoder_config: Option<Bytes>,
    pub frame_rate: Option<f64>,
}

pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Fails when the underlying libraries cannot be used at all.
    fn check_available(&self) -> Result<()>;

    fn open(&self, path: &Path, kind: ContainerKind) -> Result<Box<dyn Demuxer>>;

    fn create_decoder(&self, config: &DecoderConfig) -> Result<Box<dyn Decoder>>;

    fn create_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn Encoder>>;

    fn create_muxer(&self, format: OutputFormat) -> Result<Box<dyn Muxer>>;
}

pub trait Demuxer: Send {
    fn tracks(&self) -> &[TrackInfo];

    /// Container-declared duration in seconds.
    fn duration(&self) -> Option<f64>;

    /// Next chunk in file order, `None` at end of input.
    fn read_chunk(&mut self) -> Result<Option<(TrackId, Chunk)>>;
}

pub trait Decoder: Send {
    fn decode(&mut self, chunk: &Chunk) -> Result<()>;

    /// Signal end of input so buffered frames are released.
    fn flush(&mut self) -> Result<()>;

    /// `None` when more input (or a flush) is needed.
    fn receive_frame(&mut self) -> Result<Option<Frame>>;
}

pub trait Encoder: Send {
    fn output_track(&self) -> OutputTrack;

    /// Encode `frame` at the given output time. The same frame may be
    /// submitted more than once at different times.
    fn encode(&mut self, frame: &Frame, timestamp: i64, duration: i64) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn receive_chunk(&mut self) -> Result<Option<Chunk>>;
}

pub trait Muxer: Send {
    fn add_track(&mut self, track: &OutputTrack) -> Result<usize>;

    /// Validates the track set and writes the container header. A rejected
    /// codec tag is reported as `BusError::Unsupported`.
    fn start(&mut self) -> Result<()>;

    fn write_chunk(&mut self, track: usize, chunk: &Chunk) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}
