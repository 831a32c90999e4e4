//! Codec and container primitives behind a small set of traits.
//!
//! The orchestration layer only sees [`backend::MediaBackend`] and the plain
//! data types in this crate. The FFmpeg implementation is compiled with the
//! `ffmpeg` feature.

pub mod backend;
pub mod codec;
pub mod container;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod packet;
pub mod stream;

pub use backend::{
    Decoder, DecoderConfig, Demuxer, Encoder, EncoderConfig, MediaBackend, Muxer, OutputTrack,
};
pub use codec::{CodecFamily, MediaKind};
pub use container::{ContainerKind, OutputFormat, SNIFF_HEADER_LEN};
pub use error::{BusError, Result};
pub use frame::{Frame, FrameFormat};
pub use packet::{Chunk, ChunkType, TrackId};
pub use stream::{TrackInfo, TrackLayout};

