use bytes::Bytes;

use crate::codec::{CodecFamily, MediaKind};
use crate::packet::TrackId;

/// Geometry of a video track or channel layout of an audio track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackLayout {
    Video { width: u32, height: u32 },
    Audio { sample_rate: u32, channels: u16 },
}

impl TrackLayout {
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackLayout::Video { .. } => MediaKind::Video,
            TrackLayout::Audio { .. } => MediaKind::Audio,
        }
    }
}

/// A track as enumerated by a demuxer.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackInfo {
    pub id: TrackId,
    /// Codec string as the container records it, e.g. `avc1.64001F`.
    pub codec: String,
    pub layout: TrackLayout,
    /// Declared frame rate (video only).
    pub frame_rate: Option<f64>,
    /// Total number of chunks, 0 when the container does not say.
    pub sample_count: u64,
    /// Container-recorded average bitrate.
    pub bitrate: Option<u64>,
    pub decoder_config: Option<Bytes>,
}

impl TrackInfo {
    pub fn kind(&self) -> MediaKind {
        self.layout.kind()
    }

    pub fn is_video(&self) -> bool {
        self.kind() == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == MediaKind::Audio
    }

    pub fn family(&self) -> CodecFamily {
        CodecFamily::parse(&self.codec)
    }

    pub fn width(&self) -> u32 {
        match self.layout {
            TrackLayout::Video { width, .. } => width,
            TrackLayout::Audio { .. } => 0,
        }
    }

    pub fn height(&self) -> u32 {
        match self.layout {
            TrackLayout::Video { height, .. } => height,
            TrackLayout::Audio { .. } => 0,
        }
    }
}
