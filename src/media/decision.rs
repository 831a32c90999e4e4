//! Per-track choice between copying encoded data and re-encoding it.

use media_bus::{CodecFamily, TrackInfo};

use crate::media::types::{Bitrate, FrameRateTarget, Resolution, TrackMode, TranscodeSettings};

/// Source and target families whose bitstreams may be copied verbatim.
/// Families missing here always re-encode.
const PASSTHROUGH_TABLE: &[(CodecFamily, CodecFamily)] = &[
    (CodecFamily::H264, CodecFamily::H264),
    (CodecFamily::H265, CodecFamily::H265),
    (CodecFamily::Av1, CodecFamily::Av1),
    (CodecFamily::Aac, CodecFamily::Aac),
    (CodecFamily::Opus, CodecFamily::Opus),
];

/// Frame rates closer than this to the source are treated as equal.
pub const FPS_TOLERANCE: f64 = 1.0;

pub fn is_compatible(source: CodecFamily, target: CodecFamily) -> bool {
    PASSTHROUGH_TABLE
        .iter()
        .any(|(from, to)| *from == source && *to == target)
}

pub fn decide(
    source_codec: &str,
    target: CodecFamily,
    bitrate: Bitrate,
    resolution_override: bool,
    fps_override: bool,
) -> TrackMode {
    let source = CodecFamily::parse(source_codec);
    if bitrate.is_keep() && is_compatible(source, target) && !resolution_override && !fps_override
    {
        TrackMode::Passthrough
    } else {
        TrackMode::Transcode
    }
}

/// True when the bucket would shrink a `width`×`height` picture.
pub fn resolution_active(resolution: Resolution, width: u32, height: u32) -> bool {
    match resolution.long_edge() {
        Some(edge) => edge < width.max(height),
        None => false,
    }
}

/// The rate the encoder must produce, or `None` to keep the source timing.
pub fn retarget_fps(target: FrameRateTarget, source_fps: f64) -> Option<f64> {
    match target {
        FrameRateTarget::Keep => None,
        FrameRateTarget::Fps(fps) if source_fps > 0.0 && (fps - source_fps).abs() <= FPS_TOLERANCE => {
            None
        }
        FrameRateTarget::Fps(fps) => Some(fps),
    }
}

/// Mode for one source track under the given settings. Audio tracks never
/// carry resolution or frame rate overrides.
pub fn decide_track(track: &TrackInfo, source_fps: f64, settings: &TranscodeSettings) -> TrackMode {
    if track.is_video() {
        decide(
            &track.codec,
            settings.video_codec.family(),
            settings.video_bitrate,
            resolution_active(settings.resolution, track.width(), track.height()),
            retarget_fps(settings.fps, source_fps).is_some(),
        )
    } else {
        decide(
            &track.codec,
            settings.audio_codec.family(),
            settings.audio_bitrate,
            false,
            false,
        )
    }
}

#[cfg(test)]
#[path = "decision_test.rs"]
mod decision_test;
