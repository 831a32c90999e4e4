//! Quality presets that fill in bitrate, frame rate and resolution from
//! what the inspector found.

use serde::{Deserialize, Serialize};

use crate::media::types::{Bitrate, FrameRateTarget, MediaInfo, Resolution, TranscodeSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Low,
    Medium,
    High,
}

struct PresetRule {
    min_bitrate: u64,
    /// Source bitrate is divided by this.
    divisor: u64,
    fps_cap: f64,
    resolution: Resolution,
}

impl Preset {
    fn rule(&self) -> PresetRule {
        match self {
            Preset::Low => PresetRule {
                min_bitrate: 1_000_000,
                divisor: 4,
                fps_cap: 15.0,
                resolution: Resolution::Sd,
            },
            Preset::Medium => PresetRule {
                min_bitrate: 3_000_000,
                divisor: 2,
                fps_cap: 30.0,
                resolution: Resolution::Hd,
            },
            Preset::High => PresetRule {
                min_bitrate: 6_000_000,
                divisor: 1,
                fps_cap: 60.0,
                resolution: Resolution::Fhd,
            },
        }
    }

    /// Overwrites the video bitrate, frame rate and resolution of
    /// `settings`. Files without video are left alone.
    pub fn apply(&self, info: &MediaInfo, settings: &mut TranscodeSettings) {
        let Some(video) = info.video() else {
            return;
        };
        let rule = self.rule();
        settings.video_bitrate =
            Bitrate::Bps((video.bitrate() / rule.divisor).max(rule.min_bitrate));
        let source_fps = if video.fps() > 0.0 { video.fps() } else { 30.0 };
        settings.fps = if source_fps > rule.fps_cap {
            FrameRateTarget::Fps(rule.fps_cap)
        } else {
            FrameRateTarget::Keep
        };
        settings.resolution =
            fit_resolution(rule.resolution, video.width().max(video.height()));
    }
}

/// `wanted` if the source is at least that large, else the largest bucket
/// that does not upscale.
pub fn fit_resolution(wanted: Resolution, source_long_edge: u32) -> Resolution {
    match wanted.long_edge() {
        Some(edge) if edge <= source_long_edge => wanted,
        Some(_) => Resolution::BUCKETS
            .into_iter()
            .find(|b| b.long_edge().is_some_and(|edge| edge <= source_long_edge))
            .unwrap_or(Resolution::Keep),
        None => Resolution::Keep,
    }
}

/// Expected output size in bytes.
pub fn estimate_output_size(video_bps: u64, audio_bps: u64, duration: f64) -> u64 {
    ((video_bps + audio_bps) as f64 * duration.max(0.0) / 8.0).round() as u64
}

/// Output size for `settings`, with `Keep` bitrates taken from the source.
pub fn estimated_size(info: &MediaInfo, settings: &TranscodeSettings) -> u64 {
    let video = match (settings.audio_only, info.video()) {
        (false, Some(video)) => match settings.video_bitrate {
            Bitrate::Bps(bps) => bps,
            Bitrate::Keep => video.bitrate(),
        },
        _ => 0,
    };
    let audio = match (info.audio(), settings.audio_bitrate) {
        (Some(_), Bitrate::Bps(bps)) => bps,
        (Some(audio), Bitrate::Keep) => audio.bitrate(),
        (None, _) => 0,
    };
    estimate_output_size(video, audio, info.duration())
}

#[cfg(test)]
#[path = "preset_test.rs"]
mod preset_test;
