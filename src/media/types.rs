use media_bus::{CodecFamily, ContainerKind, OutputFormat};
use serde::{Deserialize, Serialize};

use crate::config::config;

// ============================================================================
// Inspection Result
// ============================================================================

/// Video track summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoStreamInfo {
    pub(crate) codec: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
    // bps
    pub(crate) bitrate: u64,
    pub(crate) fps: f64,
}

impl VideoStreamInfo {
    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bitrate(&self) -> u64 {
        self.bitrate
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

/// Audio track summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    pub(crate) codec: String,
    // bps
    pub(crate) bitrate: u64,
    pub(crate) channels: u16,
    pub(crate) sample_rate: u32,
}

impl AudioStreamInfo {
    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn bitrate(&self) -> u64 {
        self.bitrate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// What the inspector learned about a file. Only the inspector builds one;
/// there is no way to change it afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub(crate) container: ContainerKind,
    pub(crate) mime_type: String,
    // seconds
    pub(crate) duration: f64,
    pub(crate) file_size: u64,
    pub(crate) video: Option<VideoStreamInfo>,
    pub(crate) audio: Option<AudioStreamInfo>,
}

impl MediaInfo {
    pub fn container(&self) -> ContainerKind {
        self.container
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn video(&self) -> Option<&VideoStreamInfo> {
        self.video.as_ref()
    }

    pub fn audio(&self) -> Option<&AudioStreamInfo> {
        self.audio.as_ref()
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Target bitrate. On the wire `-1` means keep the source bitrate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Bitrate {
    #[default]
    Keep,
    Bps(u64),
}

impl TryFrom<i64> for Bitrate {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Bitrate::Keep),
            v if v > 0 => Ok(Bitrate::Bps(v as u64)),
            v => Err(format!("invalid bitrate {}, expected -1 or a positive value", v)),
        }
    }
}

impl From<Bitrate> for i64 {
    fn from(value: Bitrate) -> Self {
        match value {
            Bitrate::Keep => -1,
            Bitrate::Bps(bps) => bps as i64,
        }
    }
}

impl Bitrate {
    pub fn is_keep(&self) -> bool {
        matches!(self, Bitrate::Keep)
    }
}

/// Resolution bucket, named by its long edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[serde(rename = "4k")]
    Uhd,
    Fhd,
    Hd,
    Sd,
    #[default]
    Keep,
}

impl Resolution {
    pub const BUCKETS: [Resolution; 4] =
        [Resolution::Uhd, Resolution::Fhd, Resolution::Hd, Resolution::Sd];

    pub fn long_edge(&self) -> Option<u32> {
        match self {
            Resolution::Uhd => Some(3840),
            Resolution::Fhd => Some(1920),
            Resolution::Hd => Some(1280),
            Resolution::Sd => Some(854),
            Resolution::Keep => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum FrameRateWire {
    Number(f64),
    Text(String),
}

/// Requested frame rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameRateWire", into = "FrameRateWire")]
pub enum FrameRateTarget {
    #[default]
    Keep,
    Fps(f64),
}

impl TryFrom<FrameRateWire> for FrameRateTarget {
    type Error = String;

    fn try_from(value: FrameRateWire) -> Result<Self, Self::Error> {
        let fps = match value {
            FrameRateWire::Number(fps) => fps,
            FrameRateWire::Text(text) if text.trim().eq_ignore_ascii_case("keep") => {
                return Ok(FrameRateTarget::Keep)
            }
            FrameRateWire::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid frame rate {:?}", text))?,
        };
        if fps.is_finite() && fps > 0.0 {
            Ok(FrameRateTarget::Fps(fps))
        } else {
            Err(format!("invalid frame rate {}", fps))
        }
    }
}

impl From<FrameRateTarget> for FrameRateWire {
    fn from(value: FrameRateTarget) -> Self {
        match value {
            FrameRateTarget::Keep => FrameRateWire::Text("keep".to_string()),
            FrameRateTarget::Fps(fps) => FrameRateWire::Number(fps),
        }
    }
}

impl std::str::FromStr for FrameRateTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FrameRateTarget::try_from(FrameRateWire::Text(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodecKey {
    #[default]
    H264,
    H265,
    Av1,
}

impl VideoCodecKey {
    pub fn family(&self) -> CodecFamily {
        match self {
            VideoCodecKey::H264 => CodecFamily::H264,
            VideoCodecKey::H265 => CodecFamily::H265,
            VideoCodecKey::Av1 => CodecFamily::Av1,
        }
    }

    /// Codec string handed to the encoder first.
    pub fn profile(&self) -> &'static str {
        match self {
            VideoCodecKey::H264 => "avc1.640028",
            VideoCodecKey::H265 => "hvc1.1.6.L93.B0",
            VideoCodecKey::Av1 => "av01.0.04M.08",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodecKey {
    #[default]
    Aac,
    Opus,
}

impl AudioCodecKey {
    pub fn family(&self) -> CodecFamily {
        match self {
            AudioCodecKey::Aac => CodecFamily::Aac,
            AudioCodecKey::Opus => CodecFamily::Opus,
        }
    }

    pub fn profile(&self) -> &'static str {
        match self {
            AudioCodecKey::Aac => "mp4a.40.2",
            AudioCodecKey::Opus => "opus",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKey {
    #[default]
    Mp4,
    Webm,
    Mov,
    Mkv,
}

impl FormatKey {
    pub fn output_format(&self) -> OutputFormat {
        match self {
            FormatKey::Mp4 => OutputFormat::Mp4,
            FormatKey::Webm => OutputFormat::WebM,
            FormatKey::Mov => OutputFormat::QuickTime,
            FormatKey::Mkv => OutputFormat::Matroska,
        }
    }
}

/// User-facing conversion settings, as sent with `start`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscodeSettings {
    pub format: FormatKey,
    pub video_codec: VideoCodecKey,
    pub audio_codec: AudioCodecKey,
    pub video_bitrate: Bitrate,
    pub audio_bitrate: Bitrate,
    pub audio_only: bool,
    pub resolution: Resolution,
    pub fps: FrameRateTarget,
    pub original_video_bitrate: Option<u64>,
    pub original_audio_bitrate: Option<u64>,
}

impl TranscodeSettings {
    /// Bitrate used when the video track is re-encoded.
    pub fn video_target_bitrate(&self) -> u64 {
        resolve_bitrate(
            self.video_bitrate,
            self.original_video_bitrate,
            config().default_video_bitrate,
        )
    }

    /// Bitrate used when the audio track is re-encoded.
    pub fn audio_target_bitrate(&self) -> u64 {
        resolve_bitrate(
            self.audio_bitrate,
            self.original_audio_bitrate,
            config().default_audio_bitrate,
        )
    }
}

fn resolve_bitrate(requested: Bitrate, original: Option<u64>, default: u64) -> u64 {
    match requested {
        Bitrate::Bps(bps) => bps,
        Bitrate::Keep => original.filter(|bps| *bps > 0).unwrap_or(default),
    }
}

/// How a track travels from input to output. Fixed before the run starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackMode {
    Passthrough,
    Transcode,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
