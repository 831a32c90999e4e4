use media_bus::ContainerKind;

use super::{estimate_output_size, estimated_size, fit_resolution, Preset};
use crate::media::types::{
    AudioStreamInfo, Bitrate, FrameRateTarget, MediaInfo, Resolution, TranscodeSettings,
    VideoStreamInfo,
};

fn info(width: u32, height: u32, bitrate: u64, fps: f64) -> MediaInfo {
    MediaInfo {
        container: ContainerKind::Mp4,
        mime_type: "video/mp4".to_string(),
        duration: 10.0,
        file_size: 0,
        video: Some(VideoStreamInfo {
            codec: "avc1.64001F".to_string(),
            width,
            height,
            bitrate,
            fps,
        }),
        audio: Some(AudioStreamInfo {
            codec: "mp4a.40.2".to_string(),
            bitrate: 128_000,
            channels: 2,
            sample_rate: 48_000,
        }),
    }
}

#[test]
fn test_low_preset() {
    let mut settings = TranscodeSettings::default();
    Preset::Low.apply(&info(1920, 1080, 8_000_000, 30.0), &mut settings);
    assert_eq!(settings.video_bitrate, Bitrate::Bps(2_000_000));
    assert_eq!(settings.fps, FrameRateTarget::Fps(15.0));
    assert_eq!(settings.resolution, Resolution::Sd);
}

#[test]
fn test_medium_preset_keeps_slow_sources() {
    let mut settings = TranscodeSettings::default();
    Preset::Medium.apply(&info(1920, 1080, 2_000_000, 25.0), &mut settings);
    assert_eq!(settings.video_bitrate, Bitrate::Bps(3_000_000));
    assert_eq!(settings.fps, FrameRateTarget::Keep);
    assert_eq!(settings.resolution, Resolution::Hd);
}

#[test]
fn test_high_preset_never_upscales() {
    let mut settings = TranscodeSettings::default();
    Preset::High.apply(&info(1280, 720, 9_000_000, 60.0), &mut settings);
    assert_eq!(settings.video_bitrate, Bitrate::Bps(9_000_000));
    assert_eq!(settings.fps, FrameRateTarget::Keep);
    assert_eq!(settings.resolution, Resolution::Hd);
}

#[test]
fn test_fit_resolution() {
    assert_eq!(fit_resolution(Resolution::Fhd, 3840), Resolution::Fhd);
    assert_eq!(fit_resolution(Resolution::Fhd, 1000), Resolution::Sd);
    assert_eq!(fit_resolution(Resolution::Sd, 640), Resolution::Keep);
    assert_eq!(fit_resolution(Resolution::Keep, 1920), Resolution::Keep);
}

#[test]
fn test_size_estimate() {
    assert_eq!(estimate_output_size(2_000_000, 128_000, 10.0), 2_660_000);

    let info = info(1920, 1080, 4_000_000, 30.0);
    let settings = TranscodeSettings {
        video_bitrate: Bitrate::Bps(1_000_000),
        ..TranscodeSettings::default()
    };
    assert_eq!(estimated_size(&info, &settings), 1_410_000);

    let audio_only = TranscodeSettings {
        audio_only: true,
        ..TranscodeSettings::default()
    };
    assert_eq!(estimated_size(&info, &audio_only), 160_000);
}
