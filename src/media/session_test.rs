use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use media_bus::{ContainerKind, OutputFormat};

use super::{output_path_for, Outcome, Session, SessionState};
use crate::error::TranscodeError;
use crate::media::cancel::CancelController;
use crate::media::fake::{h264_aac_mp4, FakeBackend, FakeMedia, FakeOptions, FakeTrack};
use crate::media::inspector::inspect;
use crate::media::types::{
    AudioCodecKey, Bitrate, FormatKey, Resolution, TranscodeSettings, VideoCodecKey,
};

type Seen = Arc<Mutex<Vec<u8>>>;

async fn convert(
    backend: &FakeBackend,
    file: &Path,
    settings: TranscodeSettings,
    cancel: CancelController,
) -> (Outcome, Vec<u8>) {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    let session = Session::new(file.to_path_buf(), settings, cancel);
    assert_eq!(session.state(), SessionState::Ready);
    let outcome = session
        .run(backend.clone().shared(), move |p| sink.lock().unwrap().push(p))
        .await;
    let seen = seen.lock().unwrap().clone();
    (outcome, seen)
}

fn write_output(dir: &Path, outcome: Outcome) -> anyhow::Result<PathBuf> {
    let Outcome::Completed(output) = outcome else {
        anyhow::bail!("expected completion, got {:?}", outcome);
    };
    let path = dir.join(format!("out.{}", output.extension()));
    std::fs::write(&path, &output.data)?;
    Ok(path)
}

fn vp9_opus_webm(frames: usize) -> FakeMedia {
    let mut media = FakeMedia {
        duration: Some(frames as f64 / 30.0),
        ..FakeMedia::default()
    };
    let mut video = FakeTrack::video(1, "vp09.00.10.08", 1920, 1080);
    video.frame_rate = Some(30.0);
    media.tracks.push(video);
    media.tracks.push(FakeTrack::audio(2, "opus", 48_000, 2));
    media.push_chunks(1, frames, 33_333, 1_000, 30);
    media.push_chunks(2, frames * 33_333 / 20_000, 20_000, 100, 1);
    media.interleave();
    media
}

#[test]
fn test_state_transitions() {
    use SessionState::*;
    assert!(Idle.can_transition(Inspecting));
    assert!(Inspecting.can_transition(Ready));
    assert!(Ready.can_transition(Running));
    assert!(Idle.can_transition(Running));
    assert!(Running.can_transition(Cancelled));
    assert!(Failed.can_transition(Ready));
    assert!(!Running.can_transition(Inspecting));
    assert!(!Completed.can_transition(Cancelled));
    assert!(!Ready.can_transition(Completed));
}

#[test]
fn test_default_output_path() {
    assert_eq!(
        output_path_for(Path::new("/videos/holiday.mov"), "mp4"),
        PathBuf::from("/videos/holiday_transcoded.mp4")
    );
}

#[tokio::test]
async fn test_scenario_a_passthrough_everything() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.mp4");
    let media = h264_aac_mp4();
    media.write(&input, ContainerKind::Mp4);

    let backend = FakeBackend::new();
    let (outcome, progress) =
        convert(&backend, &input, TranscodeSettings::default(), CancelController::new()).await;
    let output = write_output(dir.path(), outcome)?;

    {
        let log = backend.log();
        assert!(log.decoders.is_empty());
        assert!(log.encoders.is_empty());
        assert_eq!(log.format, Some(OutputFormat::Mp4));
        let written: usize = log.written.iter().map(|(_, c)| c.size()).sum();
        let source: usize = media.chunks.iter().map(|c| c.size).sum();
        assert_eq!(written, source);
    }

    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] < w[1]));

    let before = inspect(&backend, &input)?;
    let after = inspect(&backend, &output)?;
    assert_eq!(after.container(), ContainerKind::Mp4);
    let (video, source_video) = (
        after.video().context("output lost its video")?,
        before.video().context("source has no video")?,
    );
    assert_eq!(video.codec(), source_video.codec());
    assert_eq!((video.width(), video.height()), (1920, 1080));
    assert_eq!(
        after.audio().context("output lost its audio")?.codec(),
        before.audio().context("source has no audio")?.codec()
    );
    assert!((after.duration() - before.duration()).abs() <= 1.0 / 30.0);
    Ok(())
}

#[tokio::test]
async fn test_scenario_b_vp9_to_h264_sd() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.webm");
    vp9_opus_webm(60).write(&input, ContainerKind::WebM);

    let backend = FakeBackend::new();
    let settings = TranscodeSettings {
        format: FormatKey::Mp4,
        video_codec: VideoCodecKey::H264,
        audio_codec: AudioCodecKey::Opus,
        video_bitrate: Bitrate::Bps(2_000_000),
        resolution: Resolution::Sd,
        ..TranscodeSettings::default()
    };
    let (outcome, progress) = convert(&backend, &input, settings, CancelController::new()).await;
    let output = write_output(dir.path(), outcome)?;

    {
        let log = backend.log();
        assert_eq!(log.decoders, vec!["vp09.00.10.08"]);
        assert_eq!(log.encoders.len(), 1);
        assert_eq!(log.encoders[0].bitrate, 2_000_000);
    }
    assert_eq!(progress.last(), Some(&100));

    let info = inspect(&backend, &output)?;
    let video = info.video().context("output has no video")?;
    assert_eq!(video.codec(), "avc1.640028");
    assert_eq!((video.width(), video.height()), (864, 512));
    assert_eq!(info.audio().context("output has no audio")?.codec(), "opus");
    Ok(())
}

#[tokio::test]
async fn test_scenario_c_audio_only_opus() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.mp4");
    h264_aac_mp4().write(&input, ContainerKind::Mp4);

    let backend = FakeBackend::new();
    let settings = TranscodeSettings {
        audio_only: true,
        audio_codec: AudioCodecKey::Opus,
        ..TranscodeSettings::default()
    };
    let (outcome, progress) = convert(&backend, &input, settings, CancelController::new()).await;
    let Outcome::Completed(output) = &outcome else {
        anyhow::bail!("expected completion, got {:?}", outcome);
    };
    assert_eq!(output.extension(), "webm");
    assert_eq!(output.mime_type(), "audio/webm");
    assert_eq!(progress, vec![100]);

    let path = write_output(dir.path(), outcome)?;
    let info = inspect(&backend, &path)?;
    assert!(info.video().is_none());
    let audio = info.audio().context("output has no audio")?;
    assert_eq!(audio.codec(), "opus");
    assert_eq!((audio.sample_rate(), audio.channels()), (48_000, 2));
    Ok(())
}

#[tokio::test]
async fn test_scenario_d_cancel_mid_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.mp4");
    h264_aac_mp4().write(&input, ContainerKind::Mp4);

    let backend = FakeBackend::with_options(FakeOptions {
        decode_delay: Duration::from_millis(5),
        ..FakeOptions::default()
    });
    let settings = TranscodeSettings {
        video_bitrate: Bitrate::Bps(1_000_000),
        ..TranscodeSettings::default()
    };
    let cancel = CancelController::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let session = Session::new(input.clone(), settings.clone(), cancel.clone());
    let run = tokio::spawn(session.run(backend.clone().shared(), move |p| {
        let _ = tx.send(p);
    }));

    assert!(rx.recv().await.is_some());
    cancel.cancel();
    let outcome = run.await?;
    assert!(matches!(outcome, Outcome::Cancelled));
    let written_at_cancel = backend.log().written.len();
    assert!(written_at_cancel < 300 + 469);

    // A fresh run on the same file completes.
    let (outcome, _) = convert(&FakeBackend::new(), &input, settings, CancelController::new()).await;
    assert!(matches!(outcome, Outcome::Completed(_)));
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_start_reports_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.mp4");
    h264_aac_mp4().write(&input, ContainerKind::Mp4);

    let backend = FakeBackend::new();
    let cancel = CancelController::new();
    cancel.cancel();
    let (outcome, progress) =
        convert(&backend, &input, TranscodeSettings::default(), cancel).await;
    assert!(matches!(outcome, Outcome::Cancelled));
    assert!(progress.is_empty());
    assert!(backend.log().written.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_encoder_failure_fails_the_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.mp4");
    h264_aac_mp4().write(&input, ContainerKind::Mp4);

    let backend = FakeBackend::with_options(FakeOptions {
        fail_encode_after: Some(5),
        ..FakeOptions::default()
    });
    let settings = TranscodeSettings {
        video_bitrate: Bitrate::Bps(1_000_000),
        ..TranscodeSettings::default()
    };
    let (outcome, progress) = convert(&backend, &input, settings, CancelController::new()).await;
    assert!(matches!(outcome, Outcome::Failed(TranscodeError::Transcode(_))));
    assert!(!progress.contains(&100));
    Ok(())
}

#[tokio::test]
async fn test_rejected_tags_fail_with_muxer_config() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.mp4");
    h264_aac_mp4().write(&input, ContainerKind::Mp4);

    let backend = FakeBackend::with_options(FakeOptions {
        reject_mux_codecs: vec!["avc1.64001F".to_string(), "avc1".to_string()],
        ..FakeOptions::default()
    });
    let (outcome, _) =
        convert(&backend, &input, TranscodeSettings::default(), CancelController::new()).await;
    assert!(matches!(outcome, Outcome::Failed(TranscodeError::MuxerConfig(_))));
    Ok(())
}

#[tokio::test]
async fn test_unreadable_input_is_parse_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("notes.txt");
    std::fs::write(&input, b"plain text")?;
    let (outcome, _) = convert(
        &FakeBackend::new(),
        &input,
        TranscodeSettings::default(),
        CancelController::new(),
    )
    .await;
    assert!(matches!(outcome, Outcome::Failed(TranscodeError::Parse(_))));
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_encoder_output_is_written_in_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.mp4");
    h264_aac_mp4().write(&input, ContainerKind::Mp4);

    let backend = FakeBackend::with_options(FakeOptions {
        swap_output_pairs: true,
        ..FakeOptions::default()
    });
    let settings = TranscodeSettings {
        video_bitrate: Bitrate::Bps(1_000_000),
        ..TranscodeSettings::default()
    };
    let (outcome, _) = convert(&backend, &input, settings, CancelController::new()).await;
    assert!(matches!(outcome, Outcome::Completed(_)));

    let log = backend.log();
    for track in 0..2 {
        let times: Vec<i64> = log
            .written
            .iter()
            .filter(|(t, _)| *t == track)
            .map(|(_, c)| c.timestamp)
            .collect();
        assert!(!times.is_empty());
        assert!(times.windows(2).all(|w| w[0] < w[1]), "track {}: {:?}", track, times);
    }
    Ok(())
}
