use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use media_bus::ContainerKind;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{Request, Response, Worker};
use crate::media::fake::{h264_aac_mp4, FakeBackend, FakeOptions};
use crate::media::types::{Bitrate, FrameRateTarget, Resolution, TranscodeSettings};

async fn next(events: &mut UnboundedReceiverStream<Response>) -> anyhow::Result<Response> {
    tokio::time::timeout(Duration::from_secs(20), events.next())
        .await
        .context("worker went quiet")?
        .context("worker stream ended")
}

async fn quiet(events: &mut UnboundedReceiverStream<Response>) -> bool {
    tokio::time::timeout(Duration::from_millis(200), events.next())
        .await
        .is_err()
}

/// Collects responses up to and including the terminal one.
async fn until_terminal(
    events: &mut UnboundedReceiverStream<Response>,
) -> anyhow::Result<Vec<Response>> {
    let mut seen = Vec::new();
    loop {
        let response = next(events).await?;
        let done = response.is_terminal();
        seen.push(response);
        if done {
            return Ok(seen);
        }
    }
}

fn fixture(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("input.mp4");
    h264_aac_mp4().write(&path, ContainerKind::Mp4);
    path
}

fn slow_backend() -> FakeBackend {
    FakeBackend::with_options(FakeOptions {
        decode_delay: Duration::from_millis(5),
        ..FakeOptions::default()
    })
}

fn transcode_settings() -> TranscodeSettings {
    TranscodeSettings {
        video_bitrate: Bitrate::Bps(1_000_000),
        ..TranscodeSettings::default()
    }
}

#[test]
fn test_request_wire_format() -> anyhow::Result<()> {
    let start: Request = serde_json::from_str(
        r#"{"type":"start","file":"clip.mov","settings":{"format":"webm","videoCodec":"av1","videoBitrate":-1,"audioBitrate":96000,"resolution":"4k","fps":"30","audioOnly":false}}"#,
    )?;
    let Request::Start { file, settings } = start else {
        panic!("not a start request");
    };
    assert_eq!(file, Path::new("clip.mov"));
    assert_eq!(settings.video_bitrate, Bitrate::Keep);
    assert_eq!(settings.audio_bitrate, Bitrate::Bps(96_000));
    assert_eq!(settings.resolution, Resolution::Uhd);
    assert_eq!(settings.fps, FrameRateTarget::Fps(30.0));

    let cancel: Request = serde_json::from_str(r#"{"type":"cancel"}"#)?;
    assert_eq!(cancel, Request::Cancel);
    assert!(serde_json::from_str::<Request>(r#"{"type":"pause"}"#).is_err());
    Ok(())
}

#[test]
fn test_response_wire_format() -> anyhow::Result<()> {
    let progress = serde_json::to_value(Response::Progress { percent: 42 })?;
    assert_eq!(progress, serde_json::json!({"type": "progress", "percent": 42}));

    let cancelled = serde_json::to_value(Response::Cancelled)?;
    assert_eq!(cancelled, serde_json::json!({"type": "cancelled"}));

    let complete = serde_json::to_value(Response::Complete(super::CompletedOutput {
        output: bytes::Bytes::from_static(b"data"),
        source: "in.mp4".into(),
        extension: "mp4".into(),
        mime_type: "video/mp4".into(),
        size: 4,
        path: None,
    }))?;
    assert_eq!(
        complete,
        serde_json::json!({"type": "complete", "extension": "mp4", "mimeType": "video/mp4", "size": 4})
    );
    Ok(())
}

#[tokio::test]
async fn test_inspect_then_error_keeps_worker_usable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = fixture(dir.path());
    let broken = dir.path().join("broken.txt");
    std::fs::write(&broken, b"not media")?;

    let (worker, mut events) = Worker::spawn(FakeBackend::new().shared());
    worker.send(Request::Inspect { file: broken }).await?;
    assert!(matches!(next(&mut events).await?, Response::Error { .. }));

    worker.send(Request::Inspect { file: input }).await?;
    let Response::AnalysisResult(info) = next(&mut events).await? else {
        panic!("expected analysis result");
    };
    assert_eq!(info.video().context("no video stream")?.width(), 1920);

    let json = serde_json::to_value(Response::AnalysisResult(info))?;
    assert_eq!(json["type"], "analysis_result");
    assert_eq!(json["mimeType"], "video/mp4");
    assert_eq!(json["audio"]["sampleRate"], 48_000);
    Ok(())
}

#[tokio::test]
async fn test_start_reports_progress_then_complete() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = fixture(dir.path());

    let (worker, mut events) = Worker::spawn(FakeBackend::new().shared());
    worker
        .send(Request::Start {
            file: input,
            settings: TranscodeSettings::default(),
        })
        .await?;
    let seen = until_terminal(&mut events).await?;

    let percents: Vec<u8> = seen
        .iter()
        .filter_map(|r| match r {
            Response::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(percents.last(), Some(&100));

    let Some(Response::Complete(done)) = seen.last() else {
        panic!("expected complete, got {:?}", seen.last());
    };
    assert_eq!(done.extension, "mp4");
    assert_eq!(done.mime_type, "video/mp4");
    assert_eq!(done.size, done.output.len() as u64);
    assert!(quiet(&mut events).await);
    Ok(())
}

#[tokio::test]
async fn test_start_while_running_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = fixture(dir.path());

    let (worker, mut events) = Worker::spawn(slow_backend().shared());
    worker
        .send(Request::Start {
            file: input.clone(),
            settings: transcode_settings(),
        })
        .await?;
    worker
        .send(Request::Start {
            file: input.clone(),
            settings: transcode_settings(),
        })
        .await?;
    worker.send(Request::Inspect { file: input }).await?;

    let seen = until_terminal(&mut events).await?;
    assert!(matches!(seen.last(), Some(Response::Error { .. })));
    let seen = until_terminal(&mut events).await?;
    assert!(matches!(seen.last(), Some(Response::Error { .. })));
    // The first run was not disturbed.
    let seen = until_terminal(&mut events).await?;
    assert!(matches!(seen.last(), Some(Response::Complete(_))));
    Ok(())
}

#[tokio::test]
async fn test_cancel_mid_run_then_clean_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = fixture(dir.path());

    let (worker, mut events) = Worker::spawn(slow_backend().shared());
    worker
        .send(Request::Start {
            file: input.clone(),
            settings: transcode_settings(),
        })
        .await?;
    assert!(matches!(next(&mut events).await?, Response::Progress { .. }));
    worker.send(Request::Cancel).await?;

    let seen = until_terminal(&mut events).await?;
    assert!(matches!(seen.last(), Some(Response::Cancelled)));
    assert!(!seen.iter().any(|r| matches!(r, Response::Complete(_))));
    assert!(quiet(&mut events).await);

    worker
        .send(Request::Start {
            file: input,
            settings: TranscodeSettings::default(),
        })
        .await?;
    let seen = until_terminal(&mut events).await?;
    assert!(matches!(seen.last(), Some(Response::Complete(_))));
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_progress_yields_one_cancelled() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = fixture(dir.path());

    let (worker, mut events) = Worker::spawn(slow_backend().shared());
    worker
        .send(Request::Start {
            file: input,
            settings: transcode_settings(),
        })
        .await?;
    worker.send(Request::Cancel).await?;

    let seen = until_terminal(&mut events).await?;
    assert!(matches!(seen.last(), Some(Response::Cancelled)));
    assert!(quiet(&mut events).await);
    Ok(())
}

#[tokio::test]
async fn test_cancel_when_idle_is_ignored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = fixture(dir.path());

    let (worker, mut events) = Worker::spawn(FakeBackend::new().shared());
    worker.send(Request::Cancel).await?;
    worker.send(Request::Inspect { file: input }).await?;
    assert!(matches!(next(&mut events).await?, Response::AnalysisResult(_)));
    Ok(())
}

#[tokio::test]
async fn test_unavailable_backend_reports_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = fixture(dir.path());

    let backend = FakeBackend::with_options(FakeOptions {
        unavailable: true,
        ..FakeOptions::default()
    });
    let (worker, mut events) = Worker::spawn(backend.shared());
    let Response::Error { message } = next(&mut events).await? else {
        panic!("expected an error");
    };
    assert!(message.contains("unavailable"));

    worker.send(Request::Inspect { file: input.clone() }).await?;
    worker
        .send(Request::Start {
            file: input,
            settings: TranscodeSettings::default(),
        })
        .await?;
    assert!(quiet(&mut events).await);
    Ok(())
}
