use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use media_bus::MediaBackend;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use lite_transcode::backend::default_backend;
use lite_transcode::config::{self, TranscodeConfig};
use lite_transcode::media::cancel::CancelController;
use lite_transcode::media::inspector::inspect_file;
use lite_transcode::media::preset::{estimated_size, Preset};
use lite_transcode::media::session::{output_path_for, Outcome, Session};
use lite_transcode::media::types::{
    AudioCodecKey, Bitrate, FormatKey, FrameRateTarget, Resolution, TranscodeSettings,
    VideoCodecKey,
};
use lite_transcode::worker::{Request, Response, Worker};

#[derive(Parser, Debug)]
#[command(name = "lite-transcode", version, about = "Convert media files between containers and codecs")]
struct Cli {
    /// TOML file overriding queue sizes and default bitrates.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print what is inside a file as JSON.
    Inspect { file: PathBuf },
    /// Convert a file and write `<stem>_transcoded.<ext>` next to it.
    Convert(ConvertArgs),
    /// Serve JSON-lines requests on stdin, responses on stdout.
    Worker,
}

/// Parses a value the same way the request protocol does.
fn parse_key<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(|e| e.to_string())
}

fn parse_bitrate(value: &str) -> Result<Bitrate, String> {
    if value.eq_ignore_ascii_case("keep") {
        return Ok(Bitrate::Keep);
    }
    let bps: i64 = value
        .parse()
        .map_err(|_| format!("invalid bitrate {:?}", value))?;
    Bitrate::try_from(bps)
}

#[derive(Args, Debug)]
struct ConvertArgs {
    file: PathBuf,

    /// mp4, webm, mov or mkv.
    #[arg(long, value_parser = parse_key::<FormatKey>, default_value = "mp4")]
    format: FormatKey,

    /// h264, h265 or av1.
    #[arg(long, value_parser = parse_key::<VideoCodecKey>, default_value = "h264")]
    video_codec: VideoCodecKey,

    /// aac or opus.
    #[arg(long, value_parser = parse_key::<AudioCodecKey>, default_value = "aac")]
    audio_codec: AudioCodecKey,

    /// Bits per second, or `keep`.
    #[arg(long, value_parser = parse_bitrate, default_value = "keep", allow_hyphen_values = true)]
    video_bitrate: Bitrate,

    #[arg(long, value_parser = parse_bitrate, default_value = "keep", allow_hyphen_values = true)]
    audio_bitrate: Bitrate,

    #[arg(long)]
    audio_only: bool,

    /// 4k, fhd, hd, sd or keep.
    #[arg(long, value_parser = parse_key::<Resolution>, default_value = "keep")]
    resolution: Resolution,

    /// Frames per second, or `keep`.
    #[arg(long, default_value = "keep")]
    fps: FrameRateTarget,

    /// low, medium or high. Overrides video bitrate, fps and resolution.
    #[arg(long, value_parser = parse_key::<Preset>)]
    preset: Option<Preset>,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl ConvertArgs {
    fn settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            format: self.format,
            video_codec: self.video_codec,
            audio_codec: self.audio_codec,
            video_bitrate: self.video_bitrate,
            audio_bitrate: self.audio_bitrate,
            audio_only: self.audio_only,
            resolution: self.resolution,
            fps: self.fps,
            original_video_bitrate: None,
            original_audio_bitrate: None,
        }
    }
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("lite_transcode", log::LevelFilter::Info)
        .filter_module("media_bus", log::LevelFilter::Info)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        let loaded = TranscodeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?;
        config::install(loaded);
    }

    let backend = default_backend();
    match cli.command {
        Command::Inspect { file } => inspect(backend, file).await,
        Command::Convert(args) => convert(backend, args).await,
        Command::Worker => serve(backend).await,
    }
}

async fn inspect(backend: Arc<dyn MediaBackend>, file: PathBuf) -> anyhow::Result<()> {
    backend.check_available()?;
    let info = inspect_file(backend, file.clone())
        .await
        .with_context(|| format!("inspecting {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn convert(backend: Arc<dyn MediaBackend>, args: ConvertArgs) -> anyhow::Result<()> {
    backend.check_available()?;
    let info = inspect_file(backend.clone(), args.file.clone())
        .await
        .with_context(|| format!("inspecting {}", args.file.display()))?;
    let mut settings = args.settings();
    if let Some(preset) = args.preset {
        preset.apply(&info, &mut settings);
        log::info!("preset {:?}: {:?}", preset, settings);
    }
    log::info!(
        "estimated output size: {} bytes",
        estimated_size(&info, &settings)
    );

    let cancel = CancelController::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        })
    };
    let session = Session::new(args.file.clone(), settings, cancel);
    let outcome = session
        .run(backend, |percent| log::info!("progress {}%", percent))
        .await;
    interrupt.abort();

    match outcome {
        Outcome::Completed(output) => {
            let path = args.output.unwrap_or_else(|| output.default_path());
            tokio::fs::write(&path, &output.data)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            log::info!(
                "wrote {} ({}, {} bytes)",
                path.display(),
                output.mime_type(),
                output.data.len()
            );
            Ok(())
        }
        Outcome::Cancelled => anyhow::bail!("conversion cancelled"),
        Outcome::Failed(e) => Err(e.into()),
    }
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &Response,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

/// Stores a finished file next to its source and reports where.
async fn store(response: Response) -> anyhow::Result<Response> {
    let Response::Complete(mut done) = response else {
        return Ok(response);
    };
    let path = output_path_for(&done.source, &done.extension);
    tokio::fs::write(&path, &done.output)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    done.path = Some(path);
    Ok(Response::Complete(done))
}

async fn serve(backend: Arc<dyn MediaBackend>) -> anyhow::Result<()> {
    let available = backend.check_available().is_ok();
    let (worker, mut events) = Worker::spawn(backend);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut input_open = true;
    // Requests still waiting for their answer.
    let mut pending = 0usize;

    loop {
        if !input_open && (pending == 0 || !available) {
            break;
        }
        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str::<Request>(&line) {
                    Ok(request) => {
                        if !matches!(request, Request::Cancel) {
                            pending += 1;
                        }
                        worker.send(request).await?;
                    }
                    Err(e) => {
                        let message = format!("bad request: {}", e);
                        write_response(&mut stdout, &Response::Error { message }).await?;
                    }
                },
                None => input_open = false,
            },
            Some(response) = events.next() => {
                if !matches!(response, Response::Progress { .. }) {
                    pending = pending.saturating_sub(1);
                }
                let response = match store(response).await {
                    Ok(response) => response,
                    Err(e) => Response::Error { message: format!("{:#}", e) },
                };
                write_response(&mut stdout, &response).await?;
            },
            _ = tokio::signal::ctrl_c() => {
                log::warn!("interrupted");
                break;
            },
        }
    }

    worker.stop();
    Ok(())
}
