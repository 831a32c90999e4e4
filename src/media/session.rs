//! One conversion run, from inspection to the terminal outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use media_bus::{Demuxer, MediaBackend, OutputFormat, OutputTrack, TrackId, TrackInfo};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::config;
use crate::error::TranscodeError;
use crate::media::cancel::{checkpoint, CancelController};
use crate::media::decision::decide_track;
use crate::media::inspector::{inspect_file, open_demuxer, select_tracks, sniff_file};
use crate::media::mux::{select_output, MuxCoordinator};
use crate::media::pipeline::{
    decode_stage, demux_stage, encode_stage, EncodeTarget, ProgressTracker, Route, TranscodeTrack,
};
use crate::media::types::{MediaInfo, TrackMode, TranscodeSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Inspecting,
    Ready,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }

    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle | Ready, Inspecting) => true,
            (Inspecting, Ready | Idle) => true,
            (Idle | Ready, Running) => true,
            (Running, Completed | Cancelled | Failed) => true,
            (from, Ready) => from.is_terminal(),
            _ => false,
        }
    }
}

/// How one selected source track is carried into the output.
#[derive(Clone, Debug)]
pub struct TrackPlan {
    pub slot: usize,
    pub source: TrackInfo,
    pub mode: TrackMode,
}

/// Bytes of a finished conversion.
#[derive(Clone, Debug)]
pub struct TranscodeOutput {
    pub source: PathBuf,
    pub data: Bytes,
    pub format: OutputFormat,
}

impl TranscodeOutput {
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// `<stem>_transcoded.<ext>` beside the source.
    pub fn default_path(&self) -> PathBuf {
        output_path_for(&self.source, self.extension())
    }
}

pub fn output_path_for(source: &Path, extension: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    source.with_file_name(format!("{}_transcoded.{}", stem, extension))
}

#[derive(Debug)]
pub enum Outcome {
    Completed(TranscodeOutput),
    Cancelled,
    Failed(TranscodeError),
}

struct RunPlan {
    demuxer: Box<dyn Demuxer>,
    tracks: Vec<TrackPlan>,
    settings: TranscodeSettings,
    format: OutputFormat,
    source_fps: f64,
    video_id: Option<TrackId>,
    video_units: u64,
}

/// Selects tracks, fixes their modes and resolves the output container.
fn plan_run(
    backend: &dyn MediaBackend,
    path: &Path,
    info: &MediaInfo,
    mut settings: TranscodeSettings,
) -> Result<RunPlan, TranscodeError> {
    let (kind, _) = sniff_file(path)?;
    let demuxer = open_demuxer(backend, path, kind)?;
    let all_tracks = demuxer.tracks().to_vec();
    let (video, audio) = select_tracks(&all_tracks);
    let video = video.filter(|_| !settings.audio_only);
    if settings.audio_only && audio.is_none() {
        return Err(TranscodeError::Transcode(
            "audio only requested but the file has no audio".into(),
        ));
    }

    if settings.original_video_bitrate.is_none() {
        settings.original_video_bitrate = info.video().map(|v| v.bitrate());
    }
    if settings.original_audio_bitrate.is_none() {
        settings.original_audio_bitrate = info.audio().map(|a| a.bitrate());
    }
    let source_fps = info.video().map(|v| v.fps()).unwrap_or(0.0);

    let mut tracks = Vec::new();
    let mut families = Vec::new();
    for source in video.into_iter().chain(audio) {
        let mode = decide_track(source, source_fps, &settings);
        let family = match (mode, source.is_video()) {
            (TrackMode::Passthrough, _) => source.family(),
            (TrackMode::Transcode, true) => settings.video_codec.family(),
            (TrackMode::Transcode, false) => settings.audio_codec.family(),
        };
        log::info!(
            "track {} ({}) -> {:?} as {}",
            source.id,
            source.codec,
            mode,
            family.name()
        );
        families.push(family);
        tracks.push(TrackPlan {
            slot: tracks.len(),
            source: source.clone(),
            mode,
        });
    }
    if tracks.is_empty() {
        return Err(TranscodeError::Transcode("no track to convert".into()));
    }
    let format = select_output(settings.format.output_format(), settings.audio_only, &families);

    let video_units = video
        .map(|v| {
            if v.sample_count > 0 {
                v.sample_count
            } else {
                (info.duration() * source_fps).round() as u64
            }
        })
        .unwrap_or(0);

    Ok(RunPlan {
        demuxer,
        tracks,
        settings,
        format,
        source_fps,
        video_id: video.map(|v| v.id),
        video_units,
    })
}

/// Runs `work` on a blocking thread. A failure stops the sibling stages.
fn spawn_stage<T: Send + 'static>(
    name: &'static str,
    cancel: &CancelController,
    work: impl FnOnce() -> Result<T, TranscodeError> + Send + 'static,
) -> JoinHandle<Result<T, TranscodeError>> {
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        let result = work();
        match &result {
            Err(TranscodeError::Cancel) => log::debug!("{} stage stopped", name),
            Err(e) => {
                log::error!("{} stage failed: {}", name, e);
                cancel.fail();
            }
            Ok(_) => log::debug!("{} stage done", name),
        }
        result
    })
}

async fn settle<T>(handle: JoinHandle<Result<T, TranscodeError>>) -> Result<T, TranscodeError> {
    handle.await?
}

/// State of a `start` request. Created when the run begins and consumed
/// by [`Session::run`].
pub struct Session {
    file: PathBuf,
    settings: TranscodeSettings,
    cancel: CancelController,
    state: SessionState,
    progress: Option<Arc<ProgressTracker>>,
}

impl Session {
    pub fn new(file: PathBuf, settings: TranscodeSettings, cancel: CancelController) -> Self {
        Self {
            file,
            settings,
            cancel,
            state: SessionState::Ready,
            progress: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition(next) {
            log::warn!("session: ignoring {:?} -> {:?}", self.state, next);
            return;
        }
        log::debug!("session: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Drives the run to its terminal outcome. `on_progress` receives
    /// increasing percentages and is never called after this returns.
    pub async fn run(
        mut self,
        backend: Arc<dyn MediaBackend>,
        on_progress: impl Fn(u8) + Send + Sync + 'static,
    ) -> Outcome {
        self.transition(SessionState::Running);
        let result = self.execute(backend, on_progress).await;

        let outcome = if self.cancel.is_user_cancelled() {
            Outcome::Cancelled
        } else {
            match result {
                Ok(output) => {
                    if let Some(progress) = &self.progress {
                        progress.finish();
                    }
                    Outcome::Completed(output)
                }
                Err(TranscodeError::Cancel) => {
                    Outcome::Failed(TranscodeError::Transcode("run stopped unexpectedly".into()))
                }
                Err(e) => Outcome::Failed(e),
            }
        };

        self.transition(match &outcome {
            Outcome::Completed(_) => SessionState::Completed,
            Outcome::Cancelled => SessionState::Cancelled,
            Outcome::Failed(_) => SessionState::Failed,
        });
        if let Some(progress) = &self.progress {
            log::info!(
                "{}: {:?} after {}/{} video units",
                self.file.display(),
                self.state,
                progress.processed(),
                progress.total()
            );
        }
        outcome
    }

    async fn execute(
        &mut self,
        backend: Arc<dyn MediaBackend>,
        on_progress: impl Fn(u8) + Send + Sync + 'static,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let token = self.cancel.stage_token();
        let info = inspect_file(backend.clone(), self.file.clone()).await?;
        checkpoint(&token)?;

        let plan = {
            let (backend, file, settings) =
                (backend.clone(), self.file.clone(), self.settings.clone());
            tokio::task::spawn_blocking(move || plan_run(backend.as_ref(), &file, &info, settings))
                .await??
        };
        checkpoint(&token)?;

        let RunPlan {
            demuxer,
            tracks,
            settings,
            format,
            source_fps,
            video_id,
            video_units,
        } = plan;
        let progress = Arc::new(ProgressTracker::new(video_units, on_progress));
        self.progress = Some(progress.clone());

        let depth = config().decoded_queue_depth.max(1);
        let (mux_tx, mux_rx) = mpsc::channel(depth);

        let passthrough: Vec<(usize, OutputTrack)> = tracks
            .iter()
            .filter(|t| t.mode == TrackMode::Passthrough)
            .map(|t| {
                let frame_rate = if t.source.is_video() {
                    t.source.frame_rate.or((source_fps > 0.0).then_some(source_fps))
                } else {
                    None
                };
                (
                    t.slot,
                    OutputTrack {
                        codec: t.source.codec.clone(),
                        layout: t.source.layout,
                        decoder_config: t.source.decoder_config.clone(),
                        frame_rate,
                    },
                )
            })
            .collect();
        let mut coordinator = MuxCoordinator::new(
            backend.clone(),
            format,
            tracks.len(),
            config().reorder_window,
        );
        let mux_handle = spawn_stage("mux", &self.cancel, {
            let token = token.clone();
            move || {
                for (slot, track) in passthrough {
                    coordinator.configure(slot, track)?;
                }
                coordinator.run(mux_rx, token)
            }
        });

        let mut stages = Vec::new();
        let mut routes = HashMap::new();
        for plan in &tracks {
            if plan.mode == TrackMode::Passthrough {
                routes.insert(plan.source.id, Route::Passthrough { slot: plan.slot });
                continue;
            }
            let (chunk_tx, chunk_rx) = mpsc::channel(depth);
            let (frame_tx, frame_rx) = mpsc::channel(depth);
            let track = TranscodeTrack {
                slot: plan.slot,
                source: plan.source.clone(),
                target: EncodeTarget::for_track(&plan.source, source_fps, &settings),
            };
            stages.push(spawn_stage("decode", &self.cancel, {
                let (backend, source, token) = (backend.clone(), track.source.clone(), token.clone());
                move || decode_stage(backend, source, chunk_rx, frame_tx, token)
            }));
            stages.push(spawn_stage("encode", &self.cancel, {
                let (backend, mux_tx, token) = (backend.clone(), mux_tx.clone(), token.clone());
                move || encode_stage(backend, track, frame_rx, mux_tx, token).map(|_| ())
            }));
            routes.insert(plan.source.id, Route::Transcode(chunk_tx));
        }
        stages.push(spawn_stage("demux", &self.cancel, {
            let token = token.clone();
            move || demux_stage(demuxer, routes, mux_tx, video_id, progress, token).map(|_| ())
        }));

        // Every stage settles before the outcome is decided.
        let mut failure = None;
        for stage in stages {
            if let Err(e) = settle(stage).await {
                if !e.is_cancel() && failure.is_none() {
                    failure = Some(e);
                }
            }
        }
        let muxed = settle(mux_handle).await;
        if let Some(e) = failure {
            return Err(e);
        }
        let output = muxed?;
        Ok(TranscodeOutput {
            source: self.file.clone(),
            data: output.data,
            format: output.format,
        })
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
