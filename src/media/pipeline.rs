//! Blocking stage loops of a run.
//!
//! ```text
//!   demux ──Route::Passthrough────────────────────────────┐
//!     │                                                    ▼
//!     └─ChunkCmd─▶ decode ─DecodedCmd─▶ encode ─MuxCmd─▶ mux
//! ```
//!
//! Every arrow is a bounded channel. Each stage checks the run's token
//! between units and never while a backend call is in flight.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use media_bus::{
    Chunk, CodecFamily, Decoder, DecoderConfig, Demuxer, Encoder, EncoderConfig, Frame,
    FrameFormat, MediaBackend, TrackId, TrackInfo, TrackLayout,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::config;
use crate::error::TranscodeError;
use crate::media::cancel::checkpoint;
use crate::media::decision::retarget_fps;
use crate::media::mux::MuxCmd;
use crate::media::types::{Resolution, TranscodeSettings};

pub enum ChunkCmd {
    Data(Chunk),
    EOF,
}

pub enum DecodedCmd {
    /// The decoder accepted its configuration.
    Configured,
    Data(Frame),
    EOF,
}

// ============================================================================
// Geometry
// ============================================================================

/// Output dimensions are multiples of this.
pub const GEOMETRY_ALIGN: u32 = 32;

fn align_up(value: u32) -> u32 {
    value.div_ceil(GEOMETRY_ALIGN).max(1) * GEOMETRY_ALIGN
}

/// Encoded picture size for a source picture under `resolution`. Pictures
/// already within the bucket keep their size.
pub fn scaled_geometry(width: u32, height: u32, resolution: Resolution) -> (u32, u32) {
    let long = width.max(height);
    match resolution.long_edge() {
        Some(edge) if edge < long => {
            let scale = |v: u32| (v as u64 * edge as u64).div_ceil(long as u64) as u32;
            (align_up(scale(width)), align_up(scale(height)))
        }
        _ => (width, height),
    }
}

// ============================================================================
// Frame rate
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
pub enum GridSlot {
    /// The slot this frame maps to was already encoded.
    Drop,
    /// Encode the previous frame at every `gaps` slot, then this frame at `slot`.
    Fill { gaps: Range<u64>, slot: u64 },
}

/// Maps decoded frames onto a fixed output rate.
#[derive(Debug)]
pub struct FrameGrid {
    interval: f64,
    origin: Option<i64>,
    next_slot: u64,
}

impl FrameGrid {
    pub fn new(fps: f64) -> Self {
        Self {
            interval: 1_000_000.0 / fps,
            origin: None,
            next_slot: 0,
        }
    }

    pub fn place(&mut self, timestamp: i64) -> GridSlot {
        let origin = *self.origin.get_or_insert(timestamp);
        let slot = ((timestamp - origin) as f64 / self.interval).round().max(0.0) as u64;
        if slot < self.next_slot {
            return GridSlot::Drop;
        }
        let gaps = self.next_slot..slot;
        self.next_slot = slot + 1;
        GridSlot::Fill { gaps, slot }
    }

    pub fn time_of(&self, slot: u64) -> i64 {
        self.origin.unwrap_or(0) + (slot as f64 * self.interval).round() as i64
    }

    pub fn frame_duration(&self) -> i64 {
        self.interval.round() as i64
    }
}

// ============================================================================
// Track plan
// ============================================================================

/// What a re-encoded track is turned into.
#[derive(Clone, Debug, PartialEq)]
pub enum EncodeTarget {
    Video {
        codec: &'static str,
        bitrate: u64,
        resolution: Resolution,
        /// Output rate when it differs from the source.
        retarget: Option<f64>,
        source_fps: f64,
    },
    Audio {
        codec: &'static str,
        bitrate: u64,
        sample_rate: u32,
        channels: u16,
    },
}

impl EncodeTarget {
    pub fn for_track(track: &TrackInfo, source_fps: f64, settings: &TranscodeSettings) -> Self {
        if track.is_video() {
            EncodeTarget::Video {
                codec: settings.video_codec.profile(),
                bitrate: settings.video_target_bitrate(),
                resolution: settings.resolution,
                retarget: retarget_fps(settings.fps, source_fps),
                source_fps,
            }
        } else {
            EncodeTarget::Audio {
                codec: settings.audio_codec.profile(),
                bitrate: settings.audio_target_bitrate(),
                sample_rate: config().audio_sample_rate,
                channels: config().audio_channels,
            }
        }
    }

    pub fn codec(&self) -> &'static str {
        match self {
            EncodeTarget::Video { codec, .. } | EncodeTarget::Audio { codec, .. } => *codec,
        }
    }

    /// Encoder settings for frames shaped like `input`.
    pub fn encoder_config(&self, input: FrameFormat) -> Result<EncoderConfig, TranscodeError> {
        match (self, input) {
            (
                EncodeTarget::Video {
                    codec,
                    bitrate,
                    resolution,
                    retarget,
                    source_fps,
                },
                FrameFormat::Video { width, height },
            ) => {
                let (width, height) = scaled_geometry(width, height, *resolution);
                Ok(EncoderConfig {
                    codec: codec.to_string(),
                    bitrate: *bitrate,
                    input,
                    output: TrackLayout::Video { width, height },
                    frame_rate: retarget.or((*source_fps > 0.0).then_some(*source_fps)),
                })
            }
            (
                EncodeTarget::Audio {
                    codec,
                    bitrate,
                    sample_rate,
                    channels,
                },
                FrameFormat::Audio { .. },
            ) => Ok(EncoderConfig {
                codec: codec.to_string(),
                bitrate: *bitrate,
                input,
                output: TrackLayout::Audio {
                    sample_rate: *sample_rate,
                    channels: *channels,
                },
                frame_rate: None,
            }),
            (target, input) => Err(TranscodeError::Transcode(format!(
                "{} target got frame {:?}",
                target.codec(),
                input
            ))),
        }
    }
}

/// A source track that goes through decode and encode.
#[derive(Clone, Debug)]
pub struct TranscodeTrack {
    /// Output track index.
    pub slot: usize,
    pub source: TrackInfo,
    pub target: EncodeTarget,
}

// ============================================================================
// Track state
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Unconfigured,
    DecoderConfigured,
    Encoding,
    Flushing,
    Drained,
}

impl TrackState {
    pub fn advance(self, next: TrackState) -> Result<TrackState, TranscodeError> {
        use TrackState::*;
        let legal = matches!(
            (self, next),
            (Unconfigured, DecoderConfigured)
                | (DecoderConfigured, Encoding)
                | (DecoderConfigured, Flushing)
                | (Encoding, Flushing)
                | (Flushing, Drained)
        );
        if legal {
            Ok(next)
        } else {
            Err(TranscodeError::Transcode(format!(
                "illegal track transition {:?} -> {:?}",
                self, next
            )))
        }
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Counts processed video units and reports whole percentages.
pub struct ProgressTracker {
    total: u64,
    processed: AtomicU64,
    last: AtomicU8,
    emit: Box<dyn Fn(u8) + Send + Sync>,
}

impl ProgressTracker {
    pub fn new(total: u64, emit: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            total,
            processed: AtomicU64::new(0),
            last: AtomicU8::new(0),
            emit: Box::new(emit),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn advance(&self) {
        if self.total == 0 {
            return;
        }
        let Ok(previous) = self
            .processed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.total).then_some(n + 1)
            })
        else {
            return;
        };
        self.report(((previous + 1) * 100 / self.total) as u8);
    }

    /// Reports 100 unless it was already reported.
    pub fn finish(&self) {
        self.report(100);
    }

    fn report(&self, percent: u8) {
        let percent = percent.min(100);
        if self.last.fetch_max(percent, Ordering::AcqRel) < percent {
            (self.emit)(percent);
        }
    }
}

// ============================================================================
// Stages
// ============================================================================

fn send<T>(tx: &mpsc::Sender<T>, cmd: T) -> Result<(), TranscodeError> {
    // A closed channel means the next stage already gave up.
    tx.blocking_send(cmd).map_err(|_| TranscodeError::Cancel)
}

/// Opens a codec, retrying once with the family's canonical profile when
/// the backend rejects `primary`.
pub fn open_with_fallback<T>(
    primary: &str,
    mut open: impl FnMut(&str) -> media_bus::Result<T>,
) -> Result<(T, String), TranscodeError> {
    let err = match open(primary) {
        Ok(opened) => return Ok((opened, primary.to_string())),
        Err(e) if e.is_unsupported() => e,
        Err(e) => return Err(e.into()),
    };
    let fallback = CodecFamily::parse(primary)
        .fallback_profile()
        .filter(|f| !f.eq_ignore_ascii_case(primary));
    let Some(fallback) = fallback else {
        return Err(TranscodeError::ConfigUnsupported(format!("{}: {}", primary, err)));
    };
    log::warn!("{} rejected ({}), retrying with {}", primary, err, fallback);
    match open(fallback) {
        Ok(opened) => Ok((opened, fallback.to_string())),
        Err(e) if e.is_unsupported() => Err(TranscodeError::ConfigUnsupported(format!(
            "{} and {}: {}",
            primary, fallback, e
        ))),
        Err(e) => Err(e.into()),
    }
}

pub enum Route {
    Passthrough { slot: usize },
    Transcode(mpsc::Sender<ChunkCmd>),
}

/// Reads the source and hands every chunk of a selected track to its route.
/// Chunks of `progress_track` advance `progress` as they leave.
pub fn demux_stage(
    mut demuxer: Box<dyn Demuxer>,
    routes: HashMap<TrackId, Route>,
    mux: mpsc::Sender<MuxCmd>,
    progress_track: Option<TrackId>,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
) -> Result<u64, TranscodeError> {
    let mut forwarded = 0u64;
    loop {
        checkpoint(&cancel)?;
        // Inspection already accepted the source, so a bad read here fails the run.
        let next = demuxer
            .read_chunk()
            .map_err(|e| TranscodeError::Transcode(format!("reading source: {}", e)))?;
        let Some((id, chunk)) = next else {
            break;
        };
        match routes.get(&id) {
            None => continue,
            Some(Route::Passthrough { slot }) => {
                send(&mux, MuxCmd::Data { slot: *slot, chunk })?
            }
            Some(Route::Transcode(tx)) => send(tx, ChunkCmd::Data(chunk))?,
        }
        forwarded += 1;
        if Some(id) == progress_track {
            progress.advance();
        }
    }

    for route in routes.values() {
        match route {
            Route::Passthrough { slot } => send(&mux, MuxCmd::EOF { slot: *slot })?,
            Route::Transcode(tx) => send(tx, ChunkCmd::EOF)?,
        }
    }
    log::debug!("demux finished, {} chunks forwarded", forwarded);
    Ok(forwarded)
}

fn drain_frames(
    decoder: &mut dyn Decoder,
    output: &mpsc::Sender<DecodedCmd>,
) -> Result<(), TranscodeError> {
    while let Some(frame) = decoder.receive_frame()? {
        send(output, DecodedCmd::Data(frame))?;
    }
    Ok(())
}

pub fn decode_stage(
    backend: Arc<dyn MediaBackend>,
    source: TrackInfo,
    mut input: mpsc::Receiver<ChunkCmd>,
    output: mpsc::Sender<DecodedCmd>,
    cancel: CancellationToken,
) -> Result<(), TranscodeError> {
    let (mut decoder, codec) = open_with_fallback(&source.codec, |codec| {
        backend.create_decoder(&DecoderConfig {
            codec: codec.to_string(),
            layout: source.layout,
            description: source.decoder_config.clone(),
        })
    })?;
    log::info!("track {} decoder configured for {}", source.id, codec);
    send(&output, DecodedCmd::Configured)?;

    loop {
        checkpoint(&cancel)?;
        match input.blocking_recv() {
            Some(ChunkCmd::Data(chunk)) => {
                decoder.decode(&chunk)?;
                drain_frames(decoder.as_mut(), &output)?;
            }
            Some(ChunkCmd::EOF) => {
                decoder.flush()?;
                drain_frames(decoder.as_mut(), &output)?;
                send(&output, DecodedCmd::EOF)?;
                return Ok(());
            }
            None => return Err(TranscodeError::Cancel),
        }
    }
}

struct EncodeStage {
    track: TranscodeTrack,
    mux: mpsc::Sender<MuxCmd>,
    cancel: CancellationToken,
    encoder: Option<Box<dyn Encoder>>,
    grid: Option<FrameGrid>,
    previous: Option<Frame>,
    announced: bool,
}

impl EncodeStage {
    fn configure(&mut self, backend: &dyn MediaBackend, input: FrameFormat) -> Result<(), TranscodeError> {
        let config = self.track.target.encoder_config(input)?;
        let (encoder, codec) = open_with_fallback(&config.codec, |codec| {
            backend.create_encoder(&EncoderConfig {
                codec: codec.to_string(),
                ..config.clone()
            })
        })?;
        log::info!(
            "track {} encoder {} configured: {:?} -> {:?} at {} bps",
            self.track.source.id,
            codec,
            config.input,
            config.output,
            config.bitrate
        );
        if let EncodeTarget::Video {
            retarget: Some(fps),
            ..
        } = self.track.target
        {
            self.grid = Some(FrameGrid::new(fps));
        }
        self.encoder = Some(encoder);
        Ok(())
    }

    fn submit(&mut self, frame: Frame) -> Result<(), TranscodeError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(TranscodeError::Transcode("encoder not configured".into()));
        };
        let Some(grid) = self.grid.as_mut() else {
            encoder.encode(&frame, frame.timestamp, frame.duration)?;
            return Ok(());
        };
        match grid.place(frame.timestamp) {
            GridSlot::Drop => log::trace!("frame at {} dropped", frame.timestamp),
            GridSlot::Fill { gaps, slot } => {
                if let Some(previous) = self.previous.as_ref() {
                    for gap in gaps {
                        checkpoint(&self.cancel)?;
                        encoder.encode(previous, grid.time_of(gap), grid.frame_duration())?;
                    }
                }
                encoder.encode(&frame, grid.time_of(slot), grid.frame_duration())?;
                self.previous = Some(frame);
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), TranscodeError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        let slot = self.track.slot;
        while let Some(chunk) = encoder.receive_chunk()? {
            if !self.announced {
                send(
                    &self.mux,
                    MuxCmd::Configure {
                        slot,
                        track: encoder.output_track(),
                    },
                )?;
                self.announced = true;
            }
            send(&self.mux, MuxCmd::Data { slot, chunk })?;
        }
        Ok(())
    }
}

/// Encodes decoded frames of one track. The encoder is created from the
/// first frame, so its geometry and sample layout are the decoder's real
/// output.
pub fn encode_stage(
    backend: Arc<dyn MediaBackend>,
    track: TranscodeTrack,
    mut input: mpsc::Receiver<DecodedCmd>,
    mux: mpsc::Sender<MuxCmd>,
    cancel: CancellationToken,
) -> Result<TrackState, TranscodeError> {
    let mut stage = EncodeStage {
        track,
        mux,
        cancel: cancel.clone(),
        encoder: None,
        grid: None,
        previous: None,
        announced: false,
    };
    let mut state = TrackState::Unconfigured;

    loop {
        checkpoint(&cancel)?;
        match input.blocking_recv() {
            Some(DecodedCmd::Configured) => state = state.advance(TrackState::DecoderConfigured)?,
            Some(DecodedCmd::Data(frame)) => {
                if stage.encoder.is_none() {
                    state = state.advance(TrackState::Encoding)?;
                    stage.configure(backend.as_ref(), frame.format)?;
                }
                stage.submit(frame)?;
                stage.drain()?;
            }
            Some(DecodedCmd::EOF) => {
                state = state.advance(TrackState::Flushing)?;
                if let Some(encoder) = stage.encoder.as_mut() {
                    encoder.flush()?;
                }
                stage.drain()?;
                state = state.advance(TrackState::Drained)?;
                send(&stage.mux, MuxCmd::EOF { slot: stage.track.slot })?;
                log::debug!("track {} drained", stage.track.source.id);
                return Ok(state);
            }
            None => return Err(TranscodeError::Cancel),
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
