//! In-memory media backend for tests.
//!
//! Fake files are a real container signature followed by a JSON track and
//! chunk listing, so the inspector's sniffing runs unchanged. The fake muxer
//! writes the same format, which lets tests re-inspect their output.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use media_bus::{
    BusError, Chunk, ChunkType, ContainerKind, Decoder, DecoderConfig, Demuxer, Encoder,
    EncoderConfig, Frame, FrameFormat, MediaBackend, Muxer, OutputFormat, OutputTrack, TrackId,
    TrackInfo, TrackLayout,
};
use serde::{Deserialize, Serialize};

const MARKER: &[u8] = b"\nFAKE-MEDIA\n";
pub const AUDIO_FRAME_US: i64 = 21_333;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FakeTrack {
    pub id: TrackId,
    pub codec: String,
    pub video: bool,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_rate: Option<f64>,
    pub sample_count: u64,
    pub bitrate: Option<u64>,
    pub config: Option<Vec<u8>>,
}

impl FakeTrack {
    pub fn video(id: TrackId, codec: &str, width: u32, height: u32) -> Self {
        Self {
            id,
            codec: codec.to_string(),
            video: true,
            width,
            height,
            config: Some(b"video-config".to_vec()),
            ..Self::default()
        }
    }

    pub fn audio(id: TrackId, codec: &str, sample_rate: u32, channels: u16) -> Self {
        Self {
            id,
            codec: codec.to_string(),
            sample_rate,
            channels,
            config: Some(b"audio-config".to_vec()),
            ..Self::default()
        }
    }

    fn info(&self) -> TrackInfo {
        let layout = if self.video {
            TrackLayout::Video {
                width: self.width,
                height: self.height,
            }
        } else {
            TrackLayout::Audio {
                sample_rate: self.sample_rate,
                channels: self.channels,
            }
        };
        TrackInfo {
            id: self.id,
            codec: self.codec.clone(),
            layout,
            frame_rate: self.frame_rate,
            sample_count: self.sample_count,
            bitrate: self.bitrate,
            decoder_config: self.config.clone().map(Bytes::from),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FakeChunk {
    pub track: TrackId,
    pub key: bool,
    pub ts: i64,
    pub cto: i64,
    pub dur: i64,
    pub size: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FakeMedia {
    pub duration: Option<f64>,
    pub tracks: Vec<FakeTrack>,
    pub chunks: Vec<FakeChunk>,
}

impl FakeMedia {
    /// A track with `count` evenly spaced chunks, a key every `gop`.
    pub fn push_chunks(&mut self, track: TrackId, count: usize, step: i64, size: usize, gop: usize) {
        for i in 0..count {
            self.chunks.push(FakeChunk {
                track,
                key: i % gop.max(1) == 0,
                ts: i as i64 * step,
                cto: 0,
                dur: step,
                size,
            });
        }
        if let Some(t) = self.tracks.iter_mut().find(|t| t.id == track) {
            t.sample_count = count as u64;
        }
    }

    /// Orders chunks by timestamp the way a real muxer interleaves them.
    pub fn interleave(&mut self) {
        self.chunks.sort_by_key(|c| (c.ts, c.track));
    }

    pub fn to_bytes(&self, container: ContainerKind) -> Vec<u8> {
        let mut bytes = header(container);
        bytes.extend_from_slice(MARKER);
        bytes.extend_from_slice(&serde_json::to_vec(self).unwrap_or_default());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        let start = bytes
            .windows(MARKER.len())
            .position(|w| w == MARKER)
            .ok_or_else(|| BusError::Malformed("no fake media marker".into()))?;
        serde_json::from_slice(&bytes[start + MARKER.len()..])
            .map_err(|e| BusError::Malformed(e.to_string()))
    }

    pub fn write(&self, path: &Path, container: ContainerKind) {
        std::fs::write(path, self.to_bytes(container)).unwrap();
    }
}

fn header(container: ContainerKind) -> Vec<u8> {
    fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
        let mut h = vec![0, 0, 0, 0x14];
        h.extend_from_slice(b"ftyp");
        h.extend_from_slice(brand);
        h.extend_from_slice(&[0, 0, 2, 0]);
        h.extend_from_slice(brand);
        h
    }
    fn ebml(doc_type: &str) -> Vec<u8> {
        let mut h = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01];
        h.extend_from_slice(&[0x42, 0x82, 0x80 | doc_type.len() as u8]);
        h.extend_from_slice(doc_type.as_bytes());
        h
    }
    match container {
        ContainerKind::Mp4 => ftyp(b"isom"),
        ContainerKind::QuickTime => ftyp(b"qt  "),
        ContainerKind::WebM => ebml("webm"),
        ContainerKind::Matroska => ebml("matroska"),
    }
}

/// Payload of fake frames: the source time it was decoded from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FakePicture(pub i64);

#[derive(Clone, Debug, Default)]
pub struct FakeOptions {
    pub unavailable: bool,
    pub reject_decoders: Vec<String>,
    pub reject_encoders: Vec<String>,
    /// Codec strings the muxer refuses at start.
    pub reject_mux_codecs: Vec<String>,
    pub decode_delay: Duration,
    /// Encoders release their output in swapped pairs.
    pub swap_output_pairs: bool,
    /// Encoding fails after this many frames.
    pub fail_encode_after: Option<usize>,
}

#[derive(Debug, Default)]
pub struct FakeLog {
    pub decoders: Vec<String>,
    pub encoders: Vec<EncoderConfig>,
    pub encoder_attempts: Vec<String>,
    pub mux_attempts: Vec<Vec<String>>,
    pub format: Option<OutputFormat>,
    pub written: Vec<(usize, Chunk)>,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub options: FakeOptions,
    pub log: Arc<Mutex<FakeLog>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: FakeOptions) -> Self {
        Self {
            options,
            log: Arc::default(),
        }
    }

    pub fn shared(self) -> Arc<dyn MediaBackend> {
        Arc::new(self)
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, FakeLog> {
        self.log.lock().unwrap()
    }
}

impl MediaBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn check_available(&self) -> media_bus::Result<()> {
        if self.options.unavailable {
            Err(BusError::Unavailable("fake backend switched off".into()))
        } else {
            Ok(())
        }
    }

    fn open(&self, path: &Path, _kind: ContainerKind) -> media_bus::Result<Box<dyn Demuxer>> {
        let media = FakeMedia::from_bytes(&std::fs::read(path)?)?;
        Ok(Box::new(FakeDemuxer {
            tracks: media.tracks.iter().map(FakeTrack::info).collect(),
            duration: media.duration,
            chunks: media.chunks.into(),
        }))
    }

    fn create_decoder(&self, config: &DecoderConfig) -> media_bus::Result<Box<dyn Decoder>> {
        self.log().decoders.push(config.codec.clone());
        if self.options.reject_decoders.contains(&config.codec) {
            return Err(BusError::Unsupported(config.codec.clone()));
        }
        Ok(Box::new(FakeDecoder {
            layout: config.layout,
            delay: self.options.decode_delay,
            pending: VecDeque::new(),
        }))
    }

    fn create_encoder(&self, config: &EncoderConfig) -> media_bus::Result<Box<dyn Encoder>> {
        self.log().encoder_attempts.push(config.codec.clone());
        if self.options.reject_encoders.contains(&config.codec) {
            return Err(BusError::Unsupported(config.codec.clone()));
        }
        self.log().encoders.push(config.clone());
        Ok(Box::new(FakeEncoder {
            config: config.clone(),
            held: VecDeque::new(),
            out: VecDeque::new(),
            encoded: 0,
            swap: self.options.swap_output_pairs,
            fail_after: self.options.fail_encode_after,
        }))
    }

    fn create_muxer(&self, format: OutputFormat) -> media_bus::Result<Box<dyn Muxer>> {
        self.log().format = Some(format);
        Ok(Box::new(FakeMuxer {
            format,
            tracks: Vec::new(),
            started: false,
            chunks: Vec::new(),
            reject: self.options.reject_mux_codecs.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeDemuxer {
    tracks: Vec<TrackInfo>,
    duration: Option<f64>,
    chunks: VecDeque<FakeChunk>,
}

impl Demuxer for FakeDemuxer {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn read_chunk(&mut self) -> media_bus::Result<Option<(TrackId, Chunk)>> {
        Ok(self.chunks.pop_front().map(|c| {
            let kind = if c.key { ChunkType::Key } else { ChunkType::Delta };
            let chunk = Chunk::new(kind, c.ts, c.dur, vec![0u8; c.size]).with_composition_offset(c.cto);
            (c.track, chunk)
        }))
    }
}

struct FakeDecoder {
    layout: TrackLayout,
    delay: Duration,
    pending: VecDeque<Frame>,
}

impl Decoder for FakeDecoder {
    fn decode(&mut self, chunk: &Chunk) -> media_bus::Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let format = match self.layout {
            TrackLayout::Video { width, height } => FrameFormat::Video { width, height },
            TrackLayout::Audio {
                sample_rate,
                channels,
            } => FrameFormat::Audio {
                sample_rate,
                channels,
                samples: 1024,
            },
        };
        let ts = chunk.presentation_timestamp();
        self.pending
            .push_back(Frame::new(format, ts, chunk.duration, FakePicture(ts)));
        Ok(())
    }

    fn flush(&mut self) -> media_bus::Result<()> {
        Ok(())
    }

    fn receive_frame(&mut self) -> media_bus::Result<Option<Frame>> {
        Ok(self.pending.pop_front())
    }
}

struct FakeEncoder {
    config: EncoderConfig,
    held: VecDeque<Chunk>,
    out: VecDeque<Chunk>,
    encoded: usize,
    swap: bool,
    fail_after: Option<usize>,
}

impl FakeEncoder {
    fn release(&mut self, all: bool) {
        if self.swap {
            while self.held.len() >= 2 {
                let first = self.held.pop_front();
                let second = self.held.pop_front();
                self.out.extend(second);
                self.out.extend(first);
            }
        } else {
            while self.held.len() > 1 {
                self.out.extend(self.held.pop_front());
            }
        }
        if all {
            self.out.extend(self.held.drain(..));
        }
    }
}

impl Encoder for FakeEncoder {
    fn output_track(&self) -> OutputTrack {
        OutputTrack {
            codec: self.config.codec.clone(),
            layout: self.config.output,
            decoder_config: Some(Bytes::from_static(b"encoder-config")),
            frame_rate: self.config.frame_rate,
        }
    }

    fn encode(&mut self, frame: &Frame, timestamp: i64, duration: i64) -> media_bus::Result<()> {
        if frame.payload::<FakePicture>().is_none() {
            return Err(BusError::Encode("foreign frame".into()));
        }
        if self.fail_after.is_some_and(|n| self.encoded >= n) {
            return Err(BusError::Encode("fake encoder failure".into()));
        }
        let kind = if self.encoded % 30 == 0 {
            ChunkType::Key
        } else {
            ChunkType::Delta
        };
        let size = ((self.config.bitrate as i64 / 8) * duration.max(1) / 1_000_000).max(1);
        self.held
            .push_back(Chunk::new(kind, timestamp, duration, vec![0u8; size as usize]));
        self.encoded += 1;
        self.release(false);
        Ok(())
    }

    fn flush(&mut self) -> media_bus::Result<()> {
        self.release(true);
        Ok(())
    }

    fn receive_chunk(&mut self) -> media_bus::Result<Option<Chunk>> {
        Ok(self.out.pop_front())
    }
}

struct FakeMuxer {
    format: OutputFormat,
    tracks: Vec<OutputTrack>,
    started: bool,
    chunks: Vec<(usize, Chunk)>,
    reject: Vec<String>,
    log: Arc<Mutex<FakeLog>>,
}

impl Muxer for FakeMuxer {
    fn add_track(&mut self, track: &OutputTrack) -> media_bus::Result<usize> {
        self.tracks.push(track.clone());
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> media_bus::Result<()> {
        let codecs: Vec<String> = self.tracks.iter().map(|t| t.codec.clone()).collect();
        if let Ok(mut log) = self.log.lock() {
            log.mux_attempts.push(codecs.clone());
        }
        if let Some(rejected) = codecs.iter().find(|c| self.reject.contains(c)) {
            return Err(BusError::Unsupported(format!("tag {} rejected", rejected)));
        }
        self.started = true;
        Ok(())
    }

    fn write_chunk(&mut self, track: usize, chunk: &Chunk) -> media_bus::Result<()> {
        if !self.started {
            return Err(BusError::Mux("not started".into()));
        }
        if let Ok(mut log) = self.log.lock() {
            log.written.push((track, chunk.clone()));
        }
        self.chunks.push((track, chunk.clone()));
        Ok(())
    }

    fn finish(self: Box<Self>) -> media_bus::Result<Vec<u8>> {
        let mut media = FakeMedia::default();
        for (index, track) in self.tracks.iter().enumerate() {
            let id = index as TrackId + 1;
            let mut fake = match track.layout {
                TrackLayout::Video { width, height } => FakeTrack::video(id, &track.codec, width, height),
                TrackLayout::Audio {
                    sample_rate,
                    channels,
                } => FakeTrack::audio(id, &track.codec, sample_rate, channels),
            };
            fake.config = track.decoder_config.as_ref().map(|b| b.to_vec());
            fake.frame_rate = track.frame_rate;
            fake.sample_count = self.chunks.iter().filter(|(t, _)| *t == index).count() as u64;
            media.tracks.push(fake);
        }
        for (track, chunk) in &self.chunks {
            media.chunks.push(FakeChunk {
                track: *track as TrackId + 1,
                key: chunk.is_key(),
                ts: chunk.timestamp,
                cto: chunk.composition_offset,
                dur: chunk.duration,
                size: chunk.size(),
            });
        }
        Ok(media.to_bytes(self.format.container()))
    }
}

/// A 10 s 1920×1080 H.264 30 fps + AAC 48 kHz stereo file in MP4.
pub fn h264_aac_mp4() -> FakeMedia {
    let mut media = FakeMedia {
        duration: Some(10.0),
        ..FakeMedia::default()
    };
    let mut video = FakeTrack::video(1, "avc1.64001F", 1920, 1080);
    video.frame_rate = Some(30.0);
    media.tracks.push(video);
    media.tracks.push(FakeTrack::audio(2, "mp4a.40.2", 48_000, 2));
    media.push_chunks(1, 300, 33_333, 2_000, 30);
    media.push_chunks(2, 469, AUDIO_FRAME_US, 300, 1);
    media.interleave();
    media
}
