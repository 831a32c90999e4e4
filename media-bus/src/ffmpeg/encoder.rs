use bytes::Bytes;
use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::util::mathematics::Rescale;
use ffmpeg_next::{ChannelLayout, Dictionary, Rational, frame};

use super::codecs::{encoder_candidates, h264_profile, is_hardware};
use super::decoder::is_drained;
use super::scaler::{Resampler, Scaler};
use super::{MICROS, ff_error};
use crate::backend::{Encoder, EncoderConfig, OutputTrack};
use crate::codec::CodecFamily;
use crate::error::{BusError, Result};
use crate::frame::Frame;
use crate::packet::{Chunk, ChunkType};
use crate::stream::TrackLayout;

/// Seconds between forced key frames.
const KEYFRAME_SECONDS: f64 = 2.0;
/// Frame size used when the audio encoder accepts any size.
const DEFAULT_AUDIO_FRAME: usize = 1024;

enum EncoderType {
    Video {
        encoder: ffmpeg_next::encoder::video::Encoder,
        scaler: Option<Scaler>,
    },
    Audio {
        encoder: ffmpeg_next::encoder::audio::Encoder,
        resampler: Option<Resampler>,
        format: Sample,
        frame_size: usize,
        next_pts: Option<i64>,
    },
}

pub struct AvEncoder {
    inner: EncoderType,
    time_base: Rational,
    output: OutputTrack,
}

impl AvEncoder {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        let family = CodecFamily::parse(&config.codec);
        let candidates = encoder_candidates(family, matches!(config.output, TrackLayout::Video { .. }));
        if candidates.is_empty() {
            return Err(BusError::Unsupported(format!(
                "no encoder for {}",
                config.codec
            )));
        }

        // Hardware encoders are listed first; any that fail to open fall
        // through to the next candidate.
        let mut last_error = None;
        for codec in candidates {
            let name = codec.name().to_string();
            match Self::open(codec, config) {
                Ok(encoder) => {
                    log::info!("encoder opened: {} for {}", name, config.codec);
                    return Ok(encoder);
                }
                Err(e) => {
                    log::warn!("encoder {} failed to open for {}: {}", name, config.codec, e);
                    last_error = Some(e);
                }
            }
        }
        Err(BusError::Unsupported(format!(
            "{}: {}",
            config.codec,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn open(codec: ffmpeg_next::Codec, config: &EncoderConfig) -> Result<Self> {
        let context = ffmpeg_next::codec::Context::new_with_codec(codec);
        let unsupported = |e| ff_error(BusError::Unsupported, e);

        let (inner, time_base) = match config.output {
            TrackLayout::Video { width, height } => {
                let mut encoder = context.encoder().video().map_err(unsupported)?;
                let frame_rate = config.frame_rate.filter(|r| *r > 0.0).unwrap_or(30.0);
                encoder.set_width(width);
                encoder.set_height(height);
                encoder.set_format(if is_hardware(codec.name()) {
                    Pixel::NV12
                } else {
                    Pixel::YUV420P
                });
                encoder.set_frame_rate(Some(Rational::from(frame_rate)));
                encoder.set_time_base(MICROS);
                encoder.set_bit_rate(config.bitrate as usize);
                encoder.set_gop((frame_rate * KEYFRAME_SECONDS).round().max(1.0) as u32);
                encoder.set_max_b_frames(0);
                encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);

                let mut opts = Dictionary::new();
                if codec.name() == "libx264" {
                    opts.set("preset", "veryfast");
                    if let Some(profile) = h264_profile(&config.codec) {
                        opts.set("profile", profile);
                    }
                }
                let encoder = encoder.open_with(opts).map_err(unsupported)?;
                let time_base = encoder.time_base();
                (
                    EncoderType::Video {
                        encoder,
                        scaler: None,
                    },
                    time_base,
                )
            }
            TrackLayout::Audio {
                sample_rate,
                channels,
            } => {
                let mut encoder = context.encoder().audio().map_err(unsupported)?;
                let format = codec
                    .audio()
                    .ok()
                    .and_then(|audio| audio.formats())
                    .and_then(|mut formats| {
                        formats.find(|f| matches!(f, Sample::F32(_)))
                    })
                    .ok_or_else(|| {
                        BusError::Unsupported(format!("{} takes no float samples", codec.name()))
                    })?;
                encoder.set_rate(sample_rate as i32);
                encoder.set_channel_layout(ChannelLayout::default(i32::from(channels)));
                encoder.set_format(format);
                encoder.set_bit_rate(config.bitrate as usize);
                encoder.set_time_base(Rational(1, sample_rate as i32));
                encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);

                let encoder = encoder.open_with(Dictionary::new()).map_err(unsupported)?;
                let frame_size = match encoder.frame_size() {
                    0 => DEFAULT_AUDIO_FRAME,
                    n => n as usize,
                };
                let time_base = encoder.time_base();
                (
                    EncoderType::Audio {
                        encoder,
                        resampler: None,
                        format,
                        frame_size,
                        next_pts: None,
                    },
                    time_base,
                )
            }
        };

        let decoder_config = unsafe {
            let ptr = match &inner {
                EncoderType::Video { encoder, .. } => encoder.as_ptr(),
                EncoderType::Audio { encoder, .. } => encoder.as_ptr(),
            };
            if (*ptr).extradata.is_null() || (*ptr).extradata_size <= 0 {
                None
            } else {
                Some(Bytes::copy_from_slice(std::slice::from_raw_parts(
                    (*ptr).extradata,
                    (*ptr).extradata_size as usize,
                )))
            }
        };

        Ok(Self {
            inner,
            time_base,
            output: OutputTrack {
                codec: config.codec.clone(),
                layout: config.output,
                decoder_config,
                frame_rate: config.frame_rate,
            },
        })
    }

    fn send_audio(
        encoder: &mut ffmpeg_next::encoder::audio::Encoder,
        resampler: &mut Resampler,
        format: Sample,
        samples: usize,
        next_pts: &mut i64,
    ) -> Result<()> {
        let mut block = resampler.take(samples, format);
        block.set_pts(Some(*next_pts));
        *next_pts += block.samples() as i64;
        encoder
            .send_frame(&block)
            .map_err(|e| ff_error(BusError::Encode, e))
    }
}

impl Encoder for AvEncoder {
    fn output_track(&self) -> OutputTrack {
        self.output.clone()
    }

    fn encode(&mut self, frame: &Frame, timestamp: i64, _duration: i64) -> Result<()> {
        match &mut self.inner {
            EncoderType::Video { encoder, scaler } => {
                let source = frame
                    .payload::<frame::Video>()
                    .ok_or_else(|| BusError::Encode("frame is not an FFmpeg picture".into()))?;
                let needs_scaling = source.format() != encoder.format()
                    || source.width() != encoder.width()
                    || source.height() != encoder.height();
                let mut picture = if needs_scaling {
                    if !scaler.as_ref().is_some_and(|s| s.accepts(source)) {
                        *scaler = Some(Scaler::new(
                            (source.format(), source.width(), source.height()),
                            encoder.format(),
                            encoder.width(),
                            encoder.height(),
                        )?);
                    }
                    match scaler.as_mut() {
                        Some(scaler) => scaler.run(source)?,
                        None => source.clone(),
                    }
                } else {
                    source.clone()
                };
                picture.set_pts(Some(timestamp.rescale(MICROS, self.time_base)));
                encoder
                    .send_frame(&picture)
                    .map_err(|e| ff_error(BusError::Encode, e))
            }
            EncoderType::Audio {
                encoder,
                resampler,
                format,
                frame_size,
                next_pts,
            } => {
                let source = frame
                    .payload::<frame::Audio>()
                    .ok_or_else(|| BusError::Encode("frame is not FFmpeg audio".into()))?;
                let rate = encoder.rate();
                if resampler.is_none() {
                    *resampler = Some(Resampler::new(source, rate, encoder.channels())?);
                }
                let Some(resampler) = resampler.as_mut() else {
                    return Ok(());
                };
                let next_pts =
                    next_pts.get_or_insert_with(|| timestamp.rescale(MICROS, Rational(1, rate as i32)));
                resampler.push(source)?;
                while resampler.buffered() >= *frame_size {
                    Self::send_audio(encoder, resampler, *format, *frame_size, next_pts)?;
                }
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.inner {
            EncoderType::Video { encoder, .. } => encoder
                .send_eof()
                .map_err(|e| ff_error(BusError::Encode, e)),
            EncoderType::Audio {
                encoder,
                resampler,
                format,
                frame_size,
                next_pts,
            } => {
                if let (Some(resampler), Some(next_pts)) = (resampler.as_mut(), next_pts.as_mut()) {
                    resampler.drain()?;
                    while resampler.buffered() > 0 {
                        Self::send_audio(encoder, resampler, *format, *frame_size, next_pts)?;
                    }
                }
                encoder
                    .send_eof()
                    .map_err(|e| ff_error(BusError::Encode, e))
            }
        }
    }

    fn receive_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut packet = ffmpeg_next::Packet::empty();
        let received = match &mut self.inner {
            EncoderType::Video { encoder, .. } => encoder.receive_packet(&mut packet),
            EncoderType::Audio { encoder, .. } => encoder.receive_packet(&mut packet),
        };
        match received {
            Ok(()) => {
                let pts = packet.pts().unwrap_or(0).rescale(self.time_base, MICROS);
                let dts = packet
                    .dts()
                    .map(|dts| dts.rescale(self.time_base, MICROS))
                    .unwrap_or(pts);
                let duration = packet.duration().rescale(self.time_base, MICROS);
                let kind = if packet.is_key() {
                    ChunkType::Key
                } else {
                    ChunkType::Delta
                };
                let data = Bytes::copy_from_slice(packet.data().unwrap_or_default());
                Ok(Some(
                    Chunk::new(kind, dts, duration, data).with_composition_offset(pts - dts),
                ))
            }
            Err(e) if is_drained(&e) => Ok(None),
            Err(e) => Err(ff_error(BusError::Encode, e)),
        }
    }
}
