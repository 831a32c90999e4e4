use super::codecs::{codec_id, set_extradata};
use super::{MICROS, ff_error};
use crate::backend::{Decoder, DecoderConfig};
use crate::codec::CodecFamily;
use crate::error::{BusError, Result};
use crate::frame::{Frame, FrameFormat};
use crate::packet::Chunk;
use crate::stream::TrackLayout;

enum DecoderType {
    Video(ffmpeg_next::decoder::Video),
    Audio(ffmpeg_next::decoder::Audio),
}

pub struct AvDecoder {
    inner: DecoderType,
    /// Duration stamped on video frames when the decoder reports none.
    frame_duration: i64,
}

impl AvDecoder {
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        let family = CodecFamily::parse(&config.codec);
        let codec = codec_id(family)
            .and_then(ffmpeg_next::decoder::find)
            .ok_or_else(|| BusError::Unsupported(format!("no decoder for {}", config.codec)))?;

        let mut context = ffmpeg_next::codec::Context::new_with_codec(codec);
        unsafe {
            let ptr = context.as_mut_ptr();
            match config.layout {
                TrackLayout::Video { width, height } => {
                    (*ptr).width = width as i32;
                    (*ptr).height = height as i32;
                }
                TrackLayout::Audio {
                    sample_rate,
                    channels,
                } => {
                    (*ptr).sample_rate = sample_rate as i32;
                    ffmpeg_next::ffi::av_channel_layout_default(
                        &mut (*ptr).ch_layout,
                        i32::from(channels),
                    );
                }
            }
            if let Some(description) = &config.description {
                set_extradata(&mut (*ptr).extradata, &mut (*ptr).extradata_size, description);
            }
        }

        let mut decoder = context.decoder();
        decoder.set_packet_time_base(MICROS);
        let inner = match config.layout {
            TrackLayout::Video { .. } => DecoderType::Video(
                decoder
                    .video()
                    .map_err(|e| ff_error(BusError::Unsupported, e))?,
            ),
            TrackLayout::Audio { .. } => DecoderType::Audio(
                decoder
                    .audio()
                    .map_err(|e| ff_error(BusError::Unsupported, e))?,
            ),
        };
        log::debug!("opened decoder {} for {}", codec.name(), config.codec);

        Ok(Self {
            inner,
            frame_duration: 0,
        })
    }
}

impl Decoder for AvDecoder {
    fn decode(&mut self, chunk: &Chunk) -> Result<()> {
        let mut packet = ffmpeg_next::Packet::copy(&chunk.data);
        packet.set_dts(Some(chunk.timestamp));
        packet.set_pts(Some(chunk.presentation_timestamp()));
        packet.set_duration(chunk.duration);
        if chunk.is_key() {
            packet.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        if chunk.duration > 0 {
            self.frame_duration = chunk.duration;
        }
        let sent = match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_packet(&packet),
            DecoderType::Audio(decoder) => decoder.send_packet(&packet),
        };
        sent.map_err(|e| ff_error(BusError::Decode, e))
    }

    fn flush(&mut self) -> Result<()> {
        let sent = match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_eof(),
            DecoderType::Audio(decoder) => decoder.send_eof(),
        };
        sent.map_err(|e| ff_error(BusError::Decode, e))
    }

    fn receive_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.inner {
            DecoderType::Video(decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        let timestamp = frame.timestamp().or(frame.pts()).unwrap_or(0);
                        let duration = unsafe { (*frame.as_ptr()).duration };
                        let duration = if duration > 0 {
                            duration
                        } else {
                            self.frame_duration
                        };
                        let format = FrameFormat::Video {
                            width: frame.width(),
                            height: frame.height(),
                        };
                        Ok(Some(Frame::new(format, timestamp, duration, frame)))
                    }
                    Err(e) if is_drained(&e) => Ok(None),
                    Err(e) => Err(ff_error(BusError::Decode, e)),
                }
            }
            DecoderType::Audio(decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        let timestamp = frame.timestamp().or(frame.pts()).unwrap_or(0);
                        let rate = frame.rate().max(1);
                        let duration = frame.samples() as i64 * 1_000_000 / i64::from(rate);
                        let format = FrameFormat::Audio {
                            sample_rate: frame.rate(),
                            channels: frame.channels(),
                            samples: frame.samples(),
                        };
                        Ok(Some(Frame::new(format, timestamp, duration, frame)))
                    }
                    Err(e) if is_drained(&e) => Ok(None),
                    Err(e) => Err(ff_error(BusError::Decode, e)),
                }
            }
        }
    }
}

pub(super) fn is_drained(error: &ffmpeg_next::Error) -> bool {
    match error {
        ffmpeg_next::Error::Eof => true,
        ffmpeg_next::Error::Other { errno } => *errno == ffmpeg_next::util::error::EAGAIN,
        _ => false,
    }
}
