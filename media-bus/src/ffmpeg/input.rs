use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use ffmpeg_next::Rational;
use ffmpeg_next::util::mathematics::Rescale;

use super::codecs::codec_string;
use super::{MICROS, ff_error};
use crate::backend::Demuxer;
use crate::error::{BusError, Result};
use crate::packet::{Chunk, ChunkType, TrackId};
use crate::stream::{TrackInfo, TrackLayout};

pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    tracks: Vec<TrackInfo>,
    time_bases: HashMap<usize, Rational>,
    duration: Option<f64>,
}

impl AvInput {
    pub fn open(path: &Path) -> Result<Self> {
        let input = ffmpeg_next::format::input(path)
            .map_err(|e| BusError::Malformed(format!("{}: {}", path.display(), e)))?;

        let mut tracks = Vec::new();
        let mut time_bases = HashMap::new();
        for stream in input.streams() {
            let parameters = stream.parameters();
            let layout = unsafe {
                let ptr = parameters.as_ptr();
                match parameters.medium() {
                    ffmpeg_next::media::Type::Video => TrackLayout::Video {
                        width: (*ptr).width.max(0) as u32,
                        height: (*ptr).height.max(0) as u32,
                    },
                    ffmpeg_next::media::Type::Audio => TrackLayout::Audio {
                        sample_rate: (*ptr).sample_rate.max(0) as u32,
                        channels: (*ptr).ch_layout.nb_channels.max(0) as u16,
                    },
                    other => {
                        log::debug!("skipping stream {} of type {:?}", stream.index(), other);
                        continue;
                    }
                }
            };
            let (bitrate, decoder_config) = unsafe {
                let ptr = parameters.as_ptr();
                let config = if (*ptr).extradata.is_null() || (*ptr).extradata_size <= 0 {
                    None
                } else {
                    Some(Bytes::copy_from_slice(std::slice::from_raw_parts(
                        (*ptr).extradata,
                        (*ptr).extradata_size as usize,
                    )))
                };
                let bitrate = ((*ptr).bit_rate > 0).then_some((*ptr).bit_rate as u64);
                (bitrate, config)
            };
            let rate = stream.avg_frame_rate();
            let frame_rate = match layout {
                TrackLayout::Video { .. } if rate.numerator() > 0 && rate.denominator() > 0 => {
                    Some(f64::from(rate))
                }
                _ => None,
            };

            time_bases.insert(stream.index(), stream.time_base());
            tracks.push(TrackInfo {
                id: stream.index() as TrackId,
                codec: codec_string(&parameters),
                layout,
                frame_rate,
                sample_count: stream.frames().max(0) as u64,
                bitrate,
                decoder_config,
            });
        }

        let duration = (input.duration() > 0)
            .then(|| input.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE));

        Ok(Self {
            inner: input,
            tracks,
            time_bases,
            duration,
        })
    }
}

impl Demuxer for AvInput {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn read_chunk(&mut self) -> Result<Option<(TrackId, Chunk)>> {
        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(&mut self.inner) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(e) => return Err(ff_error(BusError::Malformed, e)),
            }
            let index = packet.stream();
            let Some(&time_base) = self.time_bases.get(&index) else {
                continue;
            };

            let dts = packet.dts().or(packet.pts()).unwrap_or(0);
            let pts = packet.pts().unwrap_or(dts);
            let timestamp = dts.rescale(time_base, MICROS);
            let composition_offset = pts.rescale(time_base, MICROS) - timestamp;
            let duration = packet.duration().rescale(time_base, MICROS);
            let kind = if packet.is_key() {
                ChunkType::Key
            } else {
                ChunkType::Delta
            };
            let data = Bytes::copy_from_slice(packet.data().unwrap_or_default());

            let chunk = Chunk::new(kind, timestamp, duration, data)
                .with_composition_offset(composition_offset);
            return Ok(Some((index as TrackId, chunk)));
        }
    }
}
