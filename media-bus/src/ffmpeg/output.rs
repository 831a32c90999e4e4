use ffmpeg_next::Rational;
use ffmpeg_next::codec::Parameters;
use ffmpeg_next::util::mathematics::Rescale;
use tempfile::NamedTempFile;

use super::codecs::{codec_id, muxer_name, set_extradata};
use super::{MICROS, ff_error};
use crate::backend::{Muxer, OutputTrack};
use crate::codec::{CodecFamily, sample_entry, sample_entry_fourcc};
use crate::container::OutputFormat;
use crate::error::{BusError, Result};
use crate::packet::Chunk;
use crate::stream::TrackLayout;

/// Muxes into a temporary file and hands back its bytes on finish.
pub struct AvOutput {
    format: OutputFormat,
    file: NamedTempFile,
    tracks: Vec<OutputTrack>,
    inner: Option<ffmpeg_next::format::context::Output>,
    time_bases: Vec<Rational>,
    have_written_trailer: bool,
}

impl AvOutput {
    pub fn new(format: OutputFormat) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("lite-transcode-")
            .suffix(&format!(".{}", format.extension()))
            .tempfile()?;
        Ok(Self {
            format,
            file,
            tracks: Vec::new(),
            inner: None,
            time_bases: Vec::new(),
            have_written_trailer: false,
        })
    }

    fn parameters(&self, track: &OutputTrack) -> Result<Parameters> {
        let family = CodecFamily::parse(&track.codec);
        let id = codec_id(family)
            .ok_or_else(|| BusError::Unsupported(format!("unknown codec {}", track.codec)))?;
        let mut parameters = Parameters::new();
        unsafe {
            let ptr = parameters.as_mut_ptr();
            (*ptr).codec_id = id.into();
            (*ptr).codec_tag = self.codec_tag(&track.codec);
            match track.layout {
                TrackLayout::Video { width, height } => {
                    (*ptr).codec_type = ffmpeg_next::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
                    (*ptr).width = width as i32;
                    (*ptr).height = height as i32;
                    (*ptr).format = ffmpeg_next::ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
                }
                TrackLayout::Audio {
                    sample_rate,
                    channels,
                } => {
                    (*ptr).codec_type = ffmpeg_next::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
                    (*ptr).sample_rate = sample_rate as i32;
                    ffmpeg_next::ffi::av_channel_layout_default(
                        &mut (*ptr).ch_layout,
                        i32::from(channels),
                    );
                }
            }
            if let Some(config) = &track.decoder_config {
                set_extradata(&mut (*ptr).extradata, &mut (*ptr).extradata_size, config);
            }
        }
        Ok(parameters)
    }

    fn codec_tag(&self, codec: &str) -> u32 {
        let iso = matches!(
            self.format,
            OutputFormat::Mp4 | OutputFormat::M4a | OutputFormat::QuickTime
        );
        match sample_entry(codec) {
            Some(entry) if iso => sample_entry_fourcc(entry),
            _ => 0,
        }
    }
}

impl Muxer for AvOutput {
    fn add_track(&mut self, track: &OutputTrack) -> Result<usize> {
        if self.inner.is_some() {
            return Err(BusError::Mux("tracks must be added before start".into()));
        }
        self.tracks.push(track.clone());
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<()> {
        let mut output = ffmpeg_next::format::output_as(self.file.path(), muxer_name(self.format))
            .map_err(|e| ff_error(BusError::Mux, e))?;

        for track in &self.tracks {
            let parameters = self.parameters(track)?;
            let mut stream = output
                .add_stream(ffmpeg_next::encoder::find(parameters.id()))
                .map_err(|e| ff_error(BusError::Mux, e))?;
            stream.set_parameters(parameters);
            stream.set_time_base(MICROS);
            if let Some(rate) = track.frame_rate {
                stream.set_avg_frame_rate(Rational::from(rate));
            }
        }

        // A rejected codec tag surfaces here; callers retry with canonical tags.
        output
            .write_header()
            .map_err(|e| ff_error(BusError::Unsupported, e))?;

        self.time_bases = output.streams().map(|s| s.time_base()).collect();
        self.inner = Some(output);
        Ok(())
    }

    fn write_chunk(&mut self, track: usize, chunk: &Chunk) -> Result<()> {
        let output = self
            .inner
            .as_mut()
            .ok_or_else(|| BusError::Mux("muxer not started".into()))?;
        let time_base = *self
            .time_bases
            .get(track)
            .ok_or_else(|| BusError::Mux(format!("track {} not found", track)))?;

        let mut packet = ffmpeg_next::Packet::copy(&chunk.data);
        packet.set_stream(track);
        packet.set_dts(Some(chunk.timestamp.rescale(MICROS, time_base)));
        packet.set_pts(Some(chunk.presentation_timestamp().rescale(MICROS, time_base)));
        packet.set_duration(chunk.duration.rescale(MICROS, time_base));
        packet.set_position(-1);
        if chunk.is_key() {
            packet.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        packet
            .write(output)
            .map_err(|e| ff_error(BusError::Mux, e))?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        if let Some(mut output) = self.inner.take() {
            if !self.have_written_trailer {
                self.have_written_trailer = true;
                output
                    .write_trailer()
                    .map_err(|e| ff_error(BusError::Mux, e))?;
            }
        }
        Ok(std::fs::read(self.file.path())?)
    }
}
