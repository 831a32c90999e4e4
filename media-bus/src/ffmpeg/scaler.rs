use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::software::scaling;
use ffmpeg_next::{ChannelLayout, frame};

use super::ff_error;
use crate::error::{BusError, Result};

/// Pixel format and size conversion in front of a video encoder.
pub struct Scaler {
    context: scaling::Context,
    source: (Pixel, u32, u32),
}

impl Scaler {
    pub fn new(
        source: (Pixel, u32, u32),
        format: Pixel,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let context = scaling::Context::get(
            source.0,
            source.1,
            source.2,
            format,
            width,
            height,
            scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| ff_error(BusError::Encode, e))?;
        Ok(Self { context, source })
    }

    /// Whether this scaler was built for frames shaped like `input`.
    pub fn accepts(&self, input: &frame::Video) -> bool {
        self.source == (input.format(), input.width(), input.height())
    }

    pub fn run(&mut self, input: &frame::Video) -> Result<frame::Video> {
        let mut converted = frame::Video::empty();
        self.context
            .run(input, &mut converted)
            .map_err(|e| ff_error(BusError::Encode, e))?;
        Ok(converted)
    }
}

unsafe impl Send for Scaler {}

/// Resamples decoded audio to planar float at the encoder's rate and layout
/// and re-blocks it into frames of exactly the encoder's frame size.
pub struct Resampler {
    context: ffmpeg_next::software::resampling::Context,
    layout: ChannelLayout,
    rate: u32,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input: &frame::Audio, rate: u32, channels: u16) -> Result<Self> {
        let layout = ChannelLayout::default(i32::from(channels));
        let input_layout = if input.channel_layout().channels() > 0 {
            input.channel_layout()
        } else {
            ChannelLayout::default(i32::from(input.channels()))
        };
        let context = ffmpeg_next::software::resampling::Context::get(
            input.format(),
            input_layout,
            input.rate(),
            Sample::F32(ffmpeg_next::format::sample::Type::Planar),
            layout.clone(),
            rate,
        )
        .map_err(|e| ff_error(BusError::Encode, e))?;
        Ok(Self {
            context,
            layout,
            rate,
            channels: usize::from(channels),
            pending: vec![Vec::new(); usize::from(channels)],
        })
    }

    pub fn push(&mut self, input: &frame::Audio) -> Result<()> {
        // Room for the rate change plus whatever the resampler held back.
        let capacity = input.samples() * self.rate as usize / input.rate().max(1) as usize + 256;
        let mut output = self.output_frame(capacity);
        self.context
            .run(input, &mut output)
            .map_err(|e| ff_error(BusError::Encode, e))?;
        self.append(&output);
        Ok(())
    }

    /// Pulls the samples still held by the resampler at end of input.
    pub fn drain(&mut self) -> Result<()> {
        let mut output = self.output_frame(4096);
        self.context
            .flush(&mut output)
            .map_err(|e| ff_error(BusError::Encode, e))?;
        self.append(&output);
        Ok(())
    }

    fn output_frame(&self, capacity: usize) -> frame::Audio {
        let mut output = frame::Audio::empty();
        unsafe {
            output.alloc(
                Sample::F32(ffmpeg_next::format::sample::Type::Planar),
                capacity,
                self.layout.clone(),
            );
        }
        output
    }

    fn append(&mut self, output: &frame::Audio) {
        for (channel, pending) in self.pending.iter_mut().enumerate() {
            pending.extend_from_slice(&output.plane::<f32>(channel)[..output.samples()]);
        }
    }

    pub fn buffered(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    /// Takes up to `samples` buffered samples as a frame in `format`.
    pub fn take(&mut self, samples: usize, format: Sample) -> frame::Audio {
        let samples = samples.min(self.buffered());
        let mut frame = frame::Audio::new(format, samples, self.layout.clone());
        frame.set_rate(self.rate);
        let taken: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|pending| pending.drain(..samples).collect())
            .collect();
        if format.is_planar() {
            for (channel, data) in taken.iter().enumerate() {
                frame.plane_mut::<f32>(channel)[..samples].copy_from_slice(data);
            }
        } else {
            let bytes = frame.data_mut(0);
            for i in 0..samples {
                for (channel, data) in taken.iter().enumerate() {
                    let offset = (i * self.channels + channel) * 4;
                    bytes[offset..offset + 4].copy_from_slice(&data[i].to_ne_bytes());
                }
            }
        }
        frame
    }
}
