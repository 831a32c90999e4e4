use std::any::Any;
use std::fmt;

/// Shape of a decoded unit, as reported by the decoder at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Video {
        width: u32,
        height: u32,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        samples: usize,
    },
}

/// A decoded video picture or block of audio samples.
///
/// The sample data itself is backend specific and travels as an opaque
/// payload; only the backend that produced a frame can encode it.
pub struct Frame {
    pub format: FrameFormat,
    /// Presentation timestamp, microseconds.
    pub timestamp: i64,
    pub duration: i64,
    payload: Box<dyn Any + Send>,
}

impl Frame {
    pub fn new<P: Any + Send>(format: FrameFormat, timestamp: i64, duration: i64, payload: P) -> Self {
        Self {
            format,
            timestamp,
            duration,
            payload: Box::new(payload),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self.format, FrameFormat::Video { .. })
    }

    pub fn payload<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}
