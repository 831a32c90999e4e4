use bytes::Bytes;

/// Track identifier as assigned by the source container.
pub type TrackId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Sync sample; decodable without prior chunks.
    Key,
    Delta,
}

/// One encoded access unit. Times are microseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub kind: ChunkType,
    /// Decode timestamp.
    pub timestamp: i64,
    /// Presentation time minus decode time (B-frames), usually 0.
    pub composition_offset: i64,
    pub duration: i64,
    pub data: Bytes,
    /// Decoder initialization bytes attached to this unit, if any.
    pub decoder_config: Option<Bytes>,
}

impl Chunk {
    pub fn new(kind: ChunkType, timestamp: i64, duration: i64, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            timestamp,
            composition_offset: 0,
            duration,
            data: data.into(),
            decoder_config: None,
        }
    }

    pub fn with_composition_offset(mut self, offset: i64) -> Self {
        self.composition_offset = offset;
        self
    }

    pub fn is_key(&self) -> bool {
        self.kind == ChunkType::Key
    }

    pub fn presentation_timestamp(&self) -> i64 {
        self.timestamp + self.composition_offset
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
