//! Single owner of the container writer.
//!
//! Chunks reach the coordinator from the demux stage (passthrough tracks)
//! and from encode stages. Nothing is written until every output track has
//! announced its parameters; until then chunks are held in arrival order.

use std::sync::Arc;

use bytes::Bytes;
use media_bus::{Chunk, CodecFamily, MediaBackend, Muxer, OutputFormat, OutputTrack};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TranscodeError;
use crate::media::cancel::checkpoint;

pub enum MuxCmd {
    /// Parameters of output track `slot`.
    Configure { slot: usize, track: OutputTrack },
    Data { slot: usize, chunk: Chunk },
    /// No more chunks for `slot`.
    EOF { slot: usize },
}

/// Container for a run. Audio-only runs pick an audio container by codec;
/// otherwise the requested one unless it cannot hold every codec.
pub fn select_output(
    requested: OutputFormat,
    audio_only: bool,
    families: &[CodecFamily],
) -> OutputFormat {
    let preferred = if audio_only {
        if families.contains(&CodecFamily::Opus) || families.contains(&CodecFamily::Vorbis) {
            OutputFormat::WebmAudio
        } else {
            OutputFormat::M4a
        }
    } else {
        requested
    };
    if families.iter().all(|f| preferred.carries(*f)) {
        preferred
    } else {
        log::info!(
            "{} cannot carry {:?}, writing matroska",
            preferred.extension(),
            families
        );
        OutputFormat::Matroska
    }
}

/// Finished output file.
#[derive(Clone, Debug)]
pub struct MuxOutput {
    pub data: Bytes,
    pub format: OutputFormat,
}

#[derive(Default)]
struct Slot {
    config: Option<OutputTrack>,
    ended: bool,
    muxer_index: Option<usize>,
    /// Sorted by timestamp.
    window: Vec<Chunk>,
    last_written: Option<i64>,
    written: u64,
}

pub struct MuxCoordinator {
    backend: Arc<dyn MediaBackend>,
    format: OutputFormat,
    slots: Vec<Slot>,
    pending: Vec<(usize, Chunk)>,
    muxer: Option<Box<dyn Muxer>>,
    reorder_window: usize,
}

impl MuxCoordinator {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        format: OutputFormat,
        slot_count: usize,
        reorder_window: usize,
    ) -> Self {
        Self {
            backend,
            format,
            slots: (0..slot_count).map(|_| Slot::default()).collect(),
            pending: Vec::new(),
            muxer: None,
            reorder_window,
        }
    }

    pub fn is_started(&self) -> bool {
        self.muxer.is_some()
    }

    fn slot(&mut self, slot: usize) -> Result<&mut Slot, TranscodeError> {
        self.slots
            .get_mut(slot)
            .ok_or_else(|| TranscodeError::Transcode(format!("unknown output track {}", slot)))
    }

    pub fn configure(&mut self, slot: usize, track: OutputTrack) -> Result<(), TranscodeError> {
        let entry = self.slot(slot)?;
        if entry.config.is_some() {
            log::warn!("output track {} configured twice, keeping the first", slot);
            return Ok(());
        }
        log::debug!("output track {}: {} {:?}", slot, track.codec, track.layout);
        entry.config = Some(track);
        self.try_start()
    }

    pub fn push(&mut self, slot: usize, chunk: Chunk) -> Result<(), TranscodeError> {
        self.slot(slot)?;
        if self.muxer.is_none() {
            self.pending.push((slot, chunk));
            return Ok(());
        }
        self.enqueue(slot, chunk)
    }

    pub fn end(&mut self, slot: usize) -> Result<(), TranscodeError> {
        let entry = self.slot(slot)?;
        entry.ended = true;
        if entry.config.is_none() {
            log::warn!("output track {} ended without output, dropping it", slot);
        }
        self.try_start()?;
        if self.muxer.is_some() {
            self.flush_window(slot)?;
        }
        Ok(())
    }

    pub fn handle(&mut self, cmd: MuxCmd) -> Result<(), TranscodeError> {
        match cmd {
            MuxCmd::Configure { slot, track } => self.configure(slot, track),
            MuxCmd::Data { slot, chunk } => self.push(slot, chunk),
            MuxCmd::EOF { slot } => self.end(slot),
        }
    }

    fn all_ended(&self) -> bool {
        self.slots.iter().all(|s| s.ended)
    }

    fn try_start(&mut self) -> Result<(), TranscodeError> {
        if self.muxer.is_some() || !self.slots.iter().all(|s| s.config.is_some() || s.ended) {
            return Ok(());
        }
        if self.slots.iter().all(|s| s.config.is_none()) {
            // Every track ended empty; `finish` reports it.
            return Ok(());
        }

        let muxer = match self.open_muxer(false) {
            Ok(muxer) => muxer,
            Err(e) if e.is_unsupported() => {
                log::warn!("{} rejected the tracks ({}), retrying with canonical tags", self.format, e);
                self.open_muxer(true).map_err(|e| {
                    if e.is_unsupported() {
                        TranscodeError::MuxerConfig(e.to_string())
                    } else {
                        e.into()
                    }
                })?
            }
            Err(e) => return Err(e.into()),
        };
        log::info!("writing {}", self.format);
        self.muxer = Some(muxer);

        for (slot, chunk) in std::mem::take(&mut self.pending) {
            self.enqueue(slot, chunk)?;
        }
        for slot in 0..self.slots.len() {
            if self.slots[slot].ended {
                self.flush_window(slot)?;
            }
        }
        Ok(())
    }

    fn open_muxer(&mut self, canonical: bool) -> media_bus::Result<Box<dyn Muxer>> {
        let mut muxer = self.backend.create_muxer(self.format)?;
        for slot in self.slots.iter_mut() {
            slot.muxer_index = None;
            let Some(config) = slot.config.as_ref() else {
                continue;
            };
            let mut track = config.clone();
            if canonical {
                if let Some(tag) = CodecFamily::parse(&track.codec).canonical_tag() {
                    track.codec = tag.to_string();
                }
            }
            slot.muxer_index = Some(muxer.add_track(&track)?);
        }
        muxer.start()?;
        Ok(muxer)
    }

    fn enqueue(&mut self, slot: usize, chunk: Chunk) -> Result<(), TranscodeError> {
        let entry = self.slot(slot)?;
        if entry.muxer_index.is_none() {
            return Ok(());
        }
        let at = entry
            .window
            .partition_point(|c| c.timestamp <= chunk.timestamp);
        entry.window.insert(at, chunk);
        while self.slots[slot].window.len() > self.reorder_window {
            let oldest = self.slots[slot].window.remove(0);
            self.write(slot, oldest)?;
        }
        Ok(())
    }

    fn flush_window(&mut self, slot: usize) -> Result<(), TranscodeError> {
        let window = std::mem::take(&mut self.slot(slot)?.window);
        for chunk in window {
            self.write(slot, chunk)?;
        }
        Ok(())
    }

    fn write(&mut self, slot: usize, mut chunk: Chunk) -> Result<(), TranscodeError> {
        let Some(muxer) = self.muxer.as_mut() else {
            return Err(TranscodeError::Transcode("writer not started".into()));
        };
        let entry = &mut self.slots[slot];
        let (Some(index), Some(config)) = (entry.muxer_index, entry.config.as_ref()) else {
            return Ok(());
        };

        // Decode times leaving the coordinator strictly increase per track.
        if let Some(last) = entry.last_written.filter(|last| chunk.timestamp <= *last) {
            let next = last + 1;
            log::debug!(
                "output track {}: chunk at {} not after {}, moved to {}",
                slot,
                chunk.timestamp,
                last,
                next
            );
            let pts = chunk.presentation_timestamp();
            chunk.timestamp = next;
            chunk.composition_offset = (pts - next).max(0);
        }
        if (entry.written == 0 || chunk.is_key()) && chunk.decoder_config.is_none() {
            chunk.decoder_config = config.decoder_config.clone();
        }

        muxer.write_chunk(index, &chunk)?;
        entry.last_written = Some(chunk.timestamp);
        entry.written += 1;
        Ok(())
    }

    /// Writes whatever is still held and closes the container.
    pub fn finish(mut self) -> Result<MuxOutput, TranscodeError> {
        if self.muxer.is_none() {
            self.try_start()?;
        }
        if self.muxer.is_some() {
            for slot in 0..self.slots.len() {
                self.flush_window(slot)?;
            }
        }
        let Some(muxer) = self.muxer.take() else {
            return Err(TranscodeError::Transcode("no track produced output".into()));
        };
        let written: u64 = self.slots.iter().map(|s| s.written).sum();
        let data = muxer.finish()?;
        log::info!(
            "{} finished: {} chunks, {} bytes",
            self.format,
            written,
            data.len()
        );
        Ok(MuxOutput {
            data: Bytes::from(data),
            format: self.format,
        })
    }

    /// Consumes commands until every track has ended, then finalizes.
    /// Nothing is written once `cancel` fires.
    pub fn run(
        mut self,
        mut rx: mpsc::Receiver<MuxCmd>,
        cancel: CancellationToken,
    ) -> Result<MuxOutput, TranscodeError> {
        while !self.all_ended() {
            let Some(cmd) = rx.blocking_recv() else {
                return Err(TranscodeError::Cancel);
            };
            checkpoint(&cancel)?;
            self.handle(cmd)?;
        }
        checkpoint(&cancel)?;
        self.finish()
    }
}

#[cfg(test)]
#[path = "mux_test.rs"]
mod mux_test;
