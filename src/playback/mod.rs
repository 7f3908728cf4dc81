//! Gapless playback scheduling on an output timeline.
//!
//! The scheduler keeps a cursor (`next_start_time`) on the output device's
//! clock and places each decoded buffer at `max(cursor, now)`, so chunks
//! play back-to-back without overlapping and never start in the past.

use crate::audio_capture::DeviceReady;
use crate::codec::PcmBuffer;
use crate::error::Result;
use std::collections::HashSet;
use tokio::sync::mpsc;

mod imp_cpal;

pub use imp_cpal::{list_output_devices, CpalOutput, CpalOutputConfig};

pub type ChunkId = u64;

/// An output device with a schedule-at-time primitive
pub trait AudioOutput: Send {
    /// Begin opening the device without waiting for it. Finished chunks are
    /// reported on the returned channel; [`DeviceReady`] resolves once the
    /// device is playing.
    fn open(&mut self) -> Result<(mpsc::UnboundedReceiver<ChunkId>, DeviceReady)>;

    fn is_open(&self) -> bool;

    /// Seconds elapsed on the device timeline since `open`
    fn current_time(&self) -> f64;

    fn schedule(&mut self, id: ChunkId, buffer: &PcmBuffer, start_at: f64) -> Result<()>;

    /// Stop a chunk immediately. No completion is reported for it.
    fn cancel(&mut self, id: ChunkId);

    /// Release the device. Safe to call when already closed.
    fn close(&mut self);
}

/// Placement of a chunk on the timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: ChunkId,
    pub start_at: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    next_start_time: f64,
    live: HashSet<ChunkId>,
    next_id: ChunkId,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            live: HashSet::new(),
            next_id: 0,
        }
    }

    pub fn open(&mut self) -> Result<(mpsc::UnboundedReceiver<ChunkId>, DeviceReady)> {
        self.live.clear();
        self.next_start_time = 0.0;
        self.output.open()
    }

    pub fn is_open(&self) -> bool {
        self.output.is_open()
    }

    /// Schedule a decoded buffer right after the previous one
    pub fn enqueue(&mut self, buffer: &PcmBuffer) -> Result<ScheduledChunk> {
        let now = self.output.current_time();
        let start_at = self.next_start_time.max(now);
        let duration = buffer.duration();

        self.next_id += 1;
        let id = self.next_id;
        self.output.schedule(id, buffer, start_at)?;

        self.next_start_time = start_at + duration;
        self.live.insert(id);

        log::debug!(
            "Playback: Chunk {} at {:.3}s for {:.3}s ({} live)",
            id,
            start_at,
            duration,
            self.live.len()
        );

        Ok(ScheduledChunk {
            id,
            start_at,
            duration,
        })
    }

    /// Record that a chunk finished. Returns true when this emptied the live set.
    pub fn on_chunk_ended(&mut self, id: ChunkId) -> bool {
        self.live.remove(&id) && self.live.is_empty()
    }

    /// Stop everything now and rewind the cursor. Returns the number of chunks stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.live.len();
        for id in self.live.drain() {
            self.output.cancel(id);
        }
        self.next_start_time = 0.0;
        if stopped > 0 {
            log::info!("Playback: Interrupted, {} chunks discarded", stopped);
        }
        stopped
    }

    /// Stop all chunks and release the output device
    pub fn close(&mut self) {
        self.interrupt();
        if self.output.is_open() {
            self.output.close();
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn live_chunks(&self) -> usize {
        self.live.len()
    }

    pub fn is_playing(&self) -> bool {
        !self.live.is_empty()
    }
}
