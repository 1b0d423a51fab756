//! # Playback Queue & Scheduler
//!
//! FIFO of received speech chunks played one at a time through an `AudioOutput`.
//!
//! ## Scheduling Model:
//! - At most one node is active; the queue never contains the playing chunk
//! - The next chunk starts from inside the previous node's completion
//!   (`on_node_ended`), never from a polling loop, so chunks butt up against
//!   each other without gaps
//! - `stop_all` is the only cancellation path: it empties the queue and stops
//!   the active node in one step
//!
//! Completions carry the `NodeId` they were started with. A completion for any
//! node other than the active one is stale (the node was stopped or replaced)
//! and is ignored.

use std::collections::VecDeque;
use tracing::{debug, trace, warn};

use super::pcm::decode_pcm16_le;
use super::{AudioOutput, NodeId, PlaybackError, PlaybackNode};

struct ActiveNode {
    id: NodeId,
    handle: Box<dyn PlaybackNode>,
}

/// Counters kept for the lifetime of the scheduler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStats {
    pub chunks_enqueued: u64,
    pub chunks_played: u64,
    pub chunks_skipped: u64,
    pub chunks_flushed: u64,
}

/// What `stop_all` actually did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StopSummary {
    pub flushed_chunks: usize,
    pub stopped_node: Option<NodeId>,
}

impl StopSummary {
    pub fn is_noop(&self) -> bool {
        self.flushed_chunks == 0 && self.stopped_node.is_none()
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    sample_rate: u32,
    queue: VecDeque<Vec<u8>>,
    active: Option<ActiveNode>,
    next_node: u64,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            queue: VecDeque::new(),
            active: None,
            next_node: 1,
            stats: PlaybackStats::default(),
        }
    }

    /// A node is playing. This is the "AI speaking" signal.
    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_node(&self) -> Option<NodeId> {
        self.active.as_ref().map(|node| node.id)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = PlaybackStats::default();
    }

    /// Rate used for chunks started from now on.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    /// Append a raw 16-bit LE PCM chunk; start it immediately if nothing is playing.
    pub fn enqueue(&mut self, chunk: Vec<u8>) {
        self.stats.chunks_enqueued += 1;
        self.queue.push_back(chunk);
        trace!(queued = self.queue.len(), "Chunk enqueued");

        if self.active.is_none() {
            self.play_next();
        }
    }

    /// Start the head of the queue. Chunks that cannot be played are skipped
    /// until one starts or the queue runs dry, in which case playback goes idle.
    pub fn play_next(&mut self) -> Option<NodeId> {
        if let Some(active) = &self.active {
            return Some(active.id);
        }

        while let Some(chunk) = self.queue.pop_front() {
            let id = NodeId(self.next_node);
            self.next_node += 1;

            match self.start_chunk(id, &chunk) {
                Ok(handle) => {
                    self.stats.chunks_played += 1;
                    self.active = Some(ActiveNode { id, handle });
                    debug!(node = %id, bytes = chunk.len(), queued = self.queue.len(), "Playback node started");
                    return Some(id);
                }
                Err(err) => {
                    self.stats.chunks_skipped += 1;
                    warn!(node = %id, error = %err, "Skipping unplayable chunk");
                }
            }
        }

        debug!("Playback queue drained");
        None
    }

    fn start_chunk(&mut self, id: NodeId, chunk: &[u8]) -> Result<Box<dyn PlaybackNode>, PlaybackError> {
        if chunk.len() % 2 != 0 {
            warn!(node = %id, bytes = chunk.len(), "Chunk has an odd byte count, dropping the last byte");
        }

        let samples = decode_pcm16_le(chunk);
        if samples.is_empty() {
            return Err(PlaybackError::EmptyChunk);
        }

        self.output.start(id, samples, self.sample_rate)
    }

    /// Completion notification from the output. Returns `true` if `id` was the
    /// active node (and the next chunk, if any, has been started).
    pub fn on_node_ended(&mut self, id: NodeId) -> bool {
        match &self.active {
            Some(active) if active.id == id => {
                self.active = None;
                self.play_next();
                true
            }
            _ => {
                trace!(node = %id, "Ignoring completion of inactive node");
                false
            }
        }
    }

    /// Flush the queue and stop the active node. Calling it with nothing queued
    /// or playing is a no-op.
    pub fn stop_all(&mut self) -> StopSummary {
        let flushed_chunks = self.queue.len();
        self.queue.clear();
        self.stats.chunks_flushed += flushed_chunks as u64;

        let stopped_node = self.active.take().map(|mut node| {
            node.handle.stop();
            node.id
        });

        StopSummary {
            flushed_chunks,
            stopped_node,
        }
    }
}
