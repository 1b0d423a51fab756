//! # Audio Module
//!
//! Microphone capture, PCM encoding and gapless playback of synthesized speech.
//!
//! ## Key Components:
//! - **PCM**: sample conversion, level metering and resampling (`pcm.rs`)
//! - **Capture**: fixed-size frame assembly and voice-activity detection (`capture.rs`)
//! - **Playback**: FIFO chunk queue with one active node at a time (`playback.rs`)
//! - **Simulated devices**: WAV-file microphone and clocked silent output (`simulated.rs`)
//! - **Native devices**: cpal microphone and rodio output, behind the
//!   `native-audio` feature (`devices.rs`)
//!
//! ## Audio Format Requirements:
//! - **Outbound**: 16 kHz mono, 16-bit signed little-endian PCM, 4096-sample frames
//! - **Inbound**: 24 kHz mono, 16-bit signed little-endian PCM, variable-length chunks
//!
//! Devices talk to the session only through the `Microphone` and `AudioOutput`
//! traits below. Their callbacks run on device or runtime threads and must hand
//! work back to the session (an actor mailbox) instead of touching its state.

pub mod capture;
#[cfg(feature = "native-audio")]
pub mod devices;
pub mod pcm;
pub mod playback;
pub mod simulated;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Receives each assembled 16 kHz mono block from a running microphone.
pub type BlockSink = Arc<dyn Fn(Vec<f32>) + Send + Sync>;

/// Reports that a playback node finished on its own.
pub type NodeEndedNotifier = Arc<dyn Fn(NodeId) + Send + Sync>;

/// Identifies one playback node. Ids increase monotonically per scheduler, so a
/// completion that arrives after the node was replaced can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("no microphone available: {0}")]
    DeviceUnavailable(String),

    #[error("microphone stream failed: {0}")]
    Stream(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),

    #[error("chunk contains no samples")]
    EmptyChunk,
}

/// A microphone that delivers fixed-size blocks to a sink until stopped.
pub trait Microphone {
    /// Acquire the device and start delivering blocks.
    fn start(&mut self, sink: BlockSink) -> Result<(), CaptureError>;

    /// Release the device. Safe to call when not running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// One in-flight playback of a decoded chunk.
pub trait PlaybackNode {
    /// Stop immediately. Stopping a node that already finished is a no-op.
    fn stop(&mut self);
}

/// Something that can play mono float buffers.
pub trait AudioOutput {
    /// Start playing `samples` right away. When playback ends on its own the
    /// output reports `id` through its `NodeEndedNotifier`.
    fn start(
        &mut self,
        id: NodeId,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<Box<dyn PlaybackNode>, PlaybackError>;
}
