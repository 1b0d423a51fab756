//! # Device-free Audio
//!
//! Stand-ins for real hardware so the client can run headless (CI, servers,
//! containers) and still exercise the full capture → wire → playback path.
//!
//! - **WavMicrophone**: streams a WAV file through the capture pipeline at
//!   real-time cadence, then keeps sending silence like an idle microphone
//! - **SilentOutput**: "plays" each buffer by waiting out its duration on the
//!   tokio clock, then reports completion
//! - **NullMicrophone**: always fails with `DeviceUnavailable`

use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::capture::FrameAssembler;
use super::{
    AudioOutput, BlockSink, CaptureError, Microphone, NodeEndedNotifier, NodeId, PlaybackError,
    PlaybackNode,
};

/// Read a WAV file and convert it to fixed-size mono blocks at `target_rate`.
/// The final partial block is padded with silence.
pub fn load_wav_blocks(path: &Path, target_rate: u32, block_size: usize) -> Result<Vec<Vec<f32>>, CaptureError> {
    let file = File::open(path).map_err(|err| match err.kind() {
        ErrorKind::PermissionDenied => CaptureError::PermissionDenied(format!("{}: {}", path.display(), err)),
        _ => CaptureError::DeviceUnavailable(format!("{}: {}", path.display(), err)),
    })?;

    let mut reader = BufReader::new(file);
    let (header, data) = wav::read(&mut reader)
        .map_err(|err| CaptureError::Stream(format!("{}: {}", path.display(), err)))?;

    if header.sampling_rate == 0 {
        return Err(CaptureError::Stream(format!("{}: sample rate is 0 Hz", path.display())));
    }

    let samples: Vec<f32> = match data {
        wav::BitDepth::Eight(raw) => raw.iter().map(|s| (*s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(raw) => raw.iter().map(|s| *s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(raw) => raw.iter().map(|s| *s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(raw) => raw,
        wav::BitDepth::Empty => {
            return Err(CaptureError::Stream(format!("{}: no audio data", path.display())));
        }
    };

    let mut assembler = FrameAssembler::new(header.channel_count, header.sampling_rate, target_rate, block_size)?;
    let mut blocks = Vec::new();
    assembler.push(&samples, |block| blocks.push(block));

    if let Some(tail) = assembler.flush_padded() {
        blocks.push(tail);
    }

    info!(
        path = %path.display(),
        channels = header.channel_count,
        sample_rate = header.sampling_rate,
        blocks = blocks.len(),
        "Loaded WAV input"
    );
    Ok(blocks)
}

/// Microphone backed by a WAV file.
pub struct WavMicrophone {
    path: PathBuf,
    sample_rate: u32,
    block_size: usize,
    task: Option<JoinHandle<()>>,
}

impl WavMicrophone {
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32, block_size: usize) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            block_size,
            task: None,
        }
    }

    fn block_interval(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }
}

impl Microphone for WavMicrophone {
    fn start(&mut self, sink: BlockSink) -> Result<(), CaptureError> {
        if self.is_running() {
            return Ok(());
        }

        let blocks = load_wav_blocks(&self.path, self.sample_rate, self.block_size)?;
        let interval = self.block_interval();
        let block_size = self.block_size;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for block in blocks {
                ticker.tick().await;
                sink(block);
            }
            debug!("WAV input exhausted, continuing with silence");
            loop {
                ticker.tick().await;
                sink(vec![0.0; block_size]);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for WavMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone used when no capture device was compiled in or configured.
pub struct NullMicrophone {
    reason: String,
}

impl NullMicrophone {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl Microphone for NullMicrophone {
    fn start(&mut self, _sink: BlockSink) -> Result<(), CaptureError> {
        warn!(reason = %self.reason, "No microphone available");
        Err(CaptureError::DeviceUnavailable(self.reason.clone()))
    }

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }
}

/// Output that keeps time without producing sound.
pub struct SilentOutput {
    notify: NodeEndedNotifier,
}

impl SilentOutput {
    pub fn new(notify: NodeEndedNotifier) -> Self {
        Self { notify }
    }
}

struct SilentNode {
    task: JoinHandle<()>,
}

impl PlaybackNode for SilentNode {
    fn stop(&mut self) {
        // Aborting a finished task does nothing
        self.task.abort();
    }
}

impl AudioOutput for SilentOutput {
    fn start(
        &mut self,
        id: NodeId,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<Box<dyn PlaybackNode>, PlaybackError> {
        if samples.is_empty() {
            return Err(PlaybackError::EmptyChunk);
        }

        let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate.max(1) as f64);
        let notify = self.notify.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            notify(id);
        });

        Ok(Box::new(SilentNode { task }))
    }
}
