//! # Capture Pipeline
//!
//! Turns whatever a microphone produces (any rate, any channel count, any
//! callback size) into fixed 4096-sample mono blocks at 16 kHz, and classifies
//! each block as speech or silence.
//!
//! ## Processing Steps (per device callback):
//! 1. Downmix interleaved frames to mono
//! 2. Resample to the wire rate with the streaming linear resampler
//! 3. Cut into fixed-size blocks; leftovers wait for the next callback
//!
//! Encoding a block for the wire lives in `transport::protocol`.

use super::pcm::{downmix_to_mono, peak_amplitude, LinearResampler};
use super::CaptureError;

/// Assembles device callbacks into fixed-size blocks at the target rate.
#[derive(Debug)]
pub struct FrameAssembler {
    channels: usize,
    block_size: usize,
    resampler: LinearResampler,
    mono: Vec<f32>,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// Fails if either sample rate is zero.
    pub fn new(channels: u16, source_rate: u32, target_rate: u32, block_size: usize) -> Result<Self, CaptureError> {
        let resampler = LinearResampler::new(source_rate, target_rate).ok_or_else(|| {
            CaptureError::Stream(format!(
                "cannot resample {} Hz input to {} Hz",
                source_rate, target_rate
            ))
        })?;

        let block_size = block_size.max(1);
        Ok(Self {
            channels: channels.max(1) as usize,
            block_size,
            resampler,
            mono: Vec::new(),
            pending: Vec::with_capacity(block_size * 2),
        })
    }

    /// Feed one interleaved callback buffer, calling `emit` for every complete block.
    /// Returns the number of blocks emitted.
    pub fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(Vec<f32>)) -> usize {
        self.mono.clear();
        downmix_to_mono(interleaved, self.channels, &mut self.mono);
        self.resampler.process(&self.mono, &mut self.pending);

        let mut emitted = 0;
        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            emit(block);
            emitted += 1;
        }
        emitted
    }

    /// Pad any partial block with silence and return it.
    pub fn flush_padded(&mut self) -> Option<Vec<f32>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut block: Vec<f32> = self.pending.drain(..).collect();
        block.resize(self.block_size, 0.0);
        Some(block)
    }
}

/// Peak-amplitude voice-activity detector.
#[derive(Debug, Clone, Copy)]
pub struct VoiceActivityDetector {
    threshold: f32,
}

impl VoiceActivityDetector {
    pub const DEFAULT_THRESHOLD: f32 = 0.15;

    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Peak amplitude of the block and whether it counts as speech.
    /// Speech means strictly above the threshold.
    pub fn classify(&self, block: &[f32]) -> (f32, bool) {
        let peak = peak_amplitude(block);
        (peak, peak > self.threshold)
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_are_fixed_size_across_callbacks() {
        let mut assembler = FrameAssembler::new(1, 16_000, 16_000, 4096).unwrap();
        let mut blocks = Vec::new();

        // Typical browser-sized callbacks that do not divide the block size
        for i in 0..10 {
            let buffer = vec![i as f32 * 0.01; 1000];
            assembler.push(&buffer, |block| blocks.push(block));
        }

        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.len() == 4096));
        assert_eq!(assembler.pending.len(), 10_000 - 2 * 4096);
        // Order is preserved: first block starts with callback 0, ends inside callback 4
        assert_eq!(blocks[0][0], 0.0);
        assert_eq!(blocks[0][4095], 0.04);
    }

    #[test]
    fn test_stereo_48k_is_downmixed_and_resampled() {
        let mut assembler = FrameAssembler::new(2, 48_000, 16_000, 1600).unwrap();
        let mut blocks = Vec::new();

        // 0.1 s of stereo audio with a constant 0.5 average
        let interleaved: Vec<f32> = (0..4800).flat_map(|_| [1.0, 0.0]).collect();
        let emitted = assembler.push(&interleaved, |block| blocks.push(block));

        assert_eq!(emitted, 1);
        assert_eq!(blocks[0].len(), 1600);
        assert!(blocks[0].iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_zero_source_rate_is_a_stream_error() {
        let result = FrameAssembler::new(1, 0, 16_000, 4096);
        assert!(matches!(result, Err(CaptureError::Stream(_))));
    }

    #[test]
    fn test_vad_threshold_is_exclusive() {
        let vad = VoiceActivityDetector::default();
        assert_eq!(vad.threshold, 0.15);

        assert!(vad.classify(&[0.0, -0.2, 0.1]).1);
        assert!(!vad.classify(&[0.05, -0.05]).1);
        assert!(!vad.classify(&[0.15]).1);
        assert!(!vad.classify(&[]).1);
    }
}
