//! # PCM Conversion and Resampling
//!
//! Sample-level helpers shared by the capture and playback paths. Everything in
//! here is allocation-bounded and synchronous so it can run inside a real-time
//! audio callback.
//!
//! ## Key Functions:
//! - **Encoding**: float samples → signed 16-bit little-endian PCM (wire format)
//! - **Decoding**: 16-bit little-endian PCM → float samples (playback format)
//! - **Level metering**: peak absolute amplitude for voice-activity detection
//! - **Resampling**: streaming linear interpolation between device and wire rates
//!
//! ## Scaling Asymmetry:
//! Encoding multiplies negative samples by 32768 and positive samples by 32767 so
//! that -1.0 maps to `i16::MIN` and 1.0 maps to `i16::MAX`. Decoding divides every
//! sample by 32768. The round trip is therefore not bit-exact for positive values,
//! and deployed backends depend on exactly this behaviour.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Sample rate of outbound microphone frames (Hz).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of inbound synthesized speech (Hz).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per outbound frame.
pub const FRAME_SAMPLES: usize = 4096;

/// Convert one float sample to a signed 16-bit value.
///
/// ## Conversion:
/// 1. Clamp to [-1.0, 1.0] (NaN is treated as silence)
/// 2. Negative values scale by 32768, positive values by 32767
/// 3. Truncate toward zero, like a JavaScript `DataView.setInt16`
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    scaled as i16
}

/// Convert one signed 16-bit value back to a float sample in [-1.0, 1.0).
#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode float samples as 16-bit little-endian PCM into `out`.
///
/// `out` is cleared and reused so the per-frame path does not reallocate once
/// the buffer has grown to frame size.
pub fn encode_pcm16_le(samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.resize(samples.len() * 2, 0);
    for (sample, bytes) in samples.iter().zip(out.chunks_exact_mut(2)) {
        LittleEndian::write_i16(bytes, float_to_pcm16(*sample));
    }
}

/// Decode 16-bit little-endian PCM bytes to float samples.
///
/// A trailing odd byte cannot form a sample and is ignored; callers that care
/// can check `bytes.len() % 2` themselves.
pub fn decode_pcm16_le(bytes: &[u8]) -> Vec<f32> {
    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(pcm16_to_float(sample));
    }

    samples
}

/// Peak absolute amplitude of a block, in [0.0, 1.0] for well-formed input.
///
/// This is the whole voice-activity heuristic: no smoothing, no spectral
/// analysis, one comparison against a threshold per block.
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Average interleaved frames down to a single channel, appending to `out`.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }

    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Streaming linear-interpolation resampler.
///
/// Keeps the last input sample and the fractional read position between calls,
/// so consecutive device callbacks resample as one continuous signal instead of
/// clicking at every buffer boundary.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Input samples advanced per output sample
    step: f64,
    /// Read position of the next output sample, relative to `last`
    position: f64,
    /// Final sample of the previous input block
    last: Option<f32>,
}

impl LinearResampler {
    /// Returns `None` if either rate is zero.
    pub fn new(from_rate: u32, to_rate: u32) -> Option<Self> {
        if from_rate == 0 || to_rate == 0 {
            return None;
        }
        Some(Self {
            from_rate,
            to_rate,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            last: None,
        })
    }

    /// Resample `input`, appending the produced samples to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        if self.from_rate == self.to_rate {
            out.extend_from_slice(input);
            return;
        }

        // Virtual signal: index 0 is the carried-over sample, index i + 1 is input[i].
        let (prev, rest) = match self.last {
            Some(last) => (last, input),
            None => (input[0], &input[1..]),
        };
        let at = |index: usize| if index == 0 { prev } else { rest[index - 1] };
        let max_index = rest.len() as f64;

        while self.position <= max_index {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let a = at(index);
            let sample = if frac > 0.0 {
                let b = at(index + 1);
                a + (b - a) * frac
            } else {
                a
            };
            out.push(sample);
            self.position += self.step;
        }

        self.position -= max_index;
        self.last = Some(at(rest.len()));
    }
}
