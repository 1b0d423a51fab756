//! # Native Audio Devices
//!
//! Default-device microphone capture through cpal and speaker playback through
//! rodio. Compiled only with the `native-audio` feature.
//!
//! ## Threading:
//! - cpal runs the input callback on its own audio thread. The callback does
//!   the downmix/resample/assembly work and hands finished blocks to the
//!   `BlockSink`; it never touches session state.
//! - rodio mixes on its own thread. Each node gets a dedicated `Sink` with an
//!   `EmptyCallback` appended after the samples, which fires the completion
//!   notification when the buffer has been consumed.
//!
//! Neither `cpal::Stream` nor `rodio::OutputStream` is `Send`, which is fine:
//! both live inside the session actor and never leave its thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, error, info};

use super::capture::FrameAssembler;
use super::{
    AudioOutput, BlockSink, CaptureError, Microphone, NodeEndedNotifier, NodeId, PlaybackError,
    PlaybackNode,
};

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("input device disappeared".into())
            }
            other => CaptureError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("input device disappeared".into())
            }
            cpal::BuildStreamError::BackendSpecific { err } => {
                let description = err.to_string();
                // CoreAudio and PulseAudio both report refused access through the backend
                if description.to_lowercase().contains("permission") {
                    CaptureError::PermissionDenied(description)
                } else {
                    CaptureError::Stream(description)
                }
            }
            other => CaptureError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("input device disappeared".into())
            }
            other => CaptureError::Stream(other.to_string()),
        }
    }
}

/// Default input device via cpal.
pub struct CpalMicrophone {
    target_rate: u32,
    block_size: usize,
    stream: Option<cpal::Stream>,
}

impl CpalMicrophone {
    pub fn new(target_rate: u32, block_size: usize) -> Self {
        Self {
            target_rate,
            block_size,
            stream: None,
        }
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut assembler: FrameAssembler,
    sink: BlockSink,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut converted: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            converted.clear();
            converted.extend(data.iter().map(|&s| s.to_sample::<f32>()));
            assembler.push(&converted, |block| sink(block));
        },
        |err| error!(error = %err, "Microphone stream error"),
        None,
    )
}

impl Microphone for CpalMicrophone {
    fn start(&mut self, sink: BlockSink) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".into()))?;
        let supported = device.default_input_config()?;
        let config: cpal::StreamConfig = supported.config();

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            channels = config.channels,
            sample_rate = config.sample_rate.0,
            format = ?supported.sample_format(),
            "Opening microphone"
        );

        let assembler = FrameAssembler::new(config.channels, config.sample_rate.0, self.target_rate, self.block_size)?;
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_input_stream::<f32>(&device, &config, assembler, sink)?,
            cpal::SampleFormat::I16 => build_input_stream::<i16>(&device, &config, assembler, sink)?,
            cpal::SampleFormat::U16 => build_input_stream::<u16>(&device, &config, assembler, sink)?,
            cpal::SampleFormat::I32 => build_input_stream::<i32>(&device, &config, assembler, sink)?,
            other => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )));
            }
        };

        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                debug!(error = %err, "Failed to pause microphone stream before release");
            }
            info!("Microphone released");
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

/// Default output device via rodio. The device is opened on first use.
pub struct RodioOutput {
    notify: NodeEndedNotifier,
    stream: Option<(OutputStream, OutputStreamHandle)>,
}

impl RodioOutput {
    pub fn new(notify: NodeEndedNotifier) -> Self {
        Self { notify, stream: None }
    }

    fn handle(&mut self) -> Result<&OutputStreamHandle, PlaybackError> {
        if self.stream.is_none() {
            let opened = OutputStream::try_default()
                .map_err(|err| PlaybackError::OutputUnavailable(err.to_string()))?;
            info!("Audio output opened");
            self.stream = Some(opened);
        }
        match &self.stream {
            Some((_, handle)) => Ok(handle),
            None => Err(PlaybackError::OutputUnavailable("output stream not initialised".into())),
        }
    }
}

struct RodioNode {
    sink: Sink,
}

impl PlaybackNode for RodioNode {
    fn stop(&mut self) {
        self.sink.stop();
    }
}

impl AudioOutput for RodioOutput {
    fn start(
        &mut self,
        id: NodeId,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<Box<dyn PlaybackNode>, PlaybackError> {
        if samples.is_empty() {
            return Err(PlaybackError::EmptyChunk);
        }

        let notify = self.notify.clone();
        let handle = self.handle()?;
        let sink = Sink::try_new(handle).map_err(|err| PlaybackError::OutputUnavailable(err.to_string()))?;

        sink.append(SamplesBuffer::new(1, sample_rate, samples));
        sink.append(EmptyCallback::<f32>::new(Box::new(move || notify(id))));

        Ok(Box::new(RodioNode { sink }))
    }
}
