//! Speaker playback via cpal, driven by a [`PlayoutHandle`].

use crate::audio::{AudioFormat, PlayoutControls, PlayoutHandle};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, SizedSample, StreamConfig};
use dasp_sample::FromSample;
use tracing::{debug, error, info, warn};

/// Samples in the conversion buffer of non-`f32` devices.
const SCRATCH_CAPACITY: usize = 8192;

fn get_output_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match device_name {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .context("Failed to enumerate output devices")?;
            devices
                .find(|d| d.name().is_ok_and(|n| n == name))
                .with_context(|| format!("Output device {:?} not found", name))
        }
        None => host
            .default_output_device()
            .context("No default output device available"),
    }
}

/// Plays a jitter buffer's output on an output device.
///
/// The device is opened at the stream's own format; the buffer does no
/// resampling or channel mapping.
pub struct AudioOutput {
    playout: PlayoutHandle,
    format: AudioFormat,
    device_name: Option<String>,
}

impl AudioOutput {
    pub fn new(playout: PlayoutHandle, format: AudioFormat) -> Self {
        Self {
            playout,
            format,
            device_name: None,
        }
    }

    pub fn with_device(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = Some(device_name.into());
        self
    }

    /// Opens the device and starts pulling. Dropping the returned stream stops
    /// playback.
    pub fn start(self) -> Result<cpal::Stream> {
        let output_device = get_output_device(self.device_name.as_deref())?;
        let output_config = output_device.default_output_config()?;
        debug!("Output config: {output_config:#?}");

        let config = StreamConfig {
            channels: self.format.channels(),
            sample_rate: SampleRate(self.format.sample_rate()),
            buffer_size: match output_config.buffer_size() {
                cpal::SupportedBufferSize::Range { min, max } => {
                    let target = 256u32;
                    let size = target.clamp(*min, *max);
                    debug!(
                        "Using output buffer size: {} (min={}, max={})",
                        size, min, max
                    );
                    BufferSize::Fixed(size)
                }
                cpal::SupportedBufferSize::Unknown => {
                    warn!("Supported buffer size range unknown, using default");
                    BufferSize::Default
                }
            },
        };

        let format = self.format;
        let playout = self.playout;
        let channels = format.channels() as usize;
        let stream = match output_config.sample_format() {
            SampleFormat::F32 => build_f32_stream(&output_device, &config, playout)?,
            SampleFormat::I16 => build_stream::<i16>(&output_device, &config, playout, channels)?,
            SampleFormat::U16 => build_stream::<u16>(&output_device, &config, playout, channels)?,
            SampleFormat::I32 => build_stream::<i32>(&output_device, &config, playout, channels)?,
            other => anyhow::bail!("Unsupported output sample format {:?}", other),
        };
        stream.play()?;
        info!("Playback started at {}", format);
        Ok(stream)
    }
}

fn stream_error_handler(
    controls: PlayoutControls,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        error!("An error occurred on the output audio stream: {}", err);
        // The device lost its buffer; make the engine rebuffer.
        controls.invalidate();
    }
}

fn build_f32_stream(
    device: &Device,
    config: &StreamConfig,
    mut playout: PlayoutHandle,
) -> Result<cpal::Stream> {
    let on_error = stream_error_handler(playout.controls());

    debug!("Building f32 output stream");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            playout.pull_into(data);
        },
        on_error,
        None,
    )?;
    Ok(stream)
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut playout: PlayoutHandle,
    channels: usize,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let on_error = stream_error_handler(playout.controls());
    let mut scratch = scratch_buffer(channels);

    debug!("Building output stream");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            fill_converted(&mut playout, &mut scratch, data);
        },
        on_error,
        None,
    )?;
    Ok(stream)
}

/// A conversion buffer holding a whole number of sample frames.
fn scratch_buffer(channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    let frames = (SCRATCH_CAPACITY / channels).max(1);
    vec![0.0; frames * channels]
}

/// Pulls `data.len()` samples through `scratch` in chunks and converts them.
/// Never allocates, whatever the device buffer size.
fn fill_converted<T>(playout: &mut PlayoutHandle, scratch: &mut [f32], data: &mut [T])
where
    T: SizedSample + FromSample<f32>,
{
    for chunk in data.chunks_mut(scratch.len()) {
        let pulled = &mut scratch[..chunk.len()];
        playout.pull_into(pulled);
        for (slot, &sample) in chunk.iter_mut().zip(pulled.iter()) {
            *slot = T::from_sample_(sample);
        }
    }
}
