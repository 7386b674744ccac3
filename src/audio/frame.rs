use crate::audio::format::{AudioFormat, MIN_SAMPLE_RATE};

/// Why an incoming frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDefect {
    Empty,
    InvalidSampleRate(u32),
    ZeroChannels,
    /// Length is not a whole number of interleaved sample frames.
    PartialFrame { len: usize, channels: u16 },
    /// Longer than the one-second ring that would have to hold it.
    Oversized { len: usize, capacity: usize },
}

impl std::fmt::Display for FrameDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameDefect::Empty => write!(f, "frame has no samples"),
            FrameDefect::InvalidSampleRate(rate) => write!(f, "invalid sample rate {}", rate),
            FrameDefect::ZeroChannels => write!(f, "frame reports zero channels"),
            FrameDefect::PartialFrame { len, channels } => write!(
                f,
                "data length {} is not a multiple of channels {}",
                len, channels
            ),
            FrameDefect::Oversized { len, capacity } => write!(
                f,
                "frame of {} samples exceeds ring capacity {}",
                len, capacity
            ),
        }
    }
}

/// A chunk of interleaved samples as delivered by the decoder, tagged with the
/// format the decoder reported for it.
///
/// Construction never fails: the engine validates frames on ingestion and
/// drops the malformed ones instead of surfacing an error to the source.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl IncomingFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// A frame holding `samples_per_channel` interleaved samples of `value`.
    pub fn filled(value: f32, samples_per_channel: usize, format: AudioFormat) -> Self {
        let len = samples_per_channel * format.channels() as usize;
        Self::new(vec![value; len], format.sample_rate(), format.channels())
    }

    /// Checks the frame and returns the format it carries.
    pub fn validate(&self) -> Result<AudioFormat, FrameDefect> {
        if self.sample_rate < MIN_SAMPLE_RATE {
            return Err(FrameDefect::InvalidSampleRate(self.sample_rate));
        }
        if self.channels == 0 {
            return Err(FrameDefect::ZeroChannels);
        }
        if self.samples.is_empty() {
            return Err(FrameDefect::Empty);
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(FrameDefect::PartialFrame {
                len: self.samples.len(),
                channels: self.channels,
            });
        }
        let format = AudioFormat::new(self.sample_rate, self.channels)
            .map_err(|_| FrameDefect::InvalidSampleRate(self.sample_rate))?;
        if self.samples.len() > format.samples_per_second() {
            return Err(FrameDefect::Oversized {
                len: self.samples.len(),
                capacity: format.samples_per_second(),
            });
        }
        Ok(format)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Returns the number of samples per channel.
    pub fn samples_per_channel(&self) -> usize {
        match self.channels {
            0 => 0,
            channels => self.samples.len() / channels as usize,
        }
    }

    /// Consumes the frame and returns the raw vector.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}
