use anyhow::Result;

/// Lowest sample rate for which a 10ms unit still holds at least one sample.
pub const MIN_SAMPLE_RATE: u32 = 100;

/// Sample rate and channel count of one playout stream.
///
/// A stream keeps its format for its whole lifetime. A different format means
/// a new ring, a new tracker and a new buffering cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    sample_rate: u32,
    channels: u16,
}

impl AudioFormat {
    /// Returns an error if either value cannot describe playable audio.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate < MIN_SAMPLE_RATE {
            anyhow::bail!(
                "Sample rate {} is below the minimum of {} Hz",
                sample_rate,
                MIN_SAMPLE_RATE
            );
        }
        if channels == 0 {
            anyhow::bail!("Channel count must be at least 1");
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Per-channel samples in one 10ms unit.
    pub const fn samples_per_10ms(&self) -> u32 {
        self.sample_rate / 100
    }

    /// Interleaved samples in one second of audio.
    pub const fn samples_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}
