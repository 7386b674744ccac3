//! Buffering depth and the engine's lifecycle states.

use anyhow::Result;

use crate::audio::format::AudioFormat;
use crate::config::EngineConfig;

/// Lifecycle of the engine.
///
/// A reset is a synchronous transition back to [`EngineState::Empty`]; it is
/// never observed as a resting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No stream yet, or the last one was reset.
    Empty,
    /// Frames are accumulating; the consumer hears silence.
    Buffering,
    /// Playback is fed and drift correction runs on every frame.
    Steady,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Empty => write!(f, "Empty"),
            EngineState::Buffering => write!(f, "Buffering"),
            EngineState::Steady => write!(f, "Steady"),
        }
    }
}

/// Buffering constants resolved for one stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    pub frames_for_buffering: usize,
    /// Per-channel samples in one 10ms unit.
    pub samples_per_10ms: u32,
    /// Per-channel lead restored by every correction.
    pub safety_margin_samples: u32,
}

impl BufferPolicy {
    pub fn new(config: &EngineConfig, format: AudioFormat) -> Result<Self> {
        config.validate()?;
        let samples_per_10ms = format.samples_per_10ms();
        if samples_per_10ms == 0 {
            anyhow::bail!("Format {} has no samples in a 10ms unit", format);
        }
        Ok(Self {
            frames_for_buffering: config.frames_for_buffering,
            samples_per_10ms,
            safety_margin_samples: samples_per_10ms * config.safety_margin_frames as u32,
        })
    }

    /// Frames written into the ring when playback starts; the frame that
    /// completes buffering is written by the first steady step.
    pub fn seed_frames(&self) -> usize {
        self.frames_for_buffering - 1
    }

    /// Whole 10ms units needed to cover `samples`, rounding partial units up.
    pub fn units_for(&self, samples: u64) -> u64 {
        samples.div_ceil(self.samples_per_10ms as u64)
    }
}
