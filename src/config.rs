//! Configuration for the playout engine.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Frames of 10ms held by the one-second ring.
pub const RING_UNITS: usize = 100;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// 10ms frames to accumulate before playback starts (~50ms by default).
    pub frames_for_buffering: usize,
    /// Lead, in 10ms units, restored after every correction.
    pub safety_margin_frames: usize,
    /// Frames discarded after start and after every format change, while the
    /// decoder may still misreport the channel count.
    pub ignored_startup_frames: usize,
    /// Bound of the pending frame queue; the oldest frame is dropped beyond it.
    pub max_queued_frames: usize,
    /// Ring cursors are rebased every this many seconds of audio.
    pub rebase_period_seconds: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_for_buffering: 5,
            safety_margin_frames: 3,
            ignored_startup_frames: 5,
            max_queued_frames: 20,
            rebase_period_seconds: 5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frames_for_buffering == 0 || self.frames_for_buffering >= RING_UNITS {
            anyhow::bail!(
                "frames_for_buffering must be within 1..{}, got {}",
                RING_UNITS,
                self.frames_for_buffering
            );
        }
        // A margin of a single unit would re-trigger the near-miss check
        // right after every top-up.
        if self.safety_margin_frames < 2 || self.safety_margin_frames >= RING_UNITS {
            anyhow::bail!(
                "safety_margin_frames must be within 2..{}, got {}",
                RING_UNITS,
                self.safety_margin_frames
            );
        }
        if self.max_queued_frames < self.frames_for_buffering {
            anyhow::bail!(
                "max_queued_frames ({}) must hold at least frames_for_buffering ({})",
                self.max_queued_frames,
                self.frames_for_buffering
            );
        }
        if self.rebase_period_seconds == 0 {
            anyhow::bail!("rebase_period_seconds must be at least 1");
        }
        Ok(())
    }

    /// Loads and validates a JSON config; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }
}
