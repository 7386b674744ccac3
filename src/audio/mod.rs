//! Audio data types and the jitter buffer.
//!
//! # Data Types
//! - [`AudioFormat`] - Sample rate and channel count of a stream
//! - [`IncomingFrame`] - One decoded frame of interleaved `f32` samples
//!
//! # Timing
//! - [`DriftTracker`] - Unwraps the consumer clock and decides corrections
//! - [`BufferPolicy`] - Buffering depth and safety margin for one format
//!
//! # Buffers
//! - [`buffers::JitterBufferEngine`] - Producer half, fed frame by frame
//! - [`buffers::PlayoutHandle`] - Consumer half, pulled by the audio callback

pub mod buffers;
pub mod drift;
pub mod format;
pub mod frame;
pub mod level;
pub mod policy;

pub use buffers::{
    EngineStats, JitterBufferEngine, PlayoutControls, PlayoutHandle, StatsSnapshot, jitter_buffer,
};
pub use drift::{DriftState, DriftTracker};
pub use format::AudioFormat;
pub use frame::{FrameDefect, IncomingFrame};
pub use level::calculate_rms_level;
pub use policy::{BufferPolicy, EngineState};
