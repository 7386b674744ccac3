//! Playout bridge: a jitter buffer between a bursty frame producer and an
//! audio device's pull callback.
//!
//! ```text
//! receiver thread                          audio callback
//! IncomingFrame -> JitterBufferEngine ==SampleRing==> PlayoutHandle -> device
//!                        |
//!                        +--> EngineEvent sink
//! ```
//!
//! - [`audio`] - Formats, frames, drift tracking and the buffer itself
//! - [`config`] - Tunables, loadable from JSON
//! - [`events`] - What the engine reports while absorbing faults
//! - [`io`] - cpal output driven by the consumer half

pub mod audio;
pub mod config;
pub mod events;
pub mod io;

pub use audio::{
    AudioFormat, EngineState, IncomingFrame, JitterBufferEngine, PlayoutControls, PlayoutHandle,
    StatsSnapshot, jitter_buffer,
};
pub use config::EngineConfig;
pub use events::{EngineEvent, Pushable};
