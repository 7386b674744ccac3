//! Buffer types between the frame producer and the audio callback.
//!
//! - [`FrameQueue`] - Bounded FIFO of frames waiting to be written
//! - [`SampleRing`] - Lock-free one-second ring shared with the consumer
//! - [`JitterBufferEngine`] / [`PlayoutHandle`] - The two halves of the jitter buffer

pub mod frame_queue;
pub mod jitter_buffer;
pub mod sample_ring;

pub use frame_queue::FrameQueue;
pub use jitter_buffer::{
    EngineStats, JitterBufferEngine, PlayoutControls, PlayoutHandle, StatsSnapshot, jitter_buffer,
};
pub use sample_ring::SampleRing;
