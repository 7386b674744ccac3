//! Hardware I/O.
//!
//! - [`AudioOutput`] - Speaker playback via cpal, pulling from a [`PlayoutHandle`](crate::audio::PlayoutHandle)

pub mod audio;

pub use audio::AudioOutput;
