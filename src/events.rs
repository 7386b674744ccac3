//! Events reported by the engine to whoever hosts playback.
//!
//! Nothing in here is an error for the caller: malformed frames, underruns and
//! format changes are absorbed by the engine and only surfaced as events and
//! counters.

use std::sync::Arc;

use crate::audio::{AudioFormat, DriftState, FrameDefect};

/// Passive receiver - can receive pushed data.
///
/// The engine pushes [`EngineEvent`]s into one of these from the producer
/// thread. Implementations must not block for long.
pub trait Pushable<T>: Send + Sync {
    fn push(&self, input: T);
}

impl<T: Send + Sync> Pushable<T> for Arc<dyn Pushable<T>> {
    fn push(&self, input: T) {
        (**self).push(input)
    }
}

impl<T: Send> Pushable<T> for crossbeam::channel::Sender<T> {
    fn push(&self, input: T) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(input);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Buffering finished; the consumer can start routing the stream.
    Ready(AudioFormat),
    /// A frame arrived in a different format; all buffered audio was dropped.
    FormatReset {
        previous: AudioFormat,
        next: AudioFormat,
    },
    /// The host reported that its playable buffer is gone.
    PlaybackInvalidated,
    MalformedFrame(FrameDefect),
    /// Catch-up writes ran out of queued frames and were padded with silence.
    Underrun { silence_samples: usize },
    /// Drift correction wrote catch-up data.
    Corrected { state: DriftState, samples: u64 },
    /// The consumer had lapped the writer; the writer jumped to the reader.
    Resynced,
    Disposed,
}
