//! Drift detection between the writer and a consumer clock that wraps.
//!
//! The consumer reports its position as a raw counter that wraps once per
//! second. The tracker unwraps it into a monotonic render position and
//! compares it against the writer's position. Decisions depend only on the gap
//! between the two counters, never on wall-clock time, so uneven callback
//! intervals on either side do not trigger corrections by themselves.

/// How the writer's lead over the consumer looks right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    /// The writer is comfortably ahead.
    Healthy,
    /// Less than one 10ms unit of lead is left.
    NearMiss,
    /// The consumer has caught up with or passed the writer.
    Overrun,
}

/// Tracks writer and consumer positions in per-channel samples.
#[derive(Debug, Clone)]
pub struct DriftTracker {
    /// Period of the raw consumer counter (the sample rate).
    modulo: u32,
    samples_per_10ms: u64,
    safety_margin: u64,
    buffer_position: u64,
    render_position: u64,
    prev_consumer_position: u32,
}

impl DriftTracker {
    pub fn new(sample_rate: u32, samples_per_10ms: u32, safety_margin: u32) -> Self {
        Self {
            modulo: sample_rate.max(1),
            samples_per_10ms: samples_per_10ms as u64,
            safety_margin: safety_margin as u64,
            buffer_position: 0,
            render_position: 0,
            prev_consumer_position: 0,
        }
    }

    /// Anchors both positions to the consumer's current raw position.
    ///
    /// Called before any lead has been written, so the writer starts exactly
    /// where the consumer is.
    pub fn initialize(&mut self, consumer_position: u32) {
        let consumer_position = consumer_position % self.modulo;
        self.render_position = consumer_position as u64;
        self.buffer_position = consumer_position as u64;
        self.prev_consumer_position = consumer_position;
    }

    /// Records `samples` per-channel samples written by the producer.
    pub fn advance_buffer(&mut self, samples: u64) {
        self.buffer_position += samples;
    }

    /// Observes the consumer and returns how many per-channel samples must be
    /// written to restore the safety margin. Zero means no action.
    pub fn check_correction(&mut self, consumer_position: u32) -> u64 {
        let consumer_position = consumer_position % self.modulo;
        if consumer_position == self.prev_consumer_position {
            return 0;
        }

        let delta = if consumer_position < self.prev_consumer_position {
            self.modulo - self.prev_consumer_position + consumer_position
        } else {
            consumer_position - self.prev_consumer_position
        };
        self.render_position += delta as u64;
        self.prev_consumer_position = consumer_position;

        match self.state() {
            DriftState::Overrun => {
                (self.render_position - self.buffer_position) + self.safety_margin
            }
            DriftState::NearMiss => {
                (self.render_position + self.safety_margin).saturating_sub(self.buffer_position)
            }
            DriftState::Healthy => 0,
        }
    }

    pub fn state(&self) -> DriftState {
        if self.render_position >= self.buffer_position {
            DriftState::Overrun
        } else if self.buffer_position - self.render_position <= self.samples_per_10ms {
            DriftState::NearMiss
        } else {
            DriftState::Healthy
        }
    }

    /// How far the consumer has played past the writer.
    pub fn lag(&self) -> u64 {
        self.render_position.saturating_sub(self.buffer_position)
    }

    /// Signed writer lead over the consumer.
    pub fn lead(&self) -> i64 {
        self.buffer_position as i64 - self.render_position as i64
    }

    pub fn render_position(&self) -> u64 {
        self.render_position
    }

    pub fn safety_margin(&self) -> u64 {
        self.safety_margin
    }
}
