//! A bounded FIFO of pending interleaved frames.
//!
//! Owned by the producer side only; the consumer never touches it.

use std::collections::VecDeque;

/// Frames waiting to be written into the ring.
///
/// When full, pushing drops the oldest frame so the newest audio survives.
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<Vec<f32>>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a frame, returning the frame that had to be dropped to make room.
    pub fn push(&mut self, frame: Vec<f32>) -> Option<Vec<f32>> {
        let dropped = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        dropped
    }

    pub fn pop(&mut self) -> Option<Vec<f32>> {
        self.frames.pop_front()
    }

    /// Length in samples of the oldest frame.
    pub fn front_len(&self) -> Option<usize> {
        self.frames.front().map(Vec::len)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
