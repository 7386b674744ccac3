//! Fixed-capacity circular storage for interleaved samples.
//!
//! The ring is the only storage shared between the producer and the consumer.
//! Samples live in atomics so both sides can touch disjoint indices without a
//! lock; the two cursors share one atomic word so they can be rebased together.

use crate::audio::format::AudioFormat;
use anyhow::{Context, Result};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Cursors may sit this many rings past the rebase threshold before the next
/// rebase: one for the writer's lead, one for a dragged writer, one for a pull.
const CURSOR_HEADROOM_RINGS: u64 = 3;

fn pack(write: u32, read: u32) -> u64 {
    ((write as u64) << 32) | read as u64
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

/// One second of interleaved audio in a circular buffer.
///
/// The write cursor is advanced by the producer only, the read cursor by the
/// consumer only. A write at position `p` touches index `p % capacity`.
/// Callers keep `write - read` within `[0, capacity]`; the ring itself only
/// refuses to hand out samples the writer has not produced yet.
pub struct SampleRing {
    data: Box<[AtomicU32]>,
    format: AudioFormat,
    capacity: u32,
    rebase_threshold: u32,
    /// Write cursor in the high half, read cursor in the low half.
    cursors: CachePadded<AtomicU64>,
    retired: AtomicBool,
}

impl SampleRing {
    /// Creates a ring holding one second of `format`, rebasing its cursors
    /// every `rebase_period_seconds` rings.
    pub fn new(format: AudioFormat, rebase_period_seconds: u32) -> Result<Self> {
        if rebase_period_seconds == 0 {
            anyhow::bail!("Rebase period must be at least one second");
        }
        let capacity = u32::try_from(format.samples_per_second())
            .with_context(|| format!("Ring for {} does not fit 32-bit cursors", format))?;
        let headroom = (rebase_period_seconds as u64 + CURSOR_HEADROOM_RINGS) * capacity as u64;
        if headroom > u32::MAX as u64 {
            anyhow::bail!(
                "Rebase period of {}s is too long for {} with 32-bit cursors",
                rebase_period_seconds,
                format
            );
        }

        let data: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Ok(Self {
            data: data.into_boxed_slice(),
            format,
            capacity,
            rebase_threshold: capacity * rebase_period_seconds,
            cursors: CachePadded::new(AtomicU64::new(0)),
            retired: AtomicBool::new(false),
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Capacity in interleaved samples.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Current `(write, read)` cursors.
    pub fn positions(&self) -> (u32, u32) {
        unpack(self.cursors.load(Ordering::Acquire))
    }

    /// Samples written but not yet read. Negative once the reader has run
    /// past the writer.
    pub fn lead(&self) -> i64 {
        let (write, read) = self.positions();
        write as i64 - read as i64
    }

    /// Whether `count` more samples fit without overwriting unread data.
    pub fn has_room(&self, count: usize) -> bool {
        self.lead().max(0) as u64 + count as u64 <= self.capacity as u64
    }

    /// The consumer's position in sample frames, wrapping once per second.
    pub fn consumer_position(&self) -> u32 {
        let (_, read) = self.positions();
        (read / self.format.channels() as u32) % self.format.sample_rate()
    }

    /// Copies `samples` in at the write cursor and advances it.
    pub fn write(&self, samples: &[f32]) {
        let (write, _) = self.positions();
        let len = self.clamp_len(samples.len());
        self.store_at(write, len, |i| samples[i]);
        self.advance_write(len);
    }

    /// Writes `count` samples of silence at the write cursor.
    pub fn write_silence(&self, count: usize) {
        let (write, _) = self.positions();
        let len = self.clamp_len(count);
        self.store_at(write, len, |_| 0.0);
        self.advance_write(len);
    }

    /// Advances the write cursor without touching the stored samples.
    pub fn skip_write(&self, count: usize) {
        self.advance_write(count);
    }

    /// Moves the write cursor onto the read cursor, discarding any lead.
    pub fn align_writer(&self) {
        self.update_cursors(|_, read| (read, read));
    }

    /// Fills `out` from the read cursor and advances it by the whole sample
    /// frames that fit in `out`.
    ///
    /// Samples the writer has not produced yet come back as silence; the read
    /// cursor advances regardless, because the hardware clock does not wait.
    /// A trailing partial frame is silence and does not move the cursor, so
    /// the cursor always stays on a channel boundary. Returns the number of
    /// real samples copied.
    pub fn read_into(&self, out: &mut [f32]) -> usize {
        let channels = self.format.channels() as usize;
        let whole = out.len() - out.len() % channels;
        let (write, read) = self.positions();
        let available = write.saturating_sub(read) as usize;
        let filled = whole.min(available).min(self.data.len());
        self.load_at(read, &mut out[..filled]);
        out[filled..].fill(0.0);
        self.advance_read(whole);
        filled
    }

    /// Marks the ring as belonging to a stream that no longer exists.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn clamp_len(&self, len: usize) -> usize {
        debug_assert!(
            len <= self.data.len(),
            "SampleRing: write of {} samples exceeds capacity {}",
            len,
            self.data.len()
        );
        len.min(self.data.len())
    }

    fn advance_write(&self, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.update_cursors(|write, read| (write.saturating_add(count), read));
    }

    fn advance_read(&self, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let capacity = self.capacity;
        let threshold = self.rebase_threshold;
        self.update_cursors(|mut write, read| {
            let mut read = read.saturating_add(count);

            // A reader more than a full ring past the writer has only stale
            // data behind it; drag the writer along.
            if read.saturating_sub(write) > capacity {
                write = read;
            }

            // Shift both cursors by whole rings: indices and the gap survive.
            let base = write.min(read);
            if base >= threshold {
                let shift = base - base % capacity;
                write -= shift;
                read -= shift;
            }
            (write, read)
        });
    }

    fn update_cursors(&self, mut update: impl FnMut(u32, u32) -> (u32, u32)) -> (u32, u32) {
        let mut current = self.cursors.load(Ordering::Acquire);
        loop {
            let (write, read) = unpack(current);
            let (new_write, new_read) = update(write, read);
            match self.cursors.compare_exchange_weak(
                current,
                pack(new_write, new_read),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (new_write, new_read),
                Err(actual) => current = actual,
            }
        }
    }

    fn store_at(&self, position: u32, len: usize, mut sample: impl FnMut(usize) -> f32) {
        let capacity = self.data.len();
        let start = position as usize % capacity;
        let first = len.min(capacity - start);

        for (i, slot) in self.data[start..start + first].iter().enumerate() {
            slot.store(sample(i).to_bits(), Ordering::Relaxed);
        }
        for (i, slot) in self.data[..len - first].iter().enumerate() {
            slot.store(sample(first + i).to_bits(), Ordering::Relaxed);
        }
    }

    fn load_at(&self, position: u32, out: &mut [f32]) {
        let capacity = self.data.len();
        let start = position as usize % capacity;
        let first = out.len().min(capacity - start);
        let (head, tail) = out.split_at_mut(first);

        for (dst, slot) in head.iter_mut().zip(&self.data[start..start + first]) {
            *dst = f32::from_bits(slot.load(Ordering::Relaxed));
        }
        for (dst, slot) in tail.iter_mut().zip(&self.data[..]) {
            *dst = f32::from_bits(slot.load(Ordering::Relaxed));
        }
    }
}

impl std::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (write, read) = self.positions();
        f.debug_struct("SampleRing")
            .field("format", &self.format)
            .field("capacity", &self.capacity)
            .field("write", &write)
            .field("read", &read)
            .field("retired", &self.is_retired())
            .finish()
    }
}
