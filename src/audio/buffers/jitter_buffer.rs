//! A jitter buffer bridging an irregular frame producer and a hardware clock.
//!
//! Frames arrive in bursts on a non-real-time thread; the audio callback pulls
//! fixed-size chunks on its own schedule. The two halves returned by
//! [`jitter_buffer`] share only a [`SampleRing`] and a few atomics:
//!
//! - [`JitterBufferEngine`] (producer) queues frames, writes them into the ring
//!   and corrects drift against the consumer's position on every frame.
//! - [`PlayoutHandle`] (consumer) fills whatever buffer the callback hands it,
//!   substituting silence when data is missing. It never blocks or allocates.
//!
//! Lifecycle: Empty -> Buffering -> Steady, back to Empty whenever the format
//! changes or the host invalidates its playable buffer.

use crate::audio::buffers::{FrameQueue, SampleRing};
use crate::audio::drift::{DriftState, DriftTracker};
use crate::audio::format::AudioFormat;
use crate::audio::frame::IncomingFrame;
use crate::audio::level::calculate_rms_level;
use crate::audio::policy::{BufferPolicy, EngineState};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, Pushable};
use anyhow::Result;
use crossbeam::atomic::AtomicCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

/// Counters for everything the engine absorbs instead of failing.
#[derive(Debug, Default)]
pub struct EngineStats {
    frames_received: AtomicU64,
    frames_malformed: AtomicU64,
    frames_settling: AtomicU64,
    frames_overflowed: AtomicU64,
    format_resets: AtomicU64,
    seeded_samples: AtomicU64,
    corrections: AtomicU64,
    correction_samples: AtomicU64,
    underruns: AtomicU64,
    underrun_silence_samples: AtomicU64,
    resyncs: AtomicU64,
    samples_pulled: AtomicU64,
    silence_samples_pulled: AtomicU64,
    audio_level: AtomicU32,
}

/// A plain copy of [`EngineStats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_malformed: u64,
    /// Frames discarded while the stream format settles.
    pub frames_settling: u64,
    pub frames_overflowed: u64,
    pub format_resets: u64,
    /// Interleaved samples written as the initial lead.
    pub seeded_samples: u64,
    pub corrections: u64,
    /// Per-channel samples requested by drift corrections.
    pub correction_samples: u64,
    pub underruns: u64,
    pub underrun_silence_samples: u64,
    pub resyncs: u64,
    pub samples_pulled: u64,
    pub silence_samples_pulled: u64,
    /// RMS level (0-100) of the last accepted frame.
    pub audio_level: u32,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            frames_settling: self.frames_settling.load(Ordering::Relaxed),
            frames_overflowed: self.frames_overflowed.load(Ordering::Relaxed),
            format_resets: self.format_resets.load(Ordering::Relaxed),
            seeded_samples: self.seeded_samples.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            correction_samples: self.correction_samples.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            underrun_silence_samples: self.underrun_silence_samples.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            samples_pulled: self.samples_pulled.load(Ordering::Relaxed),
            silence_samples_pulled: self.silence_samples_pulled.load(Ordering::Relaxed),
            audio_level: self.audio_level.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

/// State shared by the producer and consumer halves.
struct Shared {
    /// The newest ring published by the producer, not yet picked up.
    ///
    /// Rings the consumer has taken are dropped on the consumer thread. A ring
    /// replaced here before it was taken is dropped by the producer.
    mailbox: AtomicCell<Option<Arc<SampleRing>>>,
    playing: AtomicBool,
    invalidated: AtomicBool,
    stats: EngineStats,
}

/// Creates a jitter buffer split into its producer and consumer halves.
///
/// Fails only when `config` is unusable.
pub fn jitter_buffer(config: EngineConfig) -> Result<(JitterBufferEngine, PlayoutHandle)> {
    config.validate()?;
    let shared = Arc::new(Shared {
        mailbox: AtomicCell::new(None),
        playing: AtomicBool::new(true),
        invalidated: AtomicBool::new(false),
        stats: EngineStats::default(),
    });

    let engine = JitterBufferEngine {
        settle_remaining: config.ignored_startup_frames,
        config,
        shared: shared.clone(),
        state: EngineState::Empty,
        stream: None,
        events: None,
        last_correction: 0,
        disposed: false,
    };
    let playout = PlayoutHandle { shared, ring: None };
    Ok((engine, playout))
}

/// What one steady step did, reported after the stream borrow ends.
#[derive(Debug, Default)]
struct StepReport {
    correction: u64,
    drift: Option<DriftState>,
    silence_samples: usize,
    resynced: bool,
}

/// Ring, tracker and queue for one format. Recreated on every reset.
struct ActiveStream {
    format: AudioFormat,
    policy: BufferPolicy,
    channels: usize,
    queue: FrameQueue,
    ring: Arc<SampleRing>,
    tracker: DriftTracker,
}

impl ActiveStream {
    fn new(config: &EngineConfig, format: AudioFormat) -> Result<Self> {
        let policy = BufferPolicy::new(config, format)?;
        let ring = SampleRing::new(format, config.rebase_period_seconds)?;
        let tracker = DriftTracker::new(
            format.sample_rate(),
            policy.samples_per_10ms,
            policy.safety_margin_samples,
        );
        Ok(Self {
            format,
            policy,
            channels: format.channels() as usize,
            queue: FrameQueue::new(config.max_queued_frames),
            ring: Arc::new(ring),
            tracker,
        })
    }

    /// Anchors the writer to the consumer and writes the seed lead.
    /// Returns the interleaved samples written.
    fn start_playback(&mut self) -> usize {
        self.ring.align_writer();
        self.tracker.initialize(self.ring.consumer_position());

        let mut seeded = 0;
        for _ in 0..self.policy.seed_frames() {
            match self.write_next() {
                Some(len) => seeded += len,
                None => break,
            }
        }
        seeded
    }

    /// Writes the oldest queued frame if the ring has room for it.
    fn write_next(&mut self) -> Option<usize> {
        let len = self.queue.front_len()?;
        if !self.ring.has_room(len) {
            return None;
        }
        let frame = self.queue.pop()?;
        self.ring.write(&frame);
        self.tracker.advance_buffer((len / self.channels) as u64);
        Some(len)
    }

    fn write_silence(&mut self, samples_per_channel: u64) -> Option<usize> {
        let len = samples_per_channel as usize * self.channels;
        if !self.ring.has_room(len) {
            return None;
        }
        self.ring.write_silence(len);
        self.tracker.advance_buffer(samples_per_channel);
        Some(len)
    }

    /// Writes whole 10ms units covering `samples_per_channel`, queued frames
    /// first, then silence. Returns the interleaved silence samples written.
    fn catch_up(&mut self, samples_per_channel: u64) -> usize {
        let unit = self.policy.samples_per_10ms as u64;
        let target = self.policy.units_for(samples_per_channel) * unit;
        let mut written = 0u64;
        let mut silence = 0;

        while written < target {
            if let Some(len) = self.write_next() {
                written += (len / self.channels) as u64;
                continue;
            }
            let chunk = unit.min(target - written);
            match self.write_silence(chunk) {
                Some(len) => {
                    silence += len;
                    written += chunk;
                }
                None => break,
            }
        }
        silence
    }

    /// Writes the next frame, then checks and corrects drift.
    fn step(&mut self, playing: bool) -> StepReport {
        let mut report = StepReport::default();
        if !playing {
            return report;
        }

        self.write_next();
        let correction = self.tracker.check_correction(self.ring.consumer_position());
        report.correction = correction;

        if correction > 0 {
            let drift = self.tracker.state();
            report.drift = Some(drift);

            // Whatever the consumer already played past is gone; restart the
            // writer at the read cursor instead of filling the past.
            let lag = self.tracker.lag();
            if drift == DriftState::Overrun {
                self.ring.align_writer();
                self.tracker.advance_buffer(lag);
            }
            report.silence_samples += self.catch_up(correction - lag);
        }

        // The consumer lapped the wrapping position counter, so the tracker
        // could not see it; the ring cursors still can.
        if self.ring.lead() < 0 {
            self.ring.align_writer();
            self.tracker.initialize(self.ring.consumer_position());
            report.silence_samples += self.catch_up(self.tracker.safety_margin());
            report.resynced = true;
        }
        report
    }
}

/// Producer half of the jitter buffer.
///
/// Owned by the thread that receives decoded frames. All state transitions
/// happen inside [`JitterBufferEngine::on_frame`].
pub struct JitterBufferEngine {
    config: EngineConfig,
    shared: Arc<Shared>,
    state: EngineState,
    stream: Option<ActiveStream>,
    /// Frames still to discard before a format is adopted.
    settle_remaining: usize,
    events: Option<Arc<dyn Pushable<EngineEvent>>>,
    last_correction: u64,
    disposed: bool,
}

impl std::fmt::Debug for JitterBufferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitterBufferEngine")
            .field("state", &self.state)
            .field("format", &self.format())
            .field("queued_frames", &self.queued_frames())
            .field("settle_remaining", &self.settle_remaining)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl JitterBufferEngine {
    pub fn set_event_sink(&mut self, sink: Arc<dyn Pushable<EngineEvent>>) {
        self.events = Some(sink);
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.stream.as_ref().map(|stream| stream.format)
    }

    pub fn queued_frames(&self) -> usize {
        self.stream.as_ref().map_or(0, |stream| stream.queue.len())
    }

    /// Correction requested by the most recent drift check, in per-channel samples.
    pub fn last_correction(&self) -> u64 {
        self.last_correction
    }

    /// Interleaved samples written ahead of the consumer.
    pub fn lead_samples(&self) -> i64 {
        self.stream.as_ref().map_or(0, |stream| stream.ring.lead())
    }

    /// `(write, read)` cursors of the active ring.
    pub fn ring_positions(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().map(|stream| stream.ring.positions())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Ingests one decoded frame.
    ///
    /// Never fails: malformed frames are dropped, format changes reset the
    /// stream, and shortages are covered with silence. Everything is reported
    /// through events and [`StatsSnapshot`].
    pub fn on_frame(&mut self, frame: IncomingFrame) {
        if self.disposed {
            trace!("JitterBuffer: Disposed, ignoring frame");
            return;
        }
        EngineStats::bump(&self.shared.stats.frames_received, 1);

        let format = match frame.validate() {
            Ok(format) => format,
            Err(defect) => {
                EngineStats::bump(&self.shared.stats.frames_malformed, 1);
                warn!("JitterBuffer: Dropping malformed frame: {}", defect);
                self.emit(EngineEvent::MalformedFrame(defect));
                return;
            }
        };

        if self.shared.invalidated.swap(false, Ordering::AcqRel) && self.stream.is_some() {
            info!("JitterBuffer: Playback buffer invalidated, rebuffering");
            self.reset();
            self.emit(EngineEvent::PlaybackInvalidated);
        }

        if let Some(previous) = self.format() {
            if previous != format {
                info!(
                    "JitterBuffer: Format changed {} -> {}, resetting",
                    previous, format
                );
                self.reset();
                self.settle_remaining = self.config.ignored_startup_frames;
                EngineStats::bump(&self.shared.stats.format_resets, 1);
                self.emit(EngineEvent::FormatReset {
                    previous,
                    next: format,
                });
            }
        }

        if self.stream.is_none() && !self.open_stream(format) {
            return;
        }

        self.shared
            .stats
            .audio_level
            .store(calculate_rms_level(frame.samples()), Ordering::Relaxed);
        let playing = self.shared.playing.load(Ordering::Acquire);

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if stream.queue.push(frame.into_samples()).is_some() {
            EngineStats::bump(&self.shared.stats.frames_overflowed, 1);
            debug!("JitterBuffer: Queue full, dropped oldest frame");
        }

        let mut ready = None;
        if self.state == EngineState::Buffering {
            if stream.queue.len() < stream.policy.frames_for_buffering {
                trace!(
                    "JitterBuffer: Buffering {}/{}",
                    stream.queue.len(),
                    stream.policy.frames_for_buffering
                );
                return;
            }
            let seeded = stream.start_playback();
            EngineStats::bump(&self.shared.stats.seeded_samples, seeded as u64);
            if let Some(unclaimed) = self.shared.mailbox.swap(Some(stream.ring.clone())) {
                // The consumer never held this ring, so it is released here.
                unclaimed.retire();
                debug!("JitterBuffer: Replaced a ring the consumer never picked up");
            }
            self.state = EngineState::Steady;
            ready = Some((stream.format, seeded));
        }

        let report = stream.step(playing);

        if let Some((format, seeded)) = ready {
            info!(
                "JitterBuffer: Ready, {} with {} samples seeded",
                format, seeded
            );
            self.emit(EngineEvent::Ready(format));
        }
        self.record_step(report);
    }

    /// Discards everything and stops accepting frames. Safe to call repeatedly.
    ///
    /// The ring is only retired here; the consumer releases its reference on
    /// its own thread.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.reset();
        info!("JitterBuffer: Disposed");
        self.emit(EngineEvent::Disposed);
    }

    /// Adopts `format` unless the stream is still settling.
    fn open_stream(&mut self, format: AudioFormat) -> bool {
        if self.settle_remaining > 0 {
            self.settle_remaining -= 1;
            EngineStats::bump(&self.shared.stats.frames_settling, 1);
            debug!(
                "JitterBuffer: Ignoring settling frame {} ({} left)",
                format, self.settle_remaining
            );
            return false;
        }

        match ActiveStream::new(&self.config, format) {
            Ok(stream) => {
                info!("JitterBuffer: Buffering new stream {}", format);
                self.stream = Some(stream);
                self.state = EngineState::Buffering;
                true
            }
            Err(e) => {
                EngineStats::bump(&self.shared.stats.frames_malformed, 1);
                warn!("JitterBuffer: Cannot open stream for {}: {:#}", format, e);
                false
            }
        }
    }

    fn reset(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.ring.retire();
        }
        self.state = EngineState::Empty;
        self.last_correction = 0;
    }

    fn record_step(&mut self, report: StepReport) {
        self.last_correction = report.correction;
        let stats = &self.shared.stats;

        if let Some(state) = report.drift {
            EngineStats::bump(&stats.corrections, 1);
            EngineStats::bump(&stats.correction_samples, report.correction);
            debug!(
                "JitterBuffer: {:?}, correcting by {} samples",
                state, report.correction
            );
            self.emit(EngineEvent::Corrected {
                state,
                samples: report.correction,
            });
        }

        if report.resynced {
            EngineStats::bump(&stats.resyncs, 1);
            warn!("JitterBuffer: Consumer lapped the writer, resynchronized");
            self.emit(EngineEvent::Resynced);
        }

        if report.silence_samples > 0 {
            EngineStats::bump(&stats.underruns, 1);
            EngineStats::bump(&stats.underrun_silence_samples, report.silence_samples as u64);
            warn!(
                "JitterBuffer: Underrun, padded {} samples of silence",
                report.silence_samples
            );
            self.emit(EngineEvent::Underrun {
                silence_samples: report.silence_samples,
            });
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.events {
            sink.push(event);
        }
    }
}

impl Drop for JitterBufferEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Consumer half of the jitter buffer, driven by the audio callback.
pub struct PlayoutHandle {
    shared: Arc<Shared>,
    ring: Option<Arc<SampleRing>>,
}

impl PlayoutHandle {
    /// Fills `out` completely with interleaved samples, every call.
    ///
    /// Picks up newly published rings and drops retired ones, so ring memory
    /// is released on this thread. Missing data is replaced by silence.
    ///
    /// `out` should hold whole sample frames (a multiple of the channel
    /// count). A trailing partial frame is filled with silence and never
    /// consumed, so the channel order of later pulls is preserved.
    pub fn pull_into(&mut self, out: &mut [f32]) {
        if let Some(ring) = self.shared.mailbox.take() {
            self.ring = Some(ring);
        }
        if self.ring.as_ref().is_some_and(|ring| ring.is_retired()) {
            self.ring = None;
        }

        let filled = match &self.ring {
            Some(ring) => {
                let filled = ring.read_into(out);
                // Retired mid-read: never hand out samples of a dead format.
                if ring.is_retired() {
                    out.fill(0.0);
                    0
                } else {
                    filled
                }
            }
            None => {
                out.fill(0.0);
                0
            }
        };

        let stats = &self.shared.stats;
        EngineStats::bump(&stats.samples_pulled, out.len() as u64);
        EngineStats::bump(&stats.silence_samples_pulled, (out.len() - filled) as u64);
    }

    /// Format of the ring currently being played, if any.
    pub fn format(&self) -> Option<AudioFormat> {
        self.ring.as_ref().map(|ring| ring.format())
    }

    pub fn controls(&self) -> PlayoutControls {
        PlayoutControls {
            shared: self.shared.clone(),
        }
    }
}

/// Thread-safe controls for the consumer side, usable from any thread.
#[derive(Clone)]
pub struct PlayoutControls {
    shared: Arc<Shared>,
}

impl PlayoutControls {
    /// Suspends writing and drift correction; frames wait in the queue.
    pub fn pause(&self) {
        self.shared.playing.store(false, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.playing.store(true, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Signals that the host's playable buffer is gone (e.g. the device was
    /// reconfigured). The engine rebuffers on its next frame.
    pub fn invalidate(&self) {
        self.shared.invalidated.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::FrameDefect;
    use crossbeam::channel::Receiver;

    const UNIT: usize = 480;

    fn stereo() -> AudioFormat {
        AudioFormat::new(48000, 2).unwrap()
    }

    fn mono() -> AudioFormat {
        AudioFormat::new(48000, 1).unwrap()
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            ignored_startup_frames: 0,
            ..Default::default()
        }
    }

    fn make_engine(config: EngineConfig) -> (JitterBufferEngine, PlayoutHandle, Receiver<EngineEvent>) {
        let (mut engine, playout) = jitter_buffer(config).unwrap();
        let (tx, rx) = crossbeam::channel::unbounded();
        engine.set_event_sink(Arc::new(tx));
        (engine, playout, rx)
    }

    fn frame(value: f32, format: AudioFormat) -> IncomingFrame {
        IncomingFrame::filled(value, UNIT, format)
    }

    fn pull(playout: &mut PlayoutHandle, len: usize) -> Vec<f32> {
        let mut out = vec![f32::NAN; len];
        playout.pull_into(&mut out);
        out
    }

    fn steady_engine() -> (JitterBufferEngine, PlayoutHandle, Receiver<EngineEvent>) {
        let (mut engine, playout, rx) = make_engine(test_config());
        for _ in 0..5 {
            engine.on_frame(frame(1.0, stereo()));
        }
        assert_eq!(engine.state(), EngineState::Steady);
        (engine, playout, rx)
    }

    #[test]
    fn test_buffering_then_steady_scenario() {
        let (mut engine, mut playout, rx) = make_engine(test_config());

        for i in 0..5 {
            assert_ne!(engine.state(), EngineState::Steady, "steady too early at {}", i);
            engine.on_frame(frame(1.0, stereo()));
        }
        assert_eq!(engine.state(), EngineState::Steady);

        let stats = engine.stats();
        assert_eq!(stats.seeded_samples, 4 * 480 * 2);
        assert_eq!(engine.lead_samples(), 5 * 480 * 2);
        assert_eq!(engine.queued_frames(), 0);
        assert_eq!(engine.last_correction(), 0);
        assert!(rx.try_iter().any(|e| e == EngineEvent::Ready(stereo())));

        // The consumer plays 10ms.
        let played = pull(&mut playout, 480 * 2);
        assert!(played.iter().all(|&s| s == 1.0));

        engine.on_frame(frame(6.0, stereo()));
        assert_eq!(engine.last_correction(), 0);
        assert_eq!(engine.stats().corrections, 0);
        assert_eq!(engine.ring_positions(), Some((2880 * 2, 480 * 2)));

        let rest_of_seed = pull(&mut playout, 1920 * 2);
        assert!(rest_of_seed.iter().all(|&s| s == 1.0));
        let sixth = pull(&mut playout, 480 * 2);
        assert!(sixth.iter().all(|&s| s == 6.0));
    }

    #[test]
    fn test_pull_before_ready_is_silence() {
        let (mut engine, mut playout, _rx) = make_engine(test_config());
        assert!(pull(&mut playout, 256).iter().all(|&s| s == 0.0));

        engine.on_frame(frame(1.0, stereo()));
        assert_eq!(engine.state(), EngineState::Buffering);
        assert!(pull(&mut playout, 256).iter().all(|&s| s == 0.0));
        assert!(playout.format().is_none());

        let stats = engine.stats();
        assert_eq!(stats.samples_pulled, 512);
        assert_eq!(stats.silence_samples_pulled, 512);
    }

    #[test]
    fn test_pull_length_always_matches_request() {
        let (mut engine, mut playout, _rx) = steady_engine();

        let lengths = [1, 17, 960, 1000, 333, 4096, 2, 960];
        let mut requested = 0;
        for (i, &len) in lengths.iter().cycle().take(64).enumerate() {
            let out = pull(&mut playout, len);
            requested += len as u64;
            assert_eq!(out.len(), len);
            assert!(out.iter().all(|s| !s.is_nan()), "unfilled sample in pull {}", i);
            if i % 2 == 0 {
                engine.on_frame(frame(1.0, stereo()));
            }
        }
        assert_eq!(engine.stats().samples_pulled, requested);
    }

    #[test]
    fn test_odd_length_pull_keeps_channel_order() {
        let (mut engine, mut playout, _rx) = make_engine(test_config());
        let left_right: Vec<f32> = [-1.0, 1.0].repeat(UNIT);
        for _ in 0..5 {
            engine.on_frame(IncomingFrame::new(left_right.clone(), 48000, 2));
        }
        assert_eq!(engine.state(), EngineState::Steady);

        assert_eq!(pull(&mut playout, 1), vec![0.0]);
        assert_eq!(pull(&mut playout, 8), [-1.0, 1.0].repeat(4));

        let odd = pull(&mut playout, 333);
        assert_eq!(&odd[..332], [-1.0, 1.0].repeat(166).as_slice());
        assert_eq!(odd[332], 0.0);
        assert_eq!(pull(&mut playout, 8), [-1.0, 1.0].repeat(4));

        // Both cursors stay on channel boundaries.
        engine.on_frame(IncomingFrame::new(left_right.clone(), 48000, 2));
        assert_eq!(engine.ring_positions().map(|(w, r)| (w % 2, r % 2)), Some((0, 0)));
    }

    #[test]
    fn test_nominal_jitter_never_corrects() {
        let (mut engine, mut playout, _rx) = steady_engine();

        // Callbacks bunch up and spread out; on average one 10ms pull per frame.
        let pulls_per_frame = [1, 2, 0, 1, 3, 0, 0, 1, 2, 0];
        for round in 0..1000 {
            for _ in 0..pulls_per_frame[round % pulls_per_frame.len()] {
                let out = pull(&mut playout, UNIT * 2);
                assert!(out.iter().all(|&s| s == 1.0), "silence in round {}", round);
            }
            engine.on_frame(frame(1.0, stereo()));
            assert_eq!(engine.last_correction(), 0, "round {}", round);
        }

        let stats = engine.stats();
        assert_eq!(stats.corrections, 0);
        assert_eq!(stats.underruns, 0);
        assert_eq!(stats.silence_samples_pulled, 0);
        assert_eq!(engine.lead_samples(), 5 * 480 * 2);
    }

    #[test]
    fn test_overrun_is_padded_with_silence_to_margin() {
        let (mut engine, mut playout, rx) = steady_engine();
        rx.try_iter().for_each(drop);

        // The consumer plays 12.5ms past everything written.
        let out = pull(&mut playout, 3000 * 2);
        assert!(out[..4800].iter().all(|&s| s == 1.0));
        assert!(out[4800..].iter().all(|&s| s == 0.0));
        assert_eq!(engine.stats().silence_samples_pulled, 1200);

        engine.on_frame(frame(2.0, stereo()));
        assert_eq!(engine.last_correction(), 120 + 1440);
        assert_eq!(engine.lead_samples(), 1440 * 2);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&EngineEvent::Corrected {
            state: DriftState::Overrun,
            samples: 1560,
        }));
        assert!(events.contains(&EngineEvent::Underrun {
            silence_samples: 2880
        }));

        let stats = engine.stats();
        assert_eq!(stats.underruns, 1);
        assert_eq!(stats.corrections, 1);
    }

    #[test]
    fn test_catch_up_prefers_queued_frames() {
        let (mut engine, mut playout, rx) = steady_engine();
        rx.try_iter().for_each(drop);

        // While paused, frames pile up in the queue.
        let controls = playout.controls();
        controls.pause();
        for _ in 0..4 {
            engine.on_frame(frame(3.0, stereo()));
        }
        assert_eq!(engine.queued_frames(), 4);
        controls.resume();

        pull(&mut playout, 2400 * 2);
        engine.on_frame(frame(4.0, stereo()));

        // One frame written normally leaves a single unit of lead; two more
        // queued frames restore the margin.
        assert_eq!(engine.last_correction(), 960);
        assert_eq!(engine.queued_frames(), 2);
        assert_eq!(engine.lead_samples(), 1440 * 2);
        assert_eq!(engine.stats().underruns, 0);

        let out = pull(&mut playout, 1440 * 2);
        assert!(out.iter().all(|&s| s == 3.0));
    }

    #[test]
    fn test_format_change_resets_and_rebuffers() {
        let (mut engine, mut playout, rx) = steady_engine();
        pull(&mut playout, 480 * 2);
        rx.try_iter().for_each(drop);

        engine.on_frame(frame(0.5, mono()));
        assert_eq!(engine.state(), EngineState::Buffering);
        assert_eq!(engine.format(), Some(mono()));
        assert_eq!(engine.queued_frames(), 1);
        assert_eq!(engine.stats().format_resets, 1);
        assert!(rx.try_iter().any(|e| e
            == EngineEvent::FormatReset {
                previous: stereo(),
                next: mono(),
            }));

        // The old ring still holds stereo data, but it must not be heard.
        assert!(pull(&mut playout, 960).iter().all(|&s| s == 0.0));
        assert!(playout.format().is_none());

        for _ in 0..4 {
            engine.on_frame(frame(0.5, mono()));
        }
        assert_eq!(engine.state(), EngineState::Steady);
        assert!(rx.try_iter().any(|e| e == EngineEvent::Ready(mono())));

        assert!(pull(&mut playout, 480).iter().all(|&s| s == 0.5));
        assert_eq!(playout.format(), Some(mono()));
    }

    #[test]
    fn test_settling_frames_are_discarded() {
        let config = EngineConfig {
            ignored_startup_frames: 2,
            ..Default::default()
        };
        let (mut engine, _playout, _rx) = make_engine(config);

        for _ in 0..2 {
            engine.on_frame(frame(1.0, mono()));
            assert_eq!(engine.state(), EngineState::Empty);
        }
        // The misreported format never reaches a stream.
        assert_eq!(engine.format(), None);

        for _ in 0..5 {
            engine.on_frame(frame(1.0, stereo()));
        }
        assert_eq!(engine.state(), EngineState::Steady);

        // Settling applies again after a format change.
        engine.on_frame(frame(1.0, mono()));
        assert_eq!(engine.state(), EngineState::Empty);
        engine.on_frame(frame(1.0, mono()));
        assert_eq!(engine.state(), EngineState::Empty);
        engine.on_frame(frame(1.0, mono()));
        assert_eq!(engine.state(), EngineState::Buffering);

        assert_eq!(engine.stats().frames_settling, 4);
    }

    #[test]
    fn test_default_config_discards_five_startup_frames() {
        let (mut engine, _playout, _rx) = make_engine(EngineConfig::default());
        for _ in 0..5 {
            engine.on_frame(frame(1.0, stereo()));
        }
        assert_eq!(engine.state(), EngineState::Empty);
        engine.on_frame(frame(1.0, stereo()));
        assert_eq!(engine.state(), EngineState::Buffering);
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let (mut engine, _playout, rx) = steady_engine();
        rx.try_iter().for_each(drop);
        let lead = engine.lead_samples();

        engine.on_frame(IncomingFrame::new(Vec::new(), 48000, 2));
        engine.on_frame(IncomingFrame::new(vec![0.0; 961], 48000, 2));
        engine.on_frame(IncomingFrame::new(vec![0.0; 960], 0, 2));

        assert_eq!(engine.state(), EngineState::Steady);
        assert_eq!(engine.lead_samples(), lead);
        assert_eq!(engine.stats().frames_malformed, 3);
        let malformed = rx
            .try_iter()
            .filter(|e| matches!(e, EngineEvent::MalformedFrame(_)))
            .count();
        assert_eq!(malformed, 3);
    }

    #[test]
    fn test_oversized_frame_does_not_block_the_queue() {
        let (mut engine, mut playout, rx) = steady_engine();
        rx.try_iter().for_each(drop);

        engine.on_frame(IncomingFrame::filled(1.0, 72000, stereo()));
        assert_eq!(engine.stats().frames_malformed, 1);
        assert!(rx.try_iter().any(|e| e
            == EngineEvent::MalformedFrame(FrameDefect::Oversized {
                len: 144000,
                capacity: 96000,
            })));

        for round in 0..15 {
            let out = pull(&mut playout, 960);
            assert!(out.iter().all(|&s| s == 1.0), "silence in round {}", round);
            engine.on_frame(frame(1.0, stereo()));
        }

        let stats = engine.stats();
        assert_eq!(engine.queued_frames(), 0);
        assert_eq!(stats.silence_samples_pulled, 0);
        assert_eq!(stats.underruns, 0);
        assert_eq!(stats.frames_malformed, 1);
    }

    #[test]
    fn test_unclaimed_ring_is_replaced_by_the_newest() {
        let (mut engine, mut playout, _rx) = steady_engine();

        // The consumer never pulls the stereo ring before the format changes.
        for _ in 0..5 {
            engine.on_frame(frame(2.0, mono()));
        }
        assert_eq!(engine.state(), EngineState::Steady);

        assert!(pull(&mut playout, 480).iter().all(|&s| s == 2.0));
        assert_eq!(playout.format(), Some(mono()));
    }

    #[test]
    fn test_pause_queues_frames_and_bounds_the_queue() {
        let (mut engine, playout, _rx) = steady_engine();
        let controls = playout.controls();
        let lead = engine.lead_samples();

        controls.pause();
        assert!(!controls.is_playing());
        for _ in 0..25 {
            engine.on_frame(frame(1.0, stereo()));
        }
        assert_eq!(engine.lead_samples(), lead);
        assert_eq!(engine.queued_frames(), 20);
        assert_eq!(engine.stats().frames_overflowed, 5);
        assert_eq!(engine.stats().corrections, 0);

        controls.resume();
        engine.on_frame(frame(1.0, stereo()));
        assert_eq!(engine.lead_samples(), lead + 960);
        assert_eq!(engine.queued_frames(), 19);
    }

    #[test]
    fn test_invalidated_playback_rebuffers() {
        let (mut engine, mut playout, rx) = steady_engine();
        pull(&mut playout, 960);
        rx.try_iter().for_each(drop);

        playout.controls().invalidate();
        engine.on_frame(frame(1.0, stereo()));
        assert_eq!(engine.state(), EngineState::Buffering);
        assert!(rx.try_iter().any(|e| e == EngineEvent::PlaybackInvalidated));
        assert!(pull(&mut playout, 960).iter().all(|&s| s == 0.0));

        for _ in 0..4 {
            engine.on_frame(frame(1.0, stereo()));
        }
        assert_eq!(engine.state(), EngineState::Steady);
        assert!(pull(&mut playout, 960).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_consumer_lapping_the_counter_resyncs() {
        let (mut engine, mut playout, rx) = steady_engine();
        rx.try_iter().for_each(drop);

        // The producer stalls for just over a second; the consumer's wrapping
        // position looks like it only moved 10ms.
        for _ in 0..101 {
            pull(&mut playout, 960);
        }
        engine.on_frame(frame(1.0, stereo()));

        assert_eq!(engine.last_correction(), 0);
        assert_eq!(engine.stats().resyncs, 1);
        assert_eq!(engine.lead_samples(), 1440 * 2);
        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&EngineEvent::Resynced));
        assert!(events.contains(&EngineEvent::Underrun {
            silence_samples: 2880
        }));

        // Back to normal afterwards.
        pull(&mut playout, 960);
        engine.on_frame(frame(1.0, stereo()));
        assert_eq!(engine.last_correction(), 0);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (mut engine, mut playout, rx) = steady_engine();
        pull(&mut playout, 960);

        engine.dispose();
        engine.dispose();
        assert!(engine.is_disposed());
        assert_eq!(engine.state(), EngineState::Empty);

        let received = engine.stats().frames_received;
        engine.on_frame(frame(1.0, stereo()));
        assert_eq!(engine.stats().frames_received, received);
        assert!(pull(&mut playout, 960).iter().all(|&s| s == 0.0));

        drop(engine);
        let disposed = rx
            .try_iter()
            .filter(|e| *e == EngineEvent::Disposed)
            .count();
        assert_eq!(disposed, 1);
    }

    #[test]
    fn test_concurrent_producer_and_consumer() {
        let (mut engine, mut playout, _rx) = make_engine(test_config());
        let controls = playout.controls();

        let producer = std::thread::spawn(move || {
            for _ in 0..500 {
                engine.on_frame(frame(1.0, stereo()));
                std::thread::yield_now();
            }
            engine.dispose();
        });
        let consumer = std::thread::spawn(move || {
            let mut out = vec![0.0f32; 960];
            let mut pulled = 0u64;
            for _ in 0..500 {
                out.fill(f32::NAN);
                playout.pull_into(&mut out);
                assert!(out.iter().all(|&s| s == 0.0 || s == 1.0));
                pulled += out.len() as u64;
                std::thread::yield_now();
            }
            pulled
        });

        producer.join().unwrap();
        let pulled = consumer.join().unwrap();
        assert_eq!(pulled, 500 * 960);
        assert_eq!(controls.stats().samples_pulled, pulled);
    }
}
