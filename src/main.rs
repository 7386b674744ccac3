//! Demo: a simulated network receiver feeding the jitter buffer with uneven
//! timing while the default output device plays it.
//!
//! Usage: `playout-bridge [config.json]`

use anyhow::Result;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use playout_bridge::{
    AudioFormat, EngineConfig, EngineEvent, IncomingFrame, JitterBufferEngine, PlayoutHandle,
    jitter_buffer, io::AudioOutput,
};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const DEMO_SECONDS: u64 = 10;
const TONE_HZ: f32 = 440.0;
const TONE_GAIN: f32 = 0.2;

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    info!("Starting playout bridge demo with {:?}", config);

    let format = AudioFormat::new(48000, 2)?;
    let (mut engine, playout) = jitter_buffer(config)?;
    let (event_tx, event_rx) = crossbeam::channel::unbounded();
    engine.set_event_sink(Arc::new(event_tx));

    let receiver = std::thread::Builder::new()
        .name("receiver".into())
        .spawn(move || simulate_receiver(engine, format))?;

    run_playback(playout, event_rx)?;

    if receiver.join().is_err() {
        anyhow::bail!("Receiver thread panicked");
    }
    info!("Demo finished");
    Ok(())
}

/// Delivers 10ms sine frames, sleeping a random 2-18ms between them so the
/// average rate matches the device but individual arrivals jitter.
fn simulate_receiver(mut engine: JitterBufferEngine, format: AudioFormat) {
    let mut rng = rand::thread_rng();
    let samples_per_frame = format.samples_per_10ms() as usize;
    let channels = format.channels() as usize;
    let step = TONE_HZ * std::f32::consts::TAU / format.sample_rate() as f32;
    let mut phase = 0.0f32;

    let deadline = Instant::now() + Duration::from_secs(DEMO_SECONDS);
    while Instant::now() < deadline {
        let mut samples = Vec::with_capacity(samples_per_frame * channels);
        for _ in 0..samples_per_frame {
            let value = phase.sin() * TONE_GAIN;
            samples.extend(std::iter::repeat_n(value, channels));
            phase = (phase + step) % std::f32::consts::TAU;
        }
        engine.on_frame(IncomingFrame::new(
            samples,
            format.sample_rate(),
            format.channels(),
        ));
        std::thread::sleep(Duration::from_millis(rng.gen_range(2..=18)));
    }

    info!("Receiver done, final stats: {:?}", engine.stats());
    engine.dispose();
}

/// Opens the device once the engine is ready and logs events until disposal.
fn run_playback(playout: PlayoutHandle, events: Receiver<EngineEvent>) -> Result<()> {
    let controls = playout.controls();
    let mut playout = Some(playout);
    let mut stream = None;
    let mut last_report = Instant::now();

    loop {
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(EngineEvent::Ready(format)) => {
                info!("Engine ready at {}", format);
                // The first Ready opens the device; later ones reuse it.
                if let Some(playout) = playout.take() {
                    stream = Some(AudioOutput::new(playout, format).start()?);
                }
            }
            Ok(EngineEvent::Disposed) => {
                info!("Engine disposed");
                break;
            }
            Ok(EngineEvent::Underrun { silence_samples }) => {
                warn!("Underrun: {} samples of silence", silence_samples);
            }
            Ok(event) => info!("Event: {:?}", event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            info!("Stats: {:?}", controls.stats());
            last_report = Instant::now();
        }
    }

    drop(stream);
    Ok(())
}
