// tempo_sched demo - Runs the scheduler headless against a logging backend
//
// Usage: tempo_sched [config.ron]
// Set RUST_LOG=tempo_sched=debug to see every scheduling window.

use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use tempo_sched::sequencer::LoggingInstrument;
use tempo_sched::{
    AudioBufferId, AudioClip, AudioTrack, Duration, Engine, EngineConfig, InstrumentTrack,
    Location, LocationToTime, LoggingBackend, MidiNote, Region, SchedulerThread, Tempo,
    TimeSignature, TimelineChange,
};

/// How long the demo plays
const RUN_SECONDS: u64 = 6;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(%path, error = %e, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    // 120 BPM in 4/4, speeding up and switching to 3/4 from bar 3
    let converter = LocationToTime::new(
        Tempo::new(120.0)?,
        TimeSignature::four_four(),
        vec![
            (Location::bar_start(3), TimelineChange::Tempo(Tempo::new(140.0)?)),
            (
                Location::bar_start(3),
                TimelineChange::Meter(TimeSignature::three_four()),
            ),
        ],
    )?;

    let period = config.scheduling_period();
    let mut engine = Engine::new(config, LoggingBackend::new(), converter)?;
    engine.on_playback(|event| tracing::info!(?event, "playback"));

    let keys = engine.add_track(Box::new(InstrumentTrack::new(
        "Keys",
        Box::new(LoggingInstrument::default()),
    )))?;
    let arpeggio = [60, 64, 67, 72]
        .iter()
        .enumerate()
        .map(|(beat, &pitch)| {
            MidiNote::new(pitch, 100, Duration::new(0, beat as i32, 0), Duration::new(0, 0, 240))
        })
        .collect();
    engine.add_region(
        keys,
        Region::midi("Arpeggio", Location::ORIGIN, Duration::new(1, 0, 0), arpeggio),
    )?;

    let drums = engine.add_track(Box::new(AudioTrack::new("Drums")))?;
    engine.add_region(
        drums,
        Region::audio(
            "Beat",
            Location::ORIGIN,
            Duration::new(2, 0, 0),
            AudioClip::new(AudioBufferId(1)),
        ),
    )?;

    engine.set_loop_region(Location::ORIGIN, Location::bar_start(2))?;
    engine.set_looping(true);
    engine.set_playback_end(Location::bar_start(6))?;
    engine.start()?;

    let shared = engine.shared_state();
    let engine = Arc::new(Mutex::new(engine));
    let mut scheduler = SchedulerThread::spawn(Arc::clone(&engine), period);

    for second in 1..=RUN_SECONDS {
        thread::sleep(StdDuration::from_secs(1));
        tracing::info!(
            second,
            position = shared.position_seconds(),
            iteration = shared.loop_iteration(),
            "transport"
        );
        if second == 3 {
            // Leave the loop and play on to the end locator
            if let Ok(mut engine) = engine.lock() {
                engine.set_looping(false);
            }
        }
    }

    scheduler.stop();
    if let Ok(mut engine) = engine.lock() {
        engine.stop();
    }
    Ok(())
}
