use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tempo_sched::audio::backend::OfflineBackend;
use tempo_sched::sequencer::NoteHandle;
use tempo_sched::{
    Duration, Engine, EngineConfig, InstrumentTrack, Location, LocationToTime, MidiNote, Region,
    Tempo, TimeSignature, TimelineChange,
};

/// Tempo map with a change every bar, alternating meters every eight bars
fn busy_map(bars: i32) -> LocationToTime {
    let mut changes = Vec::new();
    for bar in 2..=bars {
        if bar % 8 == 1 {
            let meter = if bar % 16 == 1 {
                TimeSignature::four_four()
            } else {
                TimeSignature::three_four()
            };
            changes.push((Location::bar_start(bar), TimelineChange::Meter(meter)));
        }
        let bpm = 90.0 + (bar % 40) as f64;
        if let Ok(tempo) = Tempo::new(bpm) {
            changes.push((Location::bar_start(bar), TimelineChange::Tempo(tempo)));
        }
    }
    LocationToTime::new(Tempo::default(), TimeSignature::four_four(), changes)
        .expect("valid benchmark tempo map")
}

/// Location/time conversion is on every scheduling path
fn bench_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversion");

    for bars in [1, 64, 1024] {
        let converter = busy_map(bars);
        let location = Location::new(bars.max(2) - 1, 2, 17);
        let seconds = converter.convert_location(&location).unwrap_or(0.0);

        group.bench_with_input(BenchmarkId::new("convert_location", bars), &bars, |b, _| {
            b.iter(|| converter.convert_location(black_box(&location)));
        });
        group.bench_with_input(BenchmarkId::new("convert_time", bars), &bars, |b, _| {
            b.iter(|| converter.convert_time(black_box(seconds)));
        });
    }
    group.finish();
}

fn bench_location_arithmetic(c: &mut Criterion) {
    let signature = TimeSignature::four_four();
    let location = Location::new(12, 3, 200);
    let duration = Duration::new(1, 5, 999);

    c.bench_function("location_add_normalize", |b| {
        b.iter(|| black_box(location).add(black_box(duration), &signature));
    });
    c.bench_function("location_diff", |b| {
        let other = Location::new(40, 1, 1);
        b.iter(|| black_box(location).diff(black_box(&other), &signature));
    });
}

/// One scheduling tick over tracks full of sixteenth notes, looping
fn bench_engine_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_tick");

    for track_count in [1, 8, 32] {
        let backend = OfflineBackend::new();
        let mut engine = Engine::new(EngineConfig::default(), backend.clone(), LocationToTime::default())
            .expect("default engine");

        for index in 0..track_count {
            let track = engine
                .add_track(Box::new(InstrumentTrack::new(
                    format!("Track {}", index),
                    Box::new(BenchInstrument::default()),
                )))
                .expect("track added");
            let notes = (0..64)
                .map(|step| {
                    MidiNote::new(
                        36 + (step % 24) as u8,
                        100,
                        Duration::new(0, 0, step * 120),
                        Duration::new(0, 0, 100),
                    )
                })
                .collect();
            engine
                .add_region(
                    track,
                    Region::midi("Pattern", Location::ORIGIN, Duration::new(4, 0, 0), notes),
                )
                .expect("region added");
        }
        engine
            .set_loop_region(Location::ORIGIN, Location::bar_start(5))
            .expect("loop set");
        engine.set_looping(true);
        engine.start().expect("started");

        group.bench_with_input(
            BenchmarkId::from_parameter(track_count),
            &track_count,
            |b, _| {
                b.iter(|| {
                    backend.advance(0.025);
                    engine.tick().expect("tick");
                    backend.take_commands();
                });
            },
        );
    }
    group.finish();
}

/// Counts calls without logging so the benchmark measures scheduling only
#[derive(Default)]
struct BenchInstrument {
    next: u64,
}

impl tempo_sched::Instrument for BenchInstrument {
    fn note_on(&mut self, _pitch: u8, _velocity: u8, _when: f64) -> NoteHandle {
        self.next += 1;
        NoteHandle(self.next)
    }

    fn note_off(&mut self, _note: NoteHandle, _when: f64) {}

    fn all_notes_off(&mut self) {}
}

criterion_group!(
    benches,
    bench_conversion,
    bench_location_arithmetic,
    bench_engine_tick
);
criterion_main!(benches);
