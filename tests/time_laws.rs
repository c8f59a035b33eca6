//! Randomized checks of the musical time arithmetic and the tempo map
//!
//! Every law is exercised on random locations across a map with tempo and
//! meter changes, so segment boundaries get hit as well as segment interiors.

use rand::Rng;
use tempo_sched::{Duration, Location, LocationToTime, Tempo, TimeSignature, TimelineChange};

const ITERATIONS: usize = 2000;

fn signatures() -> Vec<TimeSignature> {
    vec![
        TimeSignature::four_four(),
        TimeSignature::three_four(),
        TimeSignature::six_eight(),
        TimeSignature::new(7, 96).unwrap(),
    ]
}

/// 120 BPM 4/4 with a mid-beat tempo change, 3/4 from bar 9 and 7 coarse beats from bar 20
fn changing_map() -> LocationToTime {
    LocationToTime::new(
        Tempo::new(120.0).unwrap(),
        TimeSignature::four_four(),
        vec![
            (Location::new(4, 3, 241), TimelineChange::Tempo(Tempo::new(133.0).unwrap())),
            (Location::bar_start(9), TimelineChange::Meter(TimeSignature::three_four())),
            (Location::bar_start(9), TimelineChange::Tempo(Tempo::new(97.0).unwrap())),
            (Location::bar_start(20), TimelineChange::Meter(TimeSignature::new(7, 240).unwrap())),
            (Location::bar_start(20), TimelineChange::Tempo(Tempo::new(174.5).unwrap())),
        ],
    )
    .unwrap()
}

fn random_location(rng: &mut impl Rng, converter: &LocationToTime) -> Location {
    let bar = rng.gen_range(1..=40);
    let signature = converter.time_signature_at_location(&Location::bar_start(bar));
    Location::new(
        bar,
        rng.gen_range(1..=signature.beats_per_bar() as i32),
        rng.gen_range(1..=signature.ticks_per_beat() as i32),
    )
}

fn random_raw_location(rng: &mut impl Rng) -> Location {
    Location::new(
        rng.gen_range(1..=500),
        rng.gen_range(-20..=40),
        rng.gen_range(-5000..=5000),
    )
}

#[test]
fn test_convert_time_inverts_convert_location() {
    let mut rng = rand::thread_rng();
    let converter = changing_map();

    for _ in 0..ITERATIONS {
        let location = random_location(&mut rng, &converter);
        let seconds = converter.convert_location(&location).unwrap();
        assert_eq!(
            converter.convert_time(seconds).unwrap(),
            location,
            "round trip through {}s",
            seconds
        );
    }
}

#[test]
fn test_constant_tempo_round_trip_for_every_signature() {
    let mut rng = rand::thread_rng();

    for signature in signatures() {
        let tempo = Tempo::new(rng.gen_range(40.0..240.0)).unwrap();
        let converter = LocationToTime::constant(tempo, signature);
        for _ in 0..ITERATIONS / 4 {
            let location = Location::new(
                rng.gen_range(1..=300),
                rng.gen_range(1..=signature.beats_per_bar() as i32),
                rng.gen_range(1..=signature.ticks_per_beat() as i32),
            );
            let seconds = converter.convert_location(&location).unwrap();
            assert_eq!(converter.convert_time(seconds).unwrap(), location);
        }
    }
}

#[test]
fn test_conversion_is_strictly_monotonic() {
    let mut rng = rand::thread_rng();
    let converter = changing_map();

    for _ in 0..ITERATIONS {
        let a = random_location(&mut rng, &converter);
        let b = random_location(&mut rng, &converter);
        let (sa, sb) = (
            converter.convert_location(&a).unwrap(),
            converter.convert_location(&b).unwrap(),
        );
        match a.cmp(&b) {
            std::cmp::Ordering::Less => assert!(sa < sb, "{} -> {} vs {} -> {}", a, sa, b, sb),
            std::cmp::Ordering::Equal => assert_eq!(sa, sb),
            std::cmp::Ordering::Greater => assert!(sa > sb, "{} -> {} vs {} -> {}", a, sa, b, sb),
        }
    }
}

#[test]
fn test_convert_time_never_moves_backwards() {
    let mut rng = rand::thread_rng();
    let converter = changing_map();

    let mut times: Vec<f64> = (0..ITERATIONS).map(|_| rng.gen_range(0.0..90.0)).collect();
    times.sort_by(|a, b| a.total_cmp(b));

    let locations: Vec<Location> = times
        .iter()
        .map(|&seconds| converter.convert_time(seconds).unwrap())
        .collect();
    assert!(locations.windows(2).all(|pair| pair[0] <= pair[1]));

    // Rounded down: the location never sounds later than the time it came from
    for (seconds, location) in times.iter().zip(&locations) {
        assert!(converter.convert_location(location).unwrap() <= seconds + 1e-6);
    }
}

#[test]
fn test_diff_then_add_reaches_the_other_location() {
    let mut rng = rand::thread_rng();

    for signature in signatures() {
        for _ in 0..ITERATIONS / 4 {
            let a = random_raw_location(&mut rng).normalize(&signature);
            let b = random_raw_location(&mut rng).normalize(&signature);
            let d = a.diff(&b, &signature);

            assert_eq!(a.add(d, &signature), b);
            assert_eq!(b.sub(d, &signature), a);
            assert_eq!(b.diff(&a, &signature), d.neg().normalize(&signature));
        }
    }
}

#[test]
fn test_normalization_is_idempotent_and_preserves_ticks() {
    let mut rng = rand::thread_rng();

    for signature in signatures() {
        for _ in 0..ITERATIONS / 4 {
            let raw = random_raw_location(&mut rng);
            let normalized = raw.normalize(&signature);

            assert!(normalized.is_normalized(&signature));
            assert_eq!(normalized.normalize(&signature), normalized);
            assert_eq!(
                normalized.total_ticks(&signature),
                raw.total_ticks(&signature)
            );
        }
    }
}

#[test]
fn test_duration_arithmetic_is_carried_consistently() {
    let mut rng = rand::thread_rng();

    for signature in signatures() {
        for _ in 0..ITERATIONS / 4 {
            let a = Duration::new(
                rng.gen_range(-10..=10),
                rng.gen_range(-30..=30),
                rng.gen_range(-3000..=3000),
            );
            let b = Duration::new(
                rng.gen_range(-10..=10),
                rng.gen_range(-30..=30),
                rng.gen_range(-3000..=3000),
            );

            assert!(a.add(a.neg(), &signature).is_zero(&signature));
            assert_eq!(a.add(b, &signature), b.add(a, &signature));
            assert_eq!(
                a.add(b, &signature).total_ticks(&signature),
                a.total_ticks(&signature) + b.total_ticks(&signature)
            );

            // Carried fields all share one sign
            let n = a.normalize(&signature);
            let signs = [n.bars.signum(), n.beats.signum(), n.ticks.signum()];
            assert!(signs.iter().all(|&s| s >= 0) || signs.iter().all(|&s| s <= 0));
        }
    }
}

#[test]
fn test_duration_length_matches_location_difference() {
    let mut rng = rand::thread_rng();
    let converter = changing_map();

    for _ in 0..ITERATIONS {
        let location = random_location(&mut rng, &converter);
        let duration = Duration::new(0, rng.gen_range(0..=12), rng.gen_range(0..=960));
        let signature = converter.time_signature_at_location(&location);
        let end = location.add(duration, &signature);

        let length = converter
            .convert_duration_at_location(&duration, &location)
            .unwrap();
        let expected =
            converter.convert_location(&end).unwrap() - converter.convert_location(&location).unwrap();
        assert!((length - expected).abs() < 1e-12);
        assert!(length >= 0.0);
    }
}
