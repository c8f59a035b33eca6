// Tempo map - Bidirectional mapping between musical locations and seconds
// Piecewise-constant tempo and time-signature breakpoints along the timeline

use super::timeline::{Duration, Location, Tempo, TimeSignature, TimingError};

/// Conversions back from seconds snap onto a tick when they land this close below it.
/// Keeps `convert_time(convert_location(l)) == l` exact despite floating point rounding.
const TICK_TOLERANCE: f64 = 1e-6;

/// A change to the musical timeline at a given location
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimelineChange {
    Tempo(Tempo),
    Meter(TimeSignature),
}

impl TimelineChange {
    fn is_same_kind(&self, other: &TimelineChange) -> bool {
        matches!(
            (self, other),
            (TimelineChange::Tempo(_), TimelineChange::Tempo(_))
                | (TimelineChange::Meter(_), TimelineChange::Meter(_))
        )
    }
}

/// Span of the timeline with constant tempo and signature
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: Location,
    start_seconds: f64,
    tempo: Tempo,
    signature: TimeSignature,
    seconds_per_tick: f64,
}

impl Segment {
    fn ticks_until(&self, location: &Location) -> i64 {
        location.total_ticks(&self.signature) - self.start.total_ticks(&self.signature)
    }

    fn with_change(mut self, change: TimelineChange) -> Self {
        match change {
            TimelineChange::Tempo(tempo) => self.tempo = tempo,
            TimelineChange::Meter(signature) => self.signature = signature,
        }
        self.seconds_per_tick = self.tempo.seconds_per_tick(&self.signature);
        self
    }
}

/// Location/time converter over a tempo and time-signature map
///
/// Segments are precomputed at construction so every lookup is a binary search.
/// A malformed map is rejected here, never at scheduling time.
#[derive(Debug, Clone)]
pub struct LocationToTime {
    initial_tempo: Tempo,
    initial_signature: TimeSignature,
    changes: Vec<(Location, TimelineChange)>,
    segments: Vec<Segment>,
}

impl LocationToTime {
    /// Build a converter from initial values and breakpoints ordered by location
    pub fn new(
        initial_tempo: Tempo,
        initial_signature: TimeSignature,
        changes: Vec<(Location, TimelineChange)>,
    ) -> Result<Self, TimingError> {
        let mut current = Segment {
            start: Location::ORIGIN,
            start_seconds: 0.0,
            tempo: initial_tempo,
            signature: initial_signature,
            seconds_per_tick: initial_tempo.seconds_per_tick(&initial_signature),
        };
        let mut segments = Vec::with_capacity(changes.len() + 1);
        let mut kinds_at_current: Vec<TimelineChange> = Vec::new();

        for (index, (location, change)) in changes.iter().enumerate() {
            if location.is_before_origin() {
                return Err(TimingError::MalformedTempoMap(format!(
                    "breakpoint {} at {} lies before the origin",
                    index, location
                )));
            }
            if *location < current.start {
                return Err(TimingError::MalformedTempoMap(format!(
                    "breakpoint {} at {} is earlier than {}",
                    index, location, current.start
                )));
            }
            if !location.is_normalized(&current.signature) {
                return Err(TimingError::MalformedTempoMap(format!(
                    "breakpoint {} is out of range for {}",
                    location, current.signature
                )));
            }
            if matches!(change, TimelineChange::Meter(_)) && (location.beat != 1 || location.tick != 1)
            {
                return Err(TimingError::MalformedTempoMap(format!(
                    "meter change at {} does not start a bar",
                    location
                )));
            }

            if *location == current.start {
                if kinds_at_current.iter().any(|seen| seen.is_same_kind(change)) {
                    return Err(TimingError::MalformedTempoMap(format!(
                        "duplicate {:?} change at {}",
                        change, location
                    )));
                }
                current = current.with_change(*change);
            } else {
                let start_seconds = current.start_seconds
                    + current.ticks_until(location) as f64 * current.seconds_per_tick;
                segments.push(current);
                kinds_at_current.clear();
                current = Segment {
                    start: *location,
                    start_seconds,
                    ..current
                }
                .with_change(*change);
            }
            kinds_at_current.push(*change);
        }
        segments.push(current);

        Ok(Self {
            initial_tempo,
            initial_signature,
            changes,
            segments,
        })
    }

    /// Converter for a piece with a single tempo and signature
    pub fn constant(tempo: Tempo, time_signature: TimeSignature) -> Self {
        let segment = Segment {
            start: Location::ORIGIN,
            start_seconds: 0.0,
            tempo,
            signature: time_signature,
            seconds_per_tick: tempo.seconds_per_tick(&time_signature),
        };

        Self {
            initial_tempo: tempo,
            initial_signature: time_signature,
            changes: Vec::new(),
            segments: vec![segment],
        }
    }

    /// Rebuild with one more breakpoint; replaces a change of the same kind at the same location
    pub fn with_change(
        &self,
        location: Location,
        change: TimelineChange,
    ) -> Result<Self, TimingError> {
        let mut changes = self.changes.clone();
        changes.retain(|(existing, c)| !(*existing == location && c.is_same_kind(&change)));
        let insert_at = changes.partition_point(|(existing, _)| *existing <= location);
        changes.insert(insert_at, (location, change));

        Self::new(self.initial_tempo, self.initial_signature, changes)
    }

    pub fn changes(&self) -> &[(Location, TimelineChange)] {
        &self.changes
    }

    pub fn initial_tempo(&self) -> Tempo {
        self.initial_tempo
    }

    pub fn initial_signature(&self) -> TimeSignature {
        self.initial_signature
    }

    fn segment_at_location(&self, location: &Location) -> &Segment {
        let index = self
            .segments
            .partition_point(|segment| segment.start <= *location)
            .max(1);
        &self.segments[index - 1]
    }

    fn segment_at_seconds(&self, seconds: f64) -> &Segment {
        let index = self
            .segments
            .partition_point(|segment| segment.start_seconds <= seconds)
            .max(1);
        &self.segments[index - 1]
    }

    /// Seconds elapsed from the transport origin to `location`
    pub fn convert_location(&self, location: &Location) -> Result<f64, TimingError> {
        if location.is_before_origin() {
            return Err(TimingError::BeforeOrigin(location.to_string()));
        }

        let segment = self.segment_at_location(location);
        Ok(segment.start_seconds + segment.ticks_until(location) as f64 * segment.seconds_per_tick)
    }

    /// Location reached `seconds` after the transport origin, rounded down to a tick
    pub fn convert_time(&self, seconds: f64) -> Result<Location, TimingError> {
        // Written this way so NaN is rejected too
        if !(seconds >= 0.0) {
            return Err(TimingError::BeforeOrigin(format!("{}s", seconds)));
        }

        let segment = self.segment_at_seconds(seconds);
        let elapsed_ticks =
            ((seconds - segment.start_seconds) / segment.seconds_per_tick + TICK_TOLERANCE).floor() as i64;
        let total = segment.start.total_ticks(&segment.signature) + elapsed_ticks;

        Ok(Location::from_total_ticks(total, &segment.signature))
    }

    /// Real-time length of `duration` when it starts at `location`
    ///
    /// The duration is carried under the signature in force at `location`.
    pub fn convert_duration_at_location(
        &self,
        duration: &Duration,
        location: &Location,
    ) -> Result<f64, TimingError> {
        let signature = self.time_signature_at_location(location);
        let end = location.add(*duration, &signature);
        Ok(self.convert_location(&end)? - self.convert_location(location)?)
    }

    pub fn time_signature_at_location(&self, location: &Location) -> TimeSignature {
        self.segment_at_location(location).signature
    }

    pub fn tempo_at_location(&self, location: &Location) -> Tempo {
        self.segment_at_location(location).tempo
    }
}

impl Default for LocationToTime {
    fn default() -> Self {
        Self::constant(Tempo::default(), TimeSignature::default())
    }
}
