// Timeline - Musical time representation
// Bar/beat/tick positions and offsets with carry arithmetic under a time signature

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Errors raised by the musical time model and the time converter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    #[error("Invalid time signature {beats_per_bar}/{ticks_per_beat}: both fields must be > 0")]
    InvalidTimeSignature {
        beats_per_bar: u32,
        ticks_per_beat: u32,
    },

    #[error("Invalid tempo: {0} BPM (must be between 20 and 999)")]
    InvalidTempo(f64),

    #[error("Malformed tempo map: {0}")]
    MalformedTempoMap(String),

    #[error("Position before transport origin: {0}")]
    BeforeOrigin(String),
}

/// Time signature: beats per bar and tick resolution of one beat
/// Example: 4/4 at 480 PPQ = TimeSignature { beats_per_bar: 4, ticks_per_beat: 480 }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawTimeSignature")]
pub struct TimeSignature {
    beats_per_bar: u32,
    ticks_per_beat: u32,
}

/// Unchecked wire form; deserialization goes through `TimeSignature::new`
#[derive(serde::Deserialize)]
struct RawTimeSignature {
    beats_per_bar: u32,
    ticks_per_beat: u32,
}

impl TryFrom<RawTimeSignature> for TimeSignature {
    type Error = TimingError;

    fn try_from(raw: RawTimeSignature) -> Result<Self, Self::Error> {
        Self::new(raw.beats_per_bar, raw.ticks_per_beat)
    }
}

impl TimeSignature {
    /// Standard MIDI resolution (PPQN)
    pub const DEFAULT_TICKS_PER_BEAT: u32 = 480;

    /// Creates a new time signature
    pub fn new(beats_per_bar: u32, ticks_per_beat: u32) -> Result<Self, TimingError> {
        if beats_per_bar == 0 || ticks_per_beat == 0 {
            return Err(TimingError::InvalidTimeSignature {
                beats_per_bar,
                ticks_per_beat,
            });
        }

        Ok(Self {
            beats_per_bar,
            ticks_per_beat,
        })
    }

    /// Common 4/4 time signature
    pub fn four_four() -> Self {
        Self {
            beats_per_bar: 4,
            ticks_per_beat: Self::DEFAULT_TICKS_PER_BEAT,
        }
    }

    /// Common 3/4 time signature (waltz)
    pub fn three_four() -> Self {
        Self {
            beats_per_bar: 3,
            ticks_per_beat: Self::DEFAULT_TICKS_PER_BEAT,
        }
    }

    /// 6/8, counted in eighth-note beats
    pub fn six_eight() -> Self {
        Self {
            beats_per_bar: 6,
            ticks_per_beat: Self::DEFAULT_TICKS_PER_BEAT,
        }
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn ticks_per_beat(&self) -> u32 {
        self.ticks_per_beat
    }

    pub fn ticks_per_bar(&self) -> i64 {
        self.beats_per_bar as i64 * self.ticks_per_beat as i64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} beats @{} ticks", self.beats_per_bar, self.ticks_per_beat)
    }
}

/// Tempo in BPM (Beats Per Minute)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawTempo")]
pub struct Tempo {
    bpm: f64,
}

#[derive(serde::Deserialize)]
struct RawTempo {
    bpm: f64,
}

impl TryFrom<RawTempo> for Tempo {
    type Error = TimingError;

    fn try_from(raw: RawTempo) -> Result<Self, Self::Error> {
        Self::new(raw.bpm)
    }
}

impl Tempo {
    /// Creates a new tempo
    /// BPM must be in range [20.0, 999.0]
    pub fn new(bpm: f64) -> Result<Self, TimingError> {
        if !(20.0..=999.0).contains(&bpm) {
            return Err(TimingError::InvalidTempo(bpm));
        }
        Ok(Self { bpm })
    }

    /// Get BPM value
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Duration of one beat in seconds
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Duration of one tick in seconds at the given resolution
    pub fn seconds_per_tick(&self, time_signature: &TimeSignature) -> f64 {
        self.seconds_per_beat() / time_signature.ticks_per_beat() as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: 120.0 }
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

/// Signed musical offset (bars, beats, ticks)
///
/// A duration is a difference between two locations, not a position: fields may be
/// negative and are only carried into range when a time signature is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Duration {
    pub bars: i32,
    pub beats: i32,
    pub ticks: i32,
}

impl Duration {
    pub const ZERO: Duration = Duration {
        bars: 0,
        beats: 0,
        ticks: 0,
    };

    pub fn new(bars: i32, beats: i32, ticks: i32) -> Self {
        Self { bars, beats, ticks }
    }

    /// Build the carried representation of a tick count.
    /// All non-zero fields share the sign of `ticks`.
    pub fn from_ticks(ticks: i64, time_signature: &TimeSignature) -> Self {
        let sign = ticks.signum();
        let magnitude = ticks.abs();
        let ticks_per_bar = time_signature.ticks_per_bar();
        let ticks_per_beat = time_signature.ticks_per_beat() as i64;

        let bars = magnitude / ticks_per_bar;
        let beats = (magnitude % ticks_per_bar) / ticks_per_beat;
        let rest = magnitude % ticks_per_beat;

        Self {
            bars: (sign * bars) as i32,
            beats: (sign * beats) as i32,
            ticks: (sign * rest) as i32,
        }
    }

    /// Length in ticks under the given signature
    pub fn total_ticks(&self, time_signature: &TimeSignature) -> i64 {
        (self.bars as i64 * time_signature.beats_per_bar() as i64 + self.beats as i64)
            * time_signature.ticks_per_beat() as i64
            + self.ticks as i64
    }

    pub fn normalize(&self, time_signature: &TimeSignature) -> Self {
        Self::from_ticks(self.total_ticks(time_signature), time_signature)
    }

    pub fn neg(&self) -> Self {
        Self::new(-self.bars, -self.beats, -self.ticks)
    }

    pub fn add(&self, other: Duration, time_signature: &TimeSignature) -> Self {
        Self::from_ticks(
            self.total_ticks(time_signature) + other.total_ticks(time_signature),
            time_signature,
        )
    }

    pub fn compare(&self, other: &Duration, time_signature: &TimeSignature) -> Ordering {
        self.total_ticks(time_signature)
            .cmp(&other.total_ticks(time_signature))
    }

    pub fn is_zero(&self, time_signature: &TimeSignature) -> bool {
        self.total_ticks(time_signature) == 0
    }

    pub fn is_positive(&self, time_signature: &TimeSignature) -> bool {
        self.total_ticks(time_signature) > 0
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}b {}q {}t", self.bars, self.beats, self.ticks)
    }
}

/// Absolute musical position (bar, beat, tick), 1-based in all three fields
///
/// Locations are immutable values; arithmetic returns new instances. Ordering is
/// lexicographic on (bar, beat, tick), which is valid because both operands are kept
/// normalized under the signature in force at their position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Location {
    pub bar: i32,
    pub beat: i32,
    pub tick: i32,
}

impl Location {
    /// Transport origin (bar 1, beat 1, tick 1)
    pub const ORIGIN: Location = Location {
        bar: 1,
        beat: 1,
        tick: 1,
    };

    pub fn new(bar: i32, beat: i32, tick: i32) -> Self {
        Self { bar, beat, tick }
    }

    /// Start of the given bar
    pub fn bar_start(bar: i32) -> Self {
        Self::new(bar, 1, 1)
    }

    /// Ticks elapsed since the origin when the whole span uses `time_signature`
    pub fn total_ticks(&self, time_signature: &TimeSignature) -> i64 {
        let ticks_per_beat = time_signature.ticks_per_beat() as i64;
        let beats_per_bar = time_signature.beats_per_bar() as i64;

        // Convert to 0-based for calculation
        let bar_0 = (self.bar - 1) as i64;
        let beat_0 = (self.beat - 1) as i64;
        let tick_0 = (self.tick - 1) as i64;

        (bar_0 * beats_per_bar + beat_0) * ticks_per_beat + tick_0
    }

    /// Create from ticks elapsed since the origin
    pub fn from_total_ticks(total_ticks: i64, time_signature: &TimeSignature) -> Self {
        let ticks_per_beat = time_signature.ticks_per_beat() as i64;
        let ticks_per_bar = time_signature.ticks_per_bar();

        let bar = total_ticks.div_euclid(ticks_per_bar) + 1;
        let remaining_after_bars = total_ticks.rem_euclid(ticks_per_bar);
        let beat = remaining_after_bars / ticks_per_beat + 1;
        let tick = remaining_after_bars % ticks_per_beat + 1;

        Self::new(bar as i32, beat as i32, tick as i32)
    }

    /// Rewrap overflowing (or underflowing) beat/tick fields into bar/beat carries
    pub fn normalize(&self, time_signature: &TimeSignature) -> Self {
        Self::from_total_ticks(self.total_ticks(time_signature), time_signature)
    }

    pub fn is_normalized(&self, time_signature: &TimeSignature) -> bool {
        self.beat >= 1
            && self.beat <= time_signature.beats_per_bar() as i32
            && self.tick >= 1
            && self.tick <= time_signature.ticks_per_beat() as i32
    }

    /// True for positions that lie before the transport origin
    pub fn is_before_origin(&self) -> bool {
        *self < Self::ORIGIN || self.beat < 1 || self.tick < 1
    }

    pub fn add(&self, duration: Duration, time_signature: &TimeSignature) -> Self {
        Self::from_total_ticks(
            self.total_ticks(time_signature) + duration.total_ticks(time_signature),
            time_signature,
        )
    }

    pub fn sub(&self, duration: Duration, time_signature: &TimeSignature) -> Self {
        self.add(duration.neg(), time_signature)
    }

    /// Duration `d` such that `self.add(d, ts) == other`
    pub fn diff(&self, other: &Location, time_signature: &TimeSignature) -> Duration {
        Duration::from_ticks(
            other.total_ticks(time_signature) - self.total_ticks(time_signature),
            time_signature,
        )
    }

    /// Three-way comparison as -1, 0 or 1
    pub fn compare(&self, other: &Location) -> i32 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::ORIGIN
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.bar, self.beat, self.tick)
    }
}
