// Regions - Placed blocks of MIDI notes or audio on a track
// A region is like a "clip" in other DAWs

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use thiserror::Error;

use crate::audio::backend::AudioBufferId;
use crate::sequencer::tempo_map::LocationToTime;
use crate::sequencer::timeline::{Duration, Location, TimeSignature, TimingError};

/// Global ID generators (atomic for thread-safety)
static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    pub fn generate() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Unique identifier for a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u64);

impl RegionId {
    pub fn generate() -> Self {
        Self(NEXT_REGION_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegionError {
    #[error("Cannot split region {region:?} at {offset}: split point must fall strictly inside {length}")]
    DegenerateSplit {
        region: RegionId,
        offset: Duration,
        length: Duration,
    },

    #[error("Region length must be positive, got {0}")]
    EmptyLength(Duration),

    #[error("Timing error: {0}")]
    Timing(#[from] TimingError),
}

/// Kind of content a track plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Instrument,
    Audio,
}

/// A note inside a MIDI region
///
/// `start` is the offset from the region start; `length` the sounding duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiNote {
    /// MIDI note number (0-127, where 60 = C4)
    pub pitch: u8,

    /// MIDI velocity (0-127, where 127 = maximum)
    pub velocity: u8,

    pub start: Duration,
    pub length: Duration,
}

impl MidiNote {
    pub fn new(pitch: u8, velocity: u8, start: Duration, length: Duration) -> Self {
        assert!(pitch <= 127, "MIDI pitch must be 0-127");
        assert!(velocity <= 127, "MIDI velocity must be 0-127");

        Self {
            pitch,
            velocity,
            start,
            length,
        }
    }

    /// Get the note name (e.g., "C4", "A#5")
    pub fn note_name(&self) -> String {
        const NOTE_NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];

        let octave = (self.pitch / 12) as i32 - 1;
        let note_index = (self.pitch % 12) as usize;

        format!("{}{}", NOTE_NAMES[note_index], octave)
    }
}

/// Audio region payload: a window onto a decoded buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioClip {
    pub buffer: AudioBufferId,
    pub gain: f32,

    /// Seconds into the buffer where the region starts
    pub offset_seconds: f64,
}

impl AudioClip {
    pub fn new(buffer: AudioBufferId) -> Self {
        Self {
            buffer,
            gain: 1.0,
            offset_seconds: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegionContent {
    Midi(Vec<MidiNote>),
    Audio(AudioClip),
}

impl RegionContent {
    pub fn kind(&self) -> TrackKind {
        match self {
            RegionContent::Midi(_) => TrackKind::Instrument,
            RegionContent::Audio(_) => TrackKind::Audio,
        }
    }
}

/// A block of content placed on a track's timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub position: Location,
    pub length: Duration,
    pub content: RegionContent,
}

impl Region {
    pub fn midi(
        name: impl Into<String>,
        position: Location,
        length: Duration,
        notes: Vec<MidiNote>,
    ) -> Self {
        Self {
            id: RegionId::generate(),
            name: name.into(),
            position,
            length,
            content: RegionContent::Midi(notes),
        }
    }

    pub fn audio(
        name: impl Into<String>,
        position: Location,
        length: Duration,
        clip: AudioClip,
    ) -> Self {
        Self {
            id: RegionId::generate(),
            name: name.into(),
            position,
            length,
            content: RegionContent::Audio(clip),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.content.kind()
    }

    /// First location after the region
    pub fn end(&self, time_signature: &TimeSignature) -> Location {
        self.position.add(self.length, time_signature)
    }

    /// Notes of a MIDI region (empty for audio)
    pub fn notes(&self) -> &[MidiNote] {
        match &self.content {
            RegionContent::Midi(notes) => notes,
            RegionContent::Audio(_) => &[],
        }
    }

    pub fn add_note(&mut self, note: MidiNote) -> bool {
        match &mut self.content {
            RegionContent::Midi(notes) => {
                notes.push(note);
                true
            }
            RegionContent::Audio(_) => false,
        }
    }

    /// Split into two regions at `offset` from the region start
    ///
    /// The left half keeps this region's id. Notes go to the half their start falls
    /// in; the right half's note offsets are rebased onto its new start. An audio
    /// right half resumes the buffer where the left half stops playing it.
    pub fn split_at(
        &self,
        offset: Duration,
        converter: &LocationToTime,
    ) -> Result<(Region, Region), RegionError> {
        let time_signature = &converter.time_signature_at_location(&self.position);
        if !offset.is_positive(time_signature)
            || offset.compare(&self.length, time_signature) != Ordering::Less
        {
            return Err(RegionError::DegenerateSplit {
                region: self.id,
                offset,
                length: self.length,
            });
        }

        let right_length = self.length.add(offset.neg(), time_signature);
        let (left_content, right_content) = match &self.content {
            RegionContent::Midi(notes) => {
                let (left, right): (Vec<MidiNote>, Vec<MidiNote>) = notes
                    .iter()
                    .partition(|note| note.start.compare(&offset, time_signature) == Ordering::Less);
                let right = right
                    .into_iter()
                    .map(|note| MidiNote {
                        start: note.start.add(offset.neg(), time_signature),
                        ..note
                    })
                    .collect();
                (RegionContent::Midi(left), RegionContent::Midi(right))
            }
            RegionContent::Audio(clip) => {
                let played = converter.convert_duration_at_location(&offset, &self.position)?;
                let right = AudioClip {
                    offset_seconds: clip.offset_seconds + played,
                    ..*clip
                };
                (RegionContent::Audio(*clip), RegionContent::Audio(right))
            }
        };

        let left = Region {
            id: self.id,
            name: self.name.clone(),
            position: self.position,
            length: offset.normalize(time_signature),
            content: left_content,
        };
        let right = Region {
            id: RegionId::generate(),
            name: self.name.clone(),
            position: self.position.add(offset, time_signature),
            length: right_length,
            content: right_content,
        };

        Ok((left, right))
    }
}
