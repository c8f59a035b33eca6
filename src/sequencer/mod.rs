// Sequencer module
// Musical time, tempo map, tracks and the lookahead scheduling engine

pub mod engine;
pub mod metronome;
pub mod region;
pub mod scheduler_thread;
pub mod scheduling;
pub mod tempo_map;
pub mod timeline;
pub mod track;
pub mod transport;

pub use engine::{Engine, EngineError};
pub use metronome::{ClickSound, ClickSoundResolver, ClickType, Metronome};
pub use region::{AudioClip, MidiNote, Region, RegionContent, RegionError, RegionId, TrackId, TrackKind};
pub use scheduler_thread::SchedulerThread;
pub use scheduling::{
    AudioGraphLifecycle, GraphBinding, LifecycleState, PlaybackScheduling, SchedulingError,
    SchedulingWindow,
};
pub use tempo_map::{LocationToTime, TimelineChange};
pub use timeline::{Duration, Location, Tempo, TimeSignature, TimingError};
pub use track::{AudioTrack, Instrument, InstrumentTrack, LoggingInstrument, NoteHandle, Track};
pub use transport::{PlaybackCursor, SharedTransportState, TransportState};
