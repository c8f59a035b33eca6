// tempo_sched - Musical-time playback scheduling engine
// Library exports for the demo binary, tests and benchmarks

pub mod audio;
pub mod config;
pub mod messaging;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use audio::assets::{AssetCompletion, AssetError, AssetLoader, InMemoryLoader};
pub use audio::backend::{
    AudioBackend, AudioBufferId, LoggingBackend, OfflineBackend, SharedBackend, VoiceHandle,
};
pub use config::{ClickSoundCandidate, ConfigError, EngineConfig, MetronomeConfig};
pub use messaging::{ListenerId, PlaybackEvent, RegionEvent, TrackEvent, TransportEvent};
pub use sequencer::{
    AudioClip, AudioTrack, Duration, Engine, EngineError, Instrument, InstrumentTrack, Location,
    LocationToTime, Metronome, MidiNote, PlaybackScheduling, Region, SchedulerThread, Tempo,
    TimeSignature, TimelineChange, Track, TransportState,
};
