// Messaging - Engine events, listener registries and lock-free channels

pub mod channels;
pub mod events;
pub mod listeners;

pub use events::{PlaybackEvent, RegionEvent, TrackEvent, TransportEvent};
pub use listeners::{ListenerId, ListenerRegistry};
