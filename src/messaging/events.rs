// Engine events - What UI layers observe about transport, playback and arrangement

use crate::sequencer::region::{RegionId, TrackId};
use crate::sequencer::timeline::Location;

/// Transport position and locator changes
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Emitted once per scheduling tick while playing
    Position { location: Location, seconds: f64 },
    /// The play position jumped (seek)
    PositionChanged(Location),
    LoopLocatorsChanged { start: Location, end: Location },
    EndLocatorChanged(Location),
    LoopingChanged(bool),
    /// Tempo or meter map replaced
    TimelineChanged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Started(Location),
    /// Where the transport parked, when known
    Stopped(Option<Location>),
    Paused(Location),
    RecordingStarted(Location),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    Added(TrackId),
    Removed(TrackId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionEvent {
    Added { track: TrackId, region: RegionId },
    Moved { track: TrackId, region: RegionId },
    Resized { track: TrackId, region: RegionId },
    Removed { track: TrackId, region: RegionId },
}
