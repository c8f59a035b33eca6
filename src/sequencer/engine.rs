// Engine - Transport control and the lookahead scheduling loop
//
// Every tick schedules the slice of the timeline between what was scheduled last and
// the position the audio clock reaches one lookahead from now. Slices never overlap
// and never leave gaps, including across a loop seam.

use std::sync::Arc;

use thiserror::Error;

use crate::audio::assets::AssetLoader;
use crate::audio::backend::SharedBackend;
use crate::config::{ConfigError, EngineConfig};
use crate::messaging::events::{PlaybackEvent, RegionEvent, TrackEvent, TransportEvent};
use crate::messaging::listeners::{ListenerId, ListenerRegistry};
use crate::sequencer::metronome::Metronome;
use crate::sequencer::region::{Region, RegionError, RegionId, TrackId, TrackKind};
use crate::sequencer::scheduling::{
    AudioGraphLifecycle, PlaybackScheduling, SchedulingError, SchedulingWindow,
};
use crate::sequencer::tempo_map::{LocationToTime, TimelineChange};
use crate::sequencer::timeline::{Duration, Location, TimingError};
use crate::sequencer::track::Track;
use crate::sequencer::transport::{PlaybackCursor, SharedTransportState, TransportState};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown track: {0:?}")]
    UnknownTrack(TrackId),

    #[error("Unknown region {region:?} on track {track:?}")]
    UnknownRegion { track: TrackId, region: RegionId },

    #[error("Track {track:?} plays {expected:?} regions, got {found:?}")]
    RegionKindMismatch {
        track: TrackId,
        expected: TrackKind,
        found: TrackKind,
    },

    #[error("Loop start {start} must come before loop end {end}")]
    InvalidLoop { start: Location, end: Location },

    #[error("Timing error: {0}")]
    Timing(#[from] TimingError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Where a window had to stop short
enum Boundary {
    LoopEnd,
    PlaybackEnd(Location),
}

pub struct Engine {
    config: EngineConfig,
    backend: SharedBackend,
    converter: LocationToTime,
    tracks: Vec<Box<dyn Track>>,
    metronome: Metronome,

    state: TransportState,
    /// Position while not playing
    position: Location,
    cursor: Option<PlaybackCursor>,
    loop_start: Location,
    loop_end: Location,
    looping: bool,
    playback_end: Option<Location>,
    shared: Arc<SharedTransportState>,

    transport_listeners: ListenerRegistry<TransportEvent>,
    playback_listeners: ListenerRegistry<PlaybackEvent>,
    track_listeners: ListenerRegistry<TrackEvent>,
    region_listeners: ListenerRegistry<RegionEvent>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        backend: SharedBackend,
        converter: LocationToTime,
    ) -> Result<Self, EngineError> {
        Self::build(config, backend, converter, None)
    }

    /// Engine whose metronome loads its click sounds through `loader`
    pub fn with_asset_loader(
        config: EngineConfig,
        backend: SharedBackend,
        converter: LocationToTime,
        loader: Box<dyn AssetLoader>,
    ) -> Result<Self, EngineError> {
        Self::build(config, backend, converter, Some(loader))
    }

    fn build(
        config: EngineConfig,
        backend: SharedBackend,
        converter: LocationToTime,
        loader: Option<Box<dyn AssetLoader>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let mut metronome = Metronome::new(&config.metronome, loader);
        metronome.initialize(&backend)?;

        let loop_end = Location::bar_start(5);
        Ok(Self {
            config,
            backend,
            converter,
            tracks: Vec::new(),
            metronome,
            state: TransportState::Stopped,
            position: Location::ORIGIN,
            cursor: None,
            loop_start: Location::ORIGIN,
            loop_end,
            looping: false,
            playback_end: None,
            shared: SharedTransportState::new(),
            transport_listeners: ListenerRegistry::new(),
            playback_listeners: ListenerRegistry::new(),
            track_listeners: ListenerRegistry::new(),
            region_listeners: ListenerRegistry::new(),
        })
    }

    // ---- Getters ----

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn converter(&self) -> &LocationToTime {
        &self.converter
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Lock-free view of the transport for other threads
    pub fn shared_state(&self) -> Arc<SharedTransportState> {
        Arc::clone(&self.shared)
    }

    pub fn loop_region(&self) -> (Location, Location) {
        (self.loop_start, self.loop_end)
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn playback_end(&self) -> Option<Location> {
        self.playback_end
    }

    /// Loop iteration the scheduler has reached (may be ahead of what is audible)
    pub fn loop_iteration(&self) -> u32 {
        self.cursor
            .as_ref()
            .map(|cursor| cursor.loop_iteration())
            .unwrap_or(0)
    }

    /// Audio-clock time of the timeline origin for the iteration being scheduled
    pub fn time_offset(&self) -> Option<f64> {
        self.cursor.as_ref().map(|cursor| cursor.time_offset())
    }

    pub fn last_scheduled_end(&self) -> Option<Location> {
        self.cursor.as_ref().map(|cursor| cursor.last_scheduled_end())
    }

    /// Position being heard now (or the parked position when stopped)
    pub fn current_location(&self) -> Location {
        match &self.cursor {
            Some(cursor) => cursor
                .location_at(self.backend.now(), &self.converter)
                .unwrap_or(self.position),
            None => self.position,
        }
    }

    /// Timeline seconds of the current location
    pub fn current_seconds(&self) -> f64 {
        match &self.cursor {
            Some(cursor) => cursor.seconds_at(self.backend.now()),
            None => self.converter.convert_location(&self.position).unwrap_or(0.0),
        }
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    pub fn metronome_mut(&mut self) -> &mut Metronome {
        &mut self.metronome
    }

    pub fn tracks(&self) -> &[Box<dyn Track>] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&dyn Track> {
        self.tracks
            .iter()
            .find(|track| track.id() == id)
            .map(|track| track.as_ref())
    }

    // ---- Transport ----

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state.is_playing() {
            return Ok(());
        }
        self.begin_playback(TransportState::Playing)?;
        self.playback_listeners
            .emit(&PlaybackEvent::Started(self.position));
        self.tick()
    }

    /// Start playing with input capture, or switch a running transport to recording
    pub fn record(&mut self) -> Result<(), EngineError> {
        match self.state {
            TransportState::Recording => Ok(()),
            TransportState::Playing => {
                self.set_state(TransportState::Recording);
                let location = self.current_location();
                self.playback_listeners
                    .emit(&PlaybackEvent::RecordingStarted(location));
                Ok(())
            }
            TransportState::Stopped => {
                self.begin_playback(TransportState::Recording)?;
                self.playback_listeners
                    .emit(&PlaybackEvent::RecordingStarted(self.position));
                self.tick()
            }
        }
    }

    /// Silence everything and park at the current position
    pub fn stop(&mut self) {
        if let Some(location) = self.halt() {
            tracing::info!(%location, "transport stopped");
            self.playback_listeners
                .emit(&PlaybackEvent::Stopped(Some(location)));
        }
    }

    /// Like `stop`, reported as a pause
    pub fn pause(&mut self) {
        if let Some(location) = self.halt() {
            tracing::info!(%location, "transport paused");
            self.playback_listeners.emit(&PlaybackEvent::Paused(location));
        }
    }

    /// Move the play position; playback continues from there if running
    pub fn seek(&mut self, location: Location) -> Result<(), EngineError> {
        let location = self.validate_location(location)?;
        self.position = location;

        if self.state.is_playing() {
            self.silence();
            self.cursor = Some(PlaybackCursor::start_at(
                location,
                self.backend.now(),
                &self.converter,
            )?);
        }

        self.transport_listeners
            .emit(&TransportEvent::PositionChanged(location));

        if self.state.is_playing() {
            self.tick()?;
        }
        Ok(())
    }

    pub fn set_loop_start(&mut self, start: Location) -> Result<(), EngineError> {
        self.set_loop_region(start, self.loop_end)
    }

    pub fn set_loop_end(&mut self, end: Location) -> Result<(), EngineError> {
        self.set_loop_region(self.loop_start, end)
    }

    /// Takes effect for seams not yet scheduled
    pub fn set_loop_region(&mut self, start: Location, end: Location) -> Result<(), EngineError> {
        let start = self.validate_location(start)?;
        let end = self.validate_location(end)?;
        if start >= end {
            return Err(EngineError::InvalidLoop { start, end });
        }

        self.loop_start = start;
        self.loop_end = end;
        self.transport_listeners
            .emit(&TransportEvent::LoopLocatorsChanged { start, end });
        Ok(())
    }

    pub fn set_looping(&mut self, looping: bool) {
        if self.looping != looping {
            self.looping = looping;
            self.transport_listeners
                .emit(&TransportEvent::LoopingChanged(looping));
        }
    }

    pub fn set_playback_end(&mut self, end: Location) -> Result<(), EngineError> {
        let end = self.validate_location(end)?;
        self.playback_end = Some(end);
        self.transport_listeners
            .emit(&TransportEvent::EndLocatorChanged(end));
        Ok(())
    }

    /// Replace the tempo and meter map without a gap in running playback
    pub fn set_converter(&mut self, converter: LocationToTime) -> Result<(), EngineError> {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.reanchor(&self.converter, &converter)?;
        }
        self.converter = converter;
        tracing::info!(changes = self.converter.changes().len(), "timeline changed");
        self.transport_listeners.emit(&TransportEvent::TimelineChanged);
        Ok(())
    }

    /// Add or replace one tempo or meter change
    pub fn set_timeline_change(
        &mut self,
        location: Location,
        change: TimelineChange,
    ) -> Result<(), EngineError> {
        let converter = self.converter.with_change(location, change)?;
        self.set_converter(converter)
    }

    fn begin_playback(&mut self, state: TransportState) -> Result<(), EngineError> {
        let now = self.backend.now();
        self.cursor = Some(PlaybackCursor::start_at(self.position, now, &self.converter)?);
        for track in self.tracks.iter_mut() {
            track.begin_run();
        }
        self.metronome.begin_run();
        self.set_state(state);
        tracing::info!(location = %self.position, now, ?state, "transport started");
        Ok(())
    }

    /// Park at the audible position; None when nothing was playing
    fn halt(&mut self) -> Option<Location> {
        self.silence();
        if !self.state.is_playing() {
            return None;
        }
        self.position = self.current_location();
        self.cursor = None;
        self.set_state(TransportState::Stopped);
        Some(self.position)
    }

    fn silence(&mut self) {
        for track in self.tracks.iter_mut() {
            track.stop();
        }
        self.metronome.stop();
    }

    fn set_state(&mut self, state: TransportState) {
        self.state = state;
        self.shared.set_state(state);
    }

    fn validate_location(&self, location: Location) -> Result<Location, EngineError> {
        self.converter.convert_location(&location)?;
        let signature = self.converter.time_signature_at_location(&location);
        Ok(location.normalize(&signature))
    }

    // ---- Scheduling loop ----

    /// One pass of the scheduling loop; call once per timer period
    pub fn tick(&mut self) -> Result<(), EngineError> {
        let now = self.backend.now();
        if let Some(mut cursor) = self.cursor.take() {
            let outcome = self.schedule_ahead(&mut cursor, now);
            match outcome {
                Ok(Some(end)) => self.finish_at_end(end),
                Ok(None) => self.cursor = Some(cursor),
                Err(error) => {
                    self.cursor = Some(cursor);
                    return Err(error);
                }
            }
        }

        self.housekeeping(now);
        self.publish_position(now);
        Ok(())
    }

    /// Schedule up to one lookahead past `now`; returns the end location if playback ran out
    fn schedule_ahead(
        &mut self,
        cursor: &mut PlaybackCursor,
        now: f64,
    ) -> Result<Option<Location>, EngineError> {
        cursor.prune(now);
        let horizon = now + self.config.lookahead_seconds;
        let mut failed: Vec<TrackId> = Vec::new();
        let mut wraps = 0;

        loop {
            let start = cursor.last_scheduled_end();
            if self.playback_end.is_some_and(|end| start >= end) {
                return Ok(Some(start));
            }

            let end_seconds = horizon - cursor.time_offset();
            if end_seconds <= self.converter.convert_location(&start)? {
                return Ok(None);
            }
            let end = self.converter.convert_time(end_seconds)?;
            if end <= start {
                return Ok(None);
            }

            let Some(boundary) = self.boundary_within(start, end) else {
                let window = self.window(cursor, start, end, None);
                self.schedule_window(&window, &mut failed);
                cursor.advance_to(end);
                return Ok(None);
            };

            let boundary_location = match boundary {
                Boundary::LoopEnd => self.loop_end,
                Boundary::PlaybackEnd(location) => location,
            };
            let seam = cursor.time_offset() + self.converter.convert_location(&boundary_location)?;
            let window = self.window(cursor, start, boundary_location, Some(seam));
            self.schedule_window(&window, &mut failed);
            cursor.advance_to(boundary_location);

            if let Boundary::PlaybackEnd(location) = boundary {
                return Ok(Some(location));
            }

            let iteration = cursor.loop_iteration();
            cursor.wrap(self.loop_start, self.loop_end, &self.converter)?;
            self.adjust_all(cursor.time_offset(), seam, iteration);
            tracing::debug!(iteration = cursor.loop_iteration(), seam, "loop wrap");

            wraps += 1;
            if wraps >= self.config.max_loop_wraps_per_tick {
                tracing::warn!(wraps, "loop wrap limit reached, continuing next tick");
                return Ok(None);
            }
        }
    }

    /// First loop or playback-end boundary in (start, end]
    fn boundary_within(&self, start: Location, end: Location) -> Option<Boundary> {
        let crosses = |boundary: Location| start < boundary && end >= boundary;

        let loop_end = (self.looping && crosses(self.loop_end)).then_some(self.loop_end);
        let playback_end = self.playback_end.filter(|&boundary| crosses(boundary));

        match (loop_end, playback_end) {
            (Some(loop_end), Some(playback_end)) if playback_end < loop_end => {
                Some(Boundary::PlaybackEnd(playback_end))
            }
            (Some(_), _) => Some(Boundary::LoopEnd),
            (None, Some(playback_end)) => Some(Boundary::PlaybackEnd(playback_end)),
            (None, None) => None,
        }
    }

    fn window(
        &self,
        cursor: &mut PlaybackCursor,
        start: Location,
        end: Location,
        discontinuation_time: Option<f64>,
    ) -> SchedulingWindow {
        let continuation_time = if cursor.take_continuation() {
            cursor.scheduled_until(&self.converter).ok()
        } else {
            None
        };

        SchedulingWindow {
            time_offset: cursor.time_offset(),
            start,
            end,
            loop_iteration: cursor.loop_iteration(),
            continuation_time,
            discontinuation_time,
        }
    }

    /// Hand the window to every track and the metronome, isolating failures
    fn schedule_window(&mut self, window: &SchedulingWindow, failed: &mut Vec<TrackId>) {
        tracing::debug!(
            start = %window.start,
            end = %window.end,
            iteration = window.loop_iteration,
            time_offset = window.time_offset,
            "scheduling window"
        );

        for track in self.tracks.iter_mut() {
            let id = track.id();
            if failed.contains(&id) {
                continue;
            }

            let result = track
                .schedule_audio_events(window, &self.converter)
                .and_then(|_| track.schedule_midi_events(window, &self.converter));
            if let Err(error) = result {
                tracing::warn!(
                    track = id.as_u64(),
                    name = track.name(),
                    %error,
                    "track failed to schedule, skipped for this tick"
                );
                failed.push(id);
            }
        }

        let result = self
            .metronome
            .schedule_audio_events(window, &self.converter)
            .and_then(|_| self.metronome.schedule_midi_events(window, &self.converter));
        if let Err(error) = result {
            tracing::warn!(%error, "metronome failed to schedule");
        }
    }

    /// Clip what the finished iteration left sounding past the seam. A seam is applied
    /// once, at the wrap, so there is never an earlier boundary to move.
    fn adjust_all(&mut self, time_offset: f64, seam: f64, iteration: u32) {
        for track in self.tracks.iter_mut() {
            if let Err(error) = track.adjust_discontinuation_time(
                time_offset,
                None,
                Some(seam),
                &self.converter,
                iteration,
            ) {
                tracing::warn!(track = track.id().as_u64(), %error, "failed to adjust discontinuation");
            }
        }
        if let Err(error) = self.metronome.adjust_discontinuation_time(
            time_offset,
            None,
            Some(seam),
            &self.converter,
            iteration,
        ) {
            tracing::warn!(%error, "metronome failed to adjust discontinuation");
        }
    }

    /// Reached the playback end: let scheduled sound ring out and park there
    fn finish_at_end(&mut self, end: Location) {
        self.position = end;
        self.cursor = None;
        self.set_state(TransportState::Stopped);
        tracing::info!(location = %end, "playback reached the end locator");
        self.playback_listeners
            .emit(&PlaybackEvent::Stopped(Some(end)));
    }

    fn housekeeping(&mut self, now: f64) {
        for track in self.tracks.iter_mut() {
            track.housekeeping(now);
        }
        self.metronome.housekeeping(now);
    }

    fn publish_position(&mut self, now: f64) {
        let Some(cursor) = &self.cursor else {
            return;
        };
        let seconds = cursor.seconds_at(now);
        let iteration = cursor.audible_iteration(now);
        let location = cursor
            .location_at(now, &self.converter)
            .unwrap_or(self.position);

        self.shared.set_position_seconds(seconds);
        self.shared.set_loop_iteration(iteration);
        self.transport_listeners
            .emit(&TransportEvent::Position { location, seconds });
    }

    // ---- Arrangement ----

    pub fn add_track(&mut self, mut track: Box<dyn Track>) -> Result<TrackId, EngineError> {
        track.initialize(&self.backend)?;
        let id = track.id();
        tracing::info!(track = id.as_u64(), name = track.name(), "track added");
        self.tracks.push(track);
        self.track_listeners.emit(&TrackEvent::Added(id));
        Ok(id)
    }

    pub fn remove_track(&mut self, id: TrackId) -> Result<Box<dyn Track>, EngineError> {
        let index = self
            .tracks
            .iter()
            .position(|track| track.id() == id)
            .ok_or(EngineError::UnknownTrack(id))?;

        let mut track = self.tracks.remove(index);
        if let Err(error) = track.deinitialize() {
            tracing::warn!(track = id.as_u64(), %error, "failed to deinitialize removed track");
        }
        self.track_listeners.emit(&TrackEvent::Removed(id));
        Ok(track)
    }

    pub fn set_track_muted(&mut self, id: TrackId, muted: bool) -> Result<(), EngineError> {
        self.track_mut(id)?.set_muted(muted);
        Ok(())
    }

    pub fn add_region(&mut self, track_id: TrackId, region: Region) -> Result<RegionId, EngineError> {
        self.validate_location(region.position)?;
        let signature = self.converter.time_signature_at_location(&region.position);
        if !region.length.is_positive(&signature) {
            return Err(RegionError::EmptyLength(region.length).into());
        }

        let track = self.track_mut(track_id)?;
        if region.kind() != track.kind() {
            return Err(EngineError::RegionKindMismatch {
                track: track_id,
                expected: track.kind(),
                found: region.kind(),
            });
        }

        let region_id = region.id;
        track.insert_region(region);
        self.region_listeners.emit(&RegionEvent::Added {
            track: track_id,
            region: region_id,
        });
        Ok(region_id)
    }

    pub fn move_region(
        &mut self,
        track_id: TrackId,
        region_id: RegionId,
        position: Location,
    ) -> Result<(), EngineError> {
        let position = self.validate_location(position)?;
        let track = self.track_mut(track_id)?;
        let mut region = track.take_region(region_id).ok_or(EngineError::UnknownRegion {
            track: track_id,
            region: region_id,
        })?;
        region.position = position;
        track.insert_region(region);

        self.region_listeners.emit(&RegionEvent::Moved {
            track: track_id,
            region: region_id,
        });
        Ok(())
    }

    pub fn resize_region(
        &mut self,
        track_id: TrackId,
        region_id: RegionId,
        length: Duration,
    ) -> Result<(), EngineError> {
        let converter = &self.converter;
        let track = self
            .tracks
            .iter_mut()
            .find(|track| track.id() == track_id)
            .ok_or(EngineError::UnknownTrack(track_id))?;
        let region = track
            .regions_mut()
            .iter_mut()
            .find(|region| region.id == region_id)
            .ok_or(EngineError::UnknownRegion {
                track: track_id,
                region: region_id,
            })?;

        let signature = converter.time_signature_at_location(&region.position);
        if !length.is_positive(&signature) {
            return Err(RegionError::EmptyLength(length).into());
        }
        region.length = length.normalize(&signature);

        self.region_listeners.emit(&RegionEvent::Resized {
            track: track_id,
            region: region_id,
        });
        Ok(())
    }

    /// Split a region `offset` after its start; returns the id of the new right half
    pub fn split_region(
        &mut self,
        track_id: TrackId,
        region_id: RegionId,
        offset: Duration,
    ) -> Result<RegionId, EngineError> {
        let converter = &self.converter;
        let track = self
            .tracks
            .iter_mut()
            .find(|track| track.id() == track_id)
            .ok_or(EngineError::UnknownTrack(track_id))?;
        let region = track.region(region_id).ok_or(EngineError::UnknownRegion {
            track: track_id,
            region: region_id,
        })?;

        let (left, right) = region.split_at(offset, converter)?;
        let right_id = right.id;

        track.take_region(region_id);
        track.insert_region(left);
        track.insert_region(right);

        self.region_listeners.emit(&RegionEvent::Resized {
            track: track_id,
            region: region_id,
        });
        self.region_listeners.emit(&RegionEvent::Added {
            track: track_id,
            region: right_id,
        });
        Ok(right_id)
    }

    pub fn delete_region(
        &mut self,
        track_id: TrackId,
        region_id: RegionId,
    ) -> Result<Region, EngineError> {
        let region = self
            .track_mut(track_id)?
            .take_region(region_id)
            .ok_or(EngineError::UnknownRegion {
                track: track_id,
                region: region_id,
            })?;

        self.region_listeners.emit(&RegionEvent::Removed {
            track: track_id,
            region: region_id,
        });
        Ok(region)
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Box<dyn Track>, EngineError> {
        self.tracks
            .iter_mut()
            .find(|track| track.id() == id)
            .ok_or(EngineError::UnknownTrack(id))
    }

    // ---- Listeners ----

    pub fn on_transport<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&TransportEvent) + Send + 'static,
    {
        self.transport_listeners.register(listener)
    }

    pub fn remove_transport_listener(&mut self, id: ListenerId) -> bool {
        self.transport_listeners.unregister(id)
    }

    pub fn on_playback<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&PlaybackEvent) + Send + 'static,
    {
        self.playback_listeners.register(listener)
    }

    pub fn remove_playback_listener(&mut self, id: ListenerId) -> bool {
        self.playback_listeners.unregister(id)
    }

    pub fn on_track<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&TrackEvent) + Send + 'static,
    {
        self.track_listeners.register(listener)
    }

    pub fn remove_track_listener(&mut self, id: ListenerId) -> bool {
        self.track_listeners.unregister(id)
    }

    pub fn on_region<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&RegionEvent) + Send + 'static,
    {
        self.region_listeners.register(listener)
    }

    pub fn remove_region_listener(&mut self, id: ListenerId) -> bool {
        self.region_listeners.unregister(id)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("position", &self.position)
            .field("tracks", &self.tracks.len())
            .field("looping", &self.looping)
            .field("loop", &(self.loop_start, self.loop_end))
            .field("playback_end", &self.playback_end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{AudioBufferId, OfflineBackend, VoiceCommand};
    use crate::sequencer::region::{AudioClip, MidiNote};
    use crate::sequencer::timeline::Tempo;
    use crate::sequencer::track::{AudioTrack, InstrumentTrack, LoggingInstrument};
    use std::sync::Mutex;

    fn engine() -> (Engine, Arc<OfflineBackend>) {
        let backend = OfflineBackend::new();
        let mut config = EngineConfig::default();
        config.metronome.enabled = false;
        let engine = Engine::new(config, backend.clone(), LocationToTime::default()).unwrap();
        (engine, backend)
    }

    fn buffer_starts(commands: &[VoiceCommand]) -> Vec<f64> {
        commands
            .iter()
            .filter_map(|command| match command {
                VoiceCommand::PlayBuffer { request, .. } => Some(request.when),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            lookahead_seconds: 0.001,
            ..EngineConfig::default()
        };
        let result = Engine::new(config, OfflineBackend::new(), LocationToTime::default());
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_start_stop_events() {
        let (mut engine, backend) = engine();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.on_playback(move |event| sink.lock().unwrap().push(*event));

        engine.start().unwrap();
        assert!(engine.state().is_playing());
        backend.set_time(0.5);
        engine.stop();
        engine.stop();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                PlaybackEvent::Started(Location::ORIGIN),
                PlaybackEvent::Stopped(Some(Location::new(1, 2, 1))),
            ]
        );
        assert_eq!(engine.current_location(), Location::new(1, 2, 1));
    }

    #[test]
    fn test_pause_then_resume_continues_from_position() {
        let (mut engine, backend) = engine();
        engine.start().unwrap();
        backend.set_time(1.0);
        engine.pause();
        assert_eq!(engine.current_location(), Location::new(1, 3, 1));

        backend.set_time(5.0);
        engine.start().unwrap();
        assert_eq!(engine.time_offset(), Some(4.0));
    }

    #[test]
    fn test_record_from_stopped_and_from_playing() {
        let (mut engine, _backend) = engine();
        engine.record().unwrap();
        assert_eq!(engine.state(), TransportState::Recording);
        assert_eq!(engine.shared_state().state(), TransportState::Recording);

        engine.stop();
        engine.start().unwrap();
        engine.record().unwrap();
        assert!(engine.state().is_recording());
    }

    #[test]
    fn test_windows_follow_the_clock() {
        let (mut engine, backend) = engine();
        engine.start().unwrap();
        // 0.1s lookahead at 120 BPM is 96 ticks
        assert_eq!(engine.last_scheduled_end(), Some(Location::new(1, 1, 97)));

        backend.set_time(0.025);
        engine.tick().unwrap();
        assert_eq!(engine.last_scheduled_end(), Some(Location::new(1, 1, 121)));

        // Ticking again without the clock moving schedules nothing new
        engine.tick().unwrap();
        assert_eq!(engine.last_scheduled_end(), Some(Location::new(1, 1, 121)));
    }

    #[test]
    fn test_loop_wrap_advances_offset() {
        let (mut engine, backend) = engine();
        engine.set_loop_region(Location::ORIGIN, Location::bar_start(2)).unwrap();
        engine.set_looping(true);
        engine.start().unwrap();

        backend.set_time(1.95);
        engine.tick().unwrap();

        assert_eq!(engine.loop_iteration(), 1);
        assert_eq!(engine.time_offset(), Some(2.0));
        assert_eq!(engine.last_scheduled_end(), Some(Location::new(1, 1, 49)));
        // Still hearing the first pass
        assert_eq!(engine.shared_state().loop_iteration(), 0);
        assert_eq!(engine.current_location(), Location::new(1, 4, 433));
    }

    #[test]
    fn test_many_wraps_in_one_tick_are_bounded() {
        let backend = OfflineBackend::new();
        let config = EngineConfig {
            lookahead_seconds: 2.0,
            max_loop_wraps_per_tick: 3,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config, backend.clone(), LocationToTime::default()).unwrap();
        // One-beat loop is 0.5s, the lookahead covers four of them
        engine
            .set_loop_region(Location::ORIGIN, Location::new(1, 2, 1))
            .unwrap();
        engine.set_looping(true);
        engine.start().unwrap();

        assert_eq!(engine.loop_iteration(), 3);
        assert_eq!(engine.time_offset(), Some(1.5));

        engine.tick().unwrap();
        assert_eq!(engine.loop_iteration(), 4);
    }

    #[test]
    fn test_reaching_playback_end_stops() {
        let (mut engine, backend) = engine();
        engine.set_playback_end(Location::new(1, 2, 1)).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.on_playback(move |event| sink.lock().unwrap().push(*event));

        engine.start().unwrap();
        backend.set_time(0.45);
        engine.tick().unwrap();

        assert!(engine.state().is_stopped());
        assert_eq!(engine.current_location(), Location::new(1, 2, 1));
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&PlaybackEvent::Stopped(Some(Location::new(1, 2, 1))))
        );
    }

    #[test]
    fn test_seek_restarts_audio_mid_region() {
        let (mut engine, backend) = engine();
        let track = engine.add_track(Box::new(AudioTrack::new("Drums"))).unwrap();
        engine
            .add_region(
                track,
                Region::audio(
                    "Loop",
                    Location::ORIGIN,
                    Duration::new(4, 0, 0),
                    AudioClip::new(AudioBufferId(1)),
                ),
            )
            .unwrap();

        engine.start().unwrap();
        backend.set_time(1.0);
        engine.seek(Location::bar_start(2)).unwrap();

        let commands = backend.take_commands();
        assert_eq!(buffer_starts(&commands), vec![0.0, 1.0]);
        assert!(commands.iter().any(|command| matches!(command, VoiceCommand::Stop { .. })));
        match commands.last() {
            Some(VoiceCommand::PlayBuffer { request, .. }) => assert_eq!(request.offset, 2.0),
            other => panic!("Expected a resumed buffer, got {:?}", other),
        }
    }

    #[test]
    fn test_region_kind_must_match_track() {
        let (mut engine, _backend) = engine();
        let track = engine
            .add_track(Box::new(InstrumentTrack::new(
                "Keys",
                Box::new(LoggingInstrument::default()),
            )))
            .unwrap();

        let audio = Region::audio(
            "Oops",
            Location::ORIGIN,
            Duration::new(1, 0, 0),
            AudioClip::new(AudioBufferId(1)),
        );
        assert!(matches!(
            engine.add_region(track, audio),
            Err(EngineError::RegionKindMismatch { .. })
        ));

        let empty = Region::midi("Empty", Location::ORIGIN, Duration::ZERO, vec![]);
        assert!(matches!(
            engine.add_region(track, empty),
            Err(EngineError::Region(RegionError::EmptyLength(_)))
        ));
    }

    #[test]
    fn test_arrangement_edits_emit_events() {
        let (mut engine, _backend) = engine();
        let region_events = Arc::new(Mutex::new(Vec::new()));
        let track_events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&region_events);
        engine.on_region(move |event| sink.lock().unwrap().push(*event));
        let sink = Arc::clone(&track_events);
        engine.on_track(move |event| sink.lock().unwrap().push(*event));

        let track = engine
            .add_track(Box::new(InstrumentTrack::new(
                "Keys",
                Box::new(LoggingInstrument::default()),
            )))
            .unwrap();
        let notes = vec![MidiNote::new(60, 100, Duration::ZERO, Duration::new(0, 1, 0))];
        let region = engine
            .add_region(
                track,
                Region::midi("Riff", Location::ORIGIN, Duration::new(2, 0, 0), notes),
            )
            .unwrap();

        engine.move_region(track, region, Location::bar_start(3)).unwrap();
        engine.resize_region(track, region, Duration::new(4, 0, 0)).unwrap();
        let right = engine.split_region(track, region, Duration::new(1, 0, 0)).unwrap();
        engine.delete_region(track, right).unwrap();

        let positions: Vec<Location> = engine
            .track(track)
            .unwrap()
            .regions()
            .iter()
            .map(|region| region.position)
            .collect();
        assert_eq!(positions, vec![Location::bar_start(3)]);

        assert!(matches!(
            engine.delete_region(track, right),
            Err(EngineError::UnknownRegion { .. })
        ));
        engine.remove_track(track).unwrap();
        assert!(matches!(
            engine.remove_track(track),
            Err(EngineError::UnknownTrack(_))
        ));

        assert_eq!(region_events.lock().unwrap().len(), 6);
        assert_eq!(
            *track_events.lock().unwrap(),
            vec![TrackEvent::Added(track), TrackEvent::Removed(track)]
        );
    }

    #[test]
    fn test_loop_locators_validated() {
        let (mut engine, _backend) = engine();
        assert!(matches!(
            engine.set_loop_region(Location::bar_start(3), Location::bar_start(3)),
            Err(EngineError::InvalidLoop { .. })
        ));
        assert!(engine.set_loop_end(Location::new(0, 1, 1)).is_err());

        engine.set_loop_end(Location::new(2, 5, 1)).unwrap();
        assert_eq!(engine.loop_region().1, Location::bar_start(3));
    }

    #[test]
    fn test_tempo_change_midstream_has_no_gap() {
        let (mut engine, backend) = engine();
        engine.start().unwrap();
        backend.set_time(0.4);
        engine.tick().unwrap();
        let before = engine.last_scheduled_end().unwrap();
        let seam = engine.time_offset().unwrap() + engine.converter().convert_location(&before).unwrap();

        engine
            .set_timeline_change(
                Location::bar_start(2),
                TimelineChange::Tempo(Tempo::new(60.0).unwrap()),
            )
            .unwrap();
        engine
            .set_converter(LocationToTime::constant(
                Tempo::new(90.0).unwrap(),
                Default::default(),
            ))
            .unwrap();

        let after = engine.time_offset().unwrap() + engine.converter().convert_location(&before).unwrap();
        assert!((seam - after).abs() < 1e-9);
        assert_eq!(engine.last_scheduled_end(), Some(before));
    }
}
