// Transport - Playback state and the scheduling cursor
// Tracks how far ahead the engine has scheduled and where the listener is now

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::tempo_map::LocationToTime;
use super::timeline::{Location, TimingError};
use crate::audio::parameters::AtomicF64;

/// Transport state (play/stop/record)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Recording,
}

impl TransportState {
    /// Check if transport is in a playing state (Playing or Recording)
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing | TransportState::Recording)
    }

    /// Check if transport is recording
    pub fn is_recording(&self) -> bool {
        matches!(self, TransportState::Recording)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, TransportState::Stopped)
    }
}

/// Shared transport state
/// Readable from other threads without taking the engine lock
#[derive(Debug)]
pub struct SharedTransportState {
    playing: AtomicBool,
    recording: AtomicBool,
    position_seconds: AtomicF64,
    loop_iteration: AtomicU32,
}

impl SharedTransportState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            playing: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            position_seconds: AtomicF64::new(0.0),
            loop_iteration: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> TransportState {
        if self.recording.load(Ordering::Relaxed) {
            TransportState::Recording
        } else if self.playing.load(Ordering::Relaxed) {
            TransportState::Playing
        } else {
            TransportState::Stopped
        }
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        self.playing.store(state.is_playing(), Ordering::Relaxed);
        self.recording.store(state.is_recording(), Ordering::Relaxed);
    }

    /// Timeline seconds of the audible position
    pub fn position_seconds(&self) -> f64 {
        self.position_seconds.get()
    }

    pub(crate) fn set_position_seconds(&self, seconds: f64) {
        self.position_seconds.set(seconds);
    }

    pub fn loop_iteration(&self) -> u32 {
        self.loop_iteration.load(Ordering::Relaxed)
    }

    pub(crate) fn set_loop_iteration(&self, iteration: u32) {
        self.loop_iteration.store(iteration, Ordering::Relaxed);
    }
}

/// Time offset in force from a given audio-clock instant onward
#[derive(Debug, Clone, Copy, PartialEq)]
struct OffsetEpoch {
    effective_from: f64,
    time_offset: f64,
    loop_iteration: u32,
}

/// Scheduling cursor of a running transport
///
/// The scheduler runs ahead of the audio clock, so after a loop wrap the newest
/// `time_offset` is not yet the one the listener hears. Older offsets are kept until
/// the clock passes the point where they were superseded.
#[derive(Debug, Clone)]
pub struct PlaybackCursor {
    last_scheduled_end: Location,
    time_offset: f64,
    loop_iteration: u32,
    continuation_pending: bool,
    history: VecDeque<OffsetEpoch>,
}

impl PlaybackCursor {
    /// Anchor the cursor so that `location` sounds at audio-clock time `now`
    pub fn start_at(
        location: Location,
        now: f64,
        converter: &LocationToTime,
    ) -> Result<Self, TimingError> {
        let time_offset = now - converter.convert_location(&location)?;
        let mut history = VecDeque::new();
        history.push_back(OffsetEpoch {
            effective_from: now,
            time_offset,
            loop_iteration: 0,
        });

        Ok(Self {
            last_scheduled_end: location,
            time_offset,
            loop_iteration: 0,
            continuation_pending: true,
            history,
        })
    }

    pub fn last_scheduled_end(&self) -> Location {
        self.last_scheduled_end
    }

    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    pub fn loop_iteration(&self) -> u32 {
        self.loop_iteration
    }

    /// Audio-clock time of the first location not yet scheduled
    pub fn scheduled_until(&self, converter: &LocationToTime) -> Result<f64, TimingError> {
        Ok(self.time_offset + converter.convert_location(&self.last_scheduled_end)?)
    }

    /// True once after a start, seek or wrap
    pub fn take_continuation(&mut self) -> bool {
        std::mem::replace(&mut self.continuation_pending, false)
    }

    pub fn advance_to(&mut self, end: Location) {
        self.last_scheduled_end = end;
    }

    /// Jump from `loop_end` back to `loop_start`; returns the audio-clock time of the seam
    pub fn wrap(
        &mut self,
        loop_start: Location,
        loop_end: Location,
        converter: &LocationToTime,
    ) -> Result<f64, TimingError> {
        let end_seconds = converter.convert_location(&loop_end)?;
        let start_seconds = converter.convert_location(&loop_start)?;
        let seam = self.time_offset + end_seconds;

        self.time_offset += end_seconds - start_seconds;
        self.loop_iteration += 1;
        self.last_scheduled_end = loop_start;
        self.continuation_pending = true;
        self.history.push_back(OffsetEpoch {
            effective_from: seam,
            time_offset: self.time_offset,
            loop_iteration: self.loop_iteration,
        });

        Ok(seam)
    }

    /// Keep the next unscheduled location at the same audio-clock time under a new map
    pub fn reanchor(
        &mut self,
        old: &LocationToTime,
        new: &LocationToTime,
    ) -> Result<(), TimingError> {
        let seam = self.time_offset + old.convert_location(&self.last_scheduled_end)?;
        self.time_offset = seam - new.convert_location(&self.last_scheduled_end)?;
        self.history.push_back(OffsetEpoch {
            effective_from: seam,
            time_offset: self.time_offset,
            loop_iteration: self.loop_iteration,
        });
        Ok(())
    }

    /// Drop offsets the audio clock has moved past
    pub fn prune(&mut self, now: f64) {
        while self.history.len() > 1 && self.history[1].effective_from <= now {
            self.history.pop_front();
        }
    }

    fn epoch_at(&self, now: f64) -> OffsetEpoch {
        let fallback = OffsetEpoch {
            effective_from: now,
            time_offset: self.time_offset,
            loop_iteration: self.loop_iteration,
        };
        self.history
            .iter()
            .rev()
            .find(|epoch| epoch.effective_from <= now)
            .or_else(|| self.history.front())
            .copied()
            .unwrap_or(fallback)
    }

    /// Timeline seconds being heard at audio-clock time `now`
    pub fn seconds_at(&self, now: f64) -> f64 {
        (now - self.epoch_at(now).time_offset).max(0.0)
    }

    /// Loop iteration being heard at audio-clock time `now`
    pub fn audible_iteration(&self, now: f64) -> u32 {
        self.epoch_at(now).loop_iteration
    }

    pub fn location_at(&self, now: f64, converter: &LocationToTime) -> Result<Location, TimingError> {
        converter.convert_time(self.seconds_at(now))
    }
}
