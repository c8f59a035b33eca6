// Scheduling contract - What the engine asks of every track and the metronome
//
// The engine hands out consecutive half-open windows [start, end) of musical time.
// A schedulable turns whatever starts inside the window into time-stamped requests
// on the audio clock, where a location L sounds at `time_offset + convert_location(L)`.

use std::sync::Arc;

use thiserror::Error;

use crate::audio::backend::SharedBackend;
use crate::sequencer::tempo_map::LocationToTime;
use crate::sequencer::timeline::{Location, TimingError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulingError {
    #[error("Audio graph already initialized with a different backend")]
    AlreadyInitialized,

    #[error("Audio graph not initialized")]
    NotInitialized,

    #[error("Timing error: {0}")]
    Timing(#[from] TimingError),

    #[error("Scheduling failed: {0}")]
    Failed(String),
}

/// One slice of the timeline to schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulingWindow {
    /// Audio-clock time of the timeline origin for this loop iteration
    pub time_offset: f64,
    pub start: Location,
    /// Exclusive
    pub end: Location,
    pub loop_iteration: u32,
    /// Set on the first window after start, seek or loop wrap
    pub continuation_time: Option<f64>,
    /// Set when the window ends at a loop boundary or the playback end
    pub discontinuation_time: Option<f64>,
}

impl SchedulingWindow {
    pub fn contains(&self, location: &Location) -> bool {
        *location >= self.start && *location < self.end
    }

    /// Audio-clock time of `location` in this window's iteration
    pub fn absolute_time(
        &self,
        location: &Location,
        converter: &LocationToTime,
    ) -> Result<f64, TimingError> {
        Ok(self.time_offset + converter.convert_location(location)?)
    }

    /// Clip an end time to the discontinuation boundary, if any
    pub fn clip(&self, time: f64) -> f64 {
        match self.discontinuation_time {
            Some(boundary) => time.min(boundary),
            None => time,
        }
    }
}

/// Everything the engine drives on each tick
pub trait PlaybackScheduling {
    fn schedule_audio_events(
        &mut self,
        window: &SchedulingWindow,
        converter: &LocationToTime,
    ) -> Result<(), SchedulingError>;

    fn schedule_midi_events(
        &mut self,
        window: &SchedulingWindow,
        converter: &LocationToTime,
    ) -> Result<(), SchedulingError>;

    /// Move already scheduled ends that lie past `new_time` back onto it.
    ///
    /// Ends clipped to `old_time` follow the boundary to `new_time` (or back to their
    /// natural end when `new_time` is None), never past where they would end unclipped.
    /// `old_time` is None when nothing was clipped for this iteration yet.
    fn adjust_discontinuation_time(
        &mut self,
        time_offset: f64,
        old_time: Option<f64>,
        new_time: Option<f64>,
        converter: &LocationToTime,
        loop_iteration: u32,
    ) -> Result<(), SchedulingError>;

    /// Release bookkeeping for sounds that ended before `current_time`
    fn housekeeping(&mut self, current_time: f64);

    /// Silence everything now. Never fails.
    fn stop(&mut self);

    /// A new playback run starts from a fresh position. Sound left ringing by an
    /// earlier run must not keep this run's events from being scheduled.
    fn begin_run(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    /// Sounds scheduled and not yet finished
    Scheduling,
    Idle,
    Deinitialized,
}

pub trait AudioGraphLifecycle {
    fn initialize(&mut self, backend: &SharedBackend) -> Result<(), SchedulingError>;

    fn deinitialize(&mut self) -> Result<(), SchedulingError>;

    fn lifecycle_state(&self) -> LifecycleState;
}

/// Guarded connection of a schedulable to its audio backend
pub struct GraphBinding {
    backend: Option<SharedBackend>,
    state: LifecycleState,
}

impl GraphBinding {
    pub fn new() -> Self {
        Self {
            backend: None,
            state: LifecycleState::Uninitialized,
        }
    }

    /// Returns true when newly bound, false when already bound to the same backend
    pub fn bind(&mut self, backend: &SharedBackend) -> Result<bool, SchedulingError> {
        match &self.backend {
            Some(existing) if Arc::ptr_eq(existing, backend) => Ok(false),
            Some(_) => Err(SchedulingError::AlreadyInitialized),
            None => {
                self.backend = Some(Arc::clone(backend));
                self.state = LifecycleState::Initialized;
                Ok(true)
            }
        }
    }

    pub fn unbind(&mut self) -> Result<SharedBackend, SchedulingError> {
        let backend = self.backend.take().ok_or(SchedulingError::NotInitialized)?;
        self.state = LifecycleState::Deinitialized;
        Ok(backend)
    }

    pub fn backend(&self) -> Result<&SharedBackend, SchedulingError> {
        self.backend.as_ref().ok_or(SchedulingError::NotInitialized)
    }

    pub fn is_bound(&self) -> bool {
        self.backend.is_some()
    }

    /// Record whether scheduled sounds are still pending
    ///
    /// A binding that never had anything pending stays `Initialized`.
    pub fn set_active(&mut self, active: bool) {
        self.state = match (self.state, active) {
            (LifecycleState::Uninitialized | LifecycleState::Deinitialized, _) => self.state,
            (_, true) => LifecycleState::Scheduling,
            (LifecycleState::Initialized, false) => LifecycleState::Initialized,
            (_, false) => LifecycleState::Idle,
        };
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }
}

impl Default for GraphBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GraphBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBinding")
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::OfflineBackend;

    #[test]
    fn test_window_contains_is_half_open() {
        let window = SchedulingWindow {
            time_offset: 0.0,
            start: Location::new(1, 1, 1),
            end: Location::new(1, 2, 1),
            loop_iteration: 0,
            continuation_time: None,
            discontinuation_time: None,
        };
        assert!(window.contains(&Location::new(1, 1, 1)));
        assert!(window.contains(&Location::new(1, 1, 480)));
        assert!(!window.contains(&Location::new(1, 2, 1)));
    }

    #[test]
    fn test_window_clip() {
        let mut window = SchedulingWindow {
            time_offset: 0.0,
            start: Location::ORIGIN,
            end: Location::bar_start(2),
            loop_iteration: 0,
            continuation_time: None,
            discontinuation_time: None,
        };
        assert_eq!(window.clip(3.0), 3.0);
        window.discontinuation_time = Some(2.0);
        assert_eq!(window.clip(3.0), 2.0);
        assert_eq!(window.clip(1.0), 1.0);
    }

    #[test]
    fn test_binding_lifecycle() {
        let backend: SharedBackend = OfflineBackend::new();
        let mut binding = GraphBinding::new();
        assert_eq!(binding.state(), LifecycleState::Uninitialized);
        assert_eq!(binding.backend().err(), Some(SchedulingError::NotInitialized));

        assert_eq!(binding.bind(&backend), Ok(true));
        assert_eq!(binding.state(), LifecycleState::Initialized);

        // Same backend again is a no-op
        assert_eq!(binding.bind(&backend), Ok(false));

        binding.set_active(false);
        assert_eq!(binding.state(), LifecycleState::Initialized);
        binding.set_active(true);
        assert_eq!(binding.state(), LifecycleState::Scheduling);
        binding.set_active(false);
        assert_eq!(binding.state(), LifecycleState::Idle);

        assert!(binding.unbind().is_ok());
        assert_eq!(binding.state(), LifecycleState::Deinitialized);
        assert_eq!(binding.unbind().err(), Some(SchedulingError::NotInitialized));
    }

    #[test]
    fn test_binding_rejects_other_backend() {
        let first: SharedBackend = OfflineBackend::new();
        let second: SharedBackend = OfflineBackend::new();
        let mut binding = GraphBinding::new();

        binding.bind(&first).unwrap();
        assert_eq!(binding.bind(&second), Err(SchedulingError::AlreadyInitialized));
    }
}
