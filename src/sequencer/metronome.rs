// Metronome - Click track scheduled on every beat
// Click sounds come from loaded samples when available, otherwise from tones

use crate::audio::assets::{AssetLoader, AssetRequestId, AssetRequests};
use crate::audio::backend::{AudioBufferId, BufferPlayback, SharedBackend, TonePlayback, VoiceHandle};
use crate::config::{ClickSoundCandidate, MetronomeConfig};
use crate::sequencer::scheduling::{
    AudioGraphLifecycle, GraphBinding, LifecycleState, PlaybackScheduling, SchedulingError,
    SchedulingWindow,
};
use crate::sequencer::tempo_map::LocationToTime;
use crate::sequencer::timeline::{Duration, Location};

/// Metronome click type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickType {
    /// Click on first beat of bar (accent/downbeat)
    Accent,
    /// Click on other beats
    Regular,
}

impl ClickType {
    pub fn for_beat(location: &Location) -> Self {
        if location.beat == 1 {
            ClickType::Accent
        } else {
            ClickType::Regular
        }
    }

    /// Relative loudness of the click
    fn amplitude(&self) -> f32 {
        match self {
            ClickType::Accent => 0.6,
            ClickType::Regular => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickBuffers {
    pub accent: AudioBufferId,
    pub regular: AudioBufferId,
}

impl ClickBuffers {
    fn get(&self, click_type: ClickType) -> AudioBufferId {
        match click_type {
            ClickType::Accent => self.accent,
            ClickType::Regular => self.regular,
        }
    }
}

/// One half of a candidate being loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Requested(AssetRequestId),
    Ready(AudioBufferId),
}

impl Slot {
    fn resolve(&mut self, request: AssetRequestId, buffer: AudioBufferId) {
        if *self == Slot::Requested(request) {
            *self = Slot::Ready(buffer);
        }
    }

    fn is_for(&self, request: AssetRequestId) -> bool {
        *self == Slot::Requested(request)
    }

    fn buffer(&self) -> Option<AudioBufferId> {
        match self {
            Slot::Ready(buffer) => Some(*buffer),
            Slot::Requested(_) => None,
        }
    }
}

/// Where click sound resolution stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickSound {
    /// Not started yet
    Unresolved,
    /// Waiting on the candidate at this index
    Pending(usize),
    Loaded(ClickBuffers),
    /// Every candidate failed, clicks are synthesized
    Fallback,
}

/// Tries click sound candidates in order until one loads
///
/// Completions are drained by `poll`, so a loader answering synchronously never
/// re-enters the resolver.
pub struct ClickSoundResolver {
    candidates: Vec<ClickSoundCandidate>,
    requests: Option<AssetRequests>,
    state: ClickSound,
    accent: Slot,
    regular: Slot,
}

impl ClickSoundResolver {
    pub fn new(candidates: Vec<ClickSoundCandidate>, loader: Option<Box<dyn AssetLoader>>) -> Self {
        Self {
            candidates,
            requests: loader.map(AssetRequests::new),
            state: ClickSound::Unresolved,
            accent: Slot::Requested(0),
            regular: Slot::Requested(0),
        }
    }

    pub fn state(&self) -> ClickSound {
        self.state
    }

    /// Issue the first request; no-op once started
    pub fn start(&mut self) {
        if self.state == ClickSound::Unresolved {
            self.request_candidate(0);
        }
    }

    fn request_candidate(&mut self, index: usize) {
        let (Some(requests), Some(candidate)) = (self.requests.as_mut(), self.candidates.get(index))
        else {
            tracing::warn!("no click sound could be loaded, falling back to synthesized clicks");
            self.state = ClickSound::Fallback;
            return;
        };

        self.state = ClickSound::Pending(index);
        let accent = requests.request(&candidate.accent);
        self.accent = Slot::Requested(accent);
        self.regular = match &candidate.regular {
            Some(resource) => Slot::Requested(requests.request(resource)),
            None => Slot::Requested(accent),
        };
    }

    /// Drain completions and advance through the candidates
    pub fn poll(&mut self) -> ClickSound {
        loop {
            let ClickSound::Pending(index) = self.state else {
                return self.state;
            };
            let Some(result) = self.requests.as_mut().and_then(|requests| requests.poll()) else {
                return self.state;
            };

            // Late results from a candidate already given up on
            if !self.accent.is_for(result.request) && !self.regular.is_for(result.request) {
                continue;
            }

            match result.outcome {
                Ok(buffer) => {
                    self.accent.resolve(result.request, buffer);
                    self.regular.resolve(result.request, buffer);
                    if let (Some(accent), Some(regular)) = (self.accent.buffer(), self.regular.buffer()) {
                        tracing::debug!(candidate = index, "click sounds loaded");
                        self.state = ClickSound::Loaded(ClickBuffers { accent, regular });
                    }
                }
                Err(error) => {
                    tracing::warn!(candidate = index, %error, "click sound candidate failed");
                    self.request_candidate(index + 1);
                }
            }
        }
    }
}

impl std::fmt::Debug for ClickSoundResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickSoundResolver")
            .field("candidates", &self.candidates.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Metronome scheduled alongside the tracks
#[derive(Debug)]
pub struct Metronome {
    enabled: bool,
    volume: f32,
    accent_frequency: f32,
    regular_frequency: f32,
    click_duration: f64,
    resolver: ClickSoundResolver,
    binding: GraphBinding,

    // (voice, end time)
    voices: Vec<(VoiceHandle, f64)>,
}

impl Metronome {
    pub fn new(config: &MetronomeConfig, loader: Option<Box<dyn AssetLoader>>) -> Self {
        Self {
            enabled: config.enabled,
            volume: config.volume.clamp(0.0, 1.0),
            accent_frequency: config.accent_frequency,
            regular_frequency: config.regular_frequency,
            click_duration: config.click_duration_ms / 1000.0,
            resolver: ClickSoundResolver::new(config.click_sounds.clone(), loader),
            binding: GraphBinding::new(),
            voices: Vec::new(),
        }
    }

    /// Enable/disable metronome
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.stop();
        }
    }

    /// Check if metronome is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set metronome volume (0.0 to 1.0)
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Get metronome volume
    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn click_sound(&self) -> ClickSound {
        self.resolver.state()
    }

    /// Pick up finished click sound loads
    pub fn poll_assets(&mut self) -> ClickSound {
        self.resolver.poll()
    }

    /// Play one click at `when` with whatever sound is resolved so far
    pub fn schedule_click(
        &mut self,
        click_type: ClickType,
        when: f64,
    ) -> Result<VoiceHandle, SchedulingError> {
        let backend = self.binding.backend()?;
        let gain = self.volume * click_type.amplitude();
        let end = when + self.click_duration;

        let voice = match self.resolver.state() {
            ClickSound::Loaded(buffers) => backend.play_buffer(BufferPlayback {
                buffer: buffers.get(click_type),
                when,
                offset: 0.0,
                stop_at: end,
                gain,
            }),
            _ => {
                let frequency = match click_type {
                    ClickType::Accent => self.accent_frequency,
                    ClickType::Regular => self.regular_frequency,
                };
                backend.play_tone(TonePlayback {
                    frequency,
                    when,
                    duration: self.click_duration,
                    gain,
                })
            }
        };

        self.voices.push((voice, end));
        Ok(voice)
    }
}

/// First beat start at or after `location`
fn first_beat_from(location: &Location, converter: &LocationToTime) -> Location {
    let beat = Location::new(location.bar, location.beat, 1);
    if location.tick == 1 {
        beat
    } else {
        let signature = converter.time_signature_at_location(&beat);
        beat.add(Duration::new(0, 1, 0), &signature)
    }
}

impl PlaybackScheduling for Metronome {
    fn schedule_audio_events(
        &mut self,
        window: &SchedulingWindow,
        converter: &LocationToTime,
    ) -> Result<(), SchedulingError> {
        self.binding.backend()?;
        if !self.enabled {
            return Ok(());
        }

        // Every beat in the window gets its click, however many there are
        let mut beat = first_beat_from(&window.start, converter);
        while beat < window.end {
            let when = window.absolute_time(&beat, converter)?;
            self.schedule_click(ClickType::for_beat(&beat), when)?;

            let signature = converter.time_signature_at_location(&beat);
            beat = beat.add(Duration::new(0, 1, 0), &signature);
        }

        self.binding.set_active(!self.voices.is_empty());
        Ok(())
    }

    fn schedule_midi_events(
        &mut self,
        _window: &SchedulingWindow,
        _converter: &LocationToTime,
    ) -> Result<(), SchedulingError> {
        self.binding.backend()?;
        Ok(())
    }

    /// Clicks are shorter than any boundary shift worth chasing
    fn adjust_discontinuation_time(
        &mut self,
        _time_offset: f64,
        _old_time: Option<f64>,
        _new_time: Option<f64>,
        _converter: &LocationToTime,
        _loop_iteration: u32,
    ) -> Result<(), SchedulingError> {
        Ok(())
    }

    fn housekeeping(&mut self, current_time: f64) {
        self.poll_assets();
        self.voices.retain(|(_, end)| *end > current_time);
        self.binding.set_active(!self.voices.is_empty());
    }

    fn stop(&mut self) {
        if let Ok(backend) = self.binding.backend() {
            for (voice, _) in &self.voices {
                backend.stop_voice(*voice);
            }
        }
        self.voices.clear();
        self.binding.set_active(false);
    }
}

impl AudioGraphLifecycle for Metronome {
    fn initialize(&mut self, backend: &SharedBackend) -> Result<(), SchedulingError> {
        if self.binding.bind(backend)? {
            self.resolver.start();
            self.poll_assets();
        }
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<(), SchedulingError> {
        self.stop();
        self.binding.unbind()?;
        Ok(())
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.binding.state()
    }
}
