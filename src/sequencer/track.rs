// Tracks - Instrument and audio lanes that turn their regions into scheduled sound
//
// Each track owns its own cache of what it already scheduled (active notes, voices),
// so the engine can hand out windows without knowing what a track plays.

use std::collections::HashMap;

use crate::audio::backend::{BufferPlayback, SharedBackend, VoiceHandle};
use crate::sequencer::region::{Region, RegionContent, RegionId, TrackId, TrackKind};
use crate::sequencer::scheduling::{
    AudioGraphLifecycle, GraphBinding, LifecycleState, PlaybackScheduling, SchedulingError,
    SchedulingWindow,
};
use crate::sequencer::tempo_map::LocationToTime;
use crate::sequencer::timeline::TimeSignature;

/// Handle to one note started on an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteHandle(pub u64);

/// External sound source driven by an instrument track
///
/// Times are absolute seconds on the audio clock. Calling `note_off` again for the
/// same handle moves its release; the latest call wins.
pub trait Instrument: Send {
    fn note_on(&mut self, pitch: u8, velocity: u8, when: f64) -> NoteHandle;

    fn note_off(&mut self, note: NoteHandle, when: f64);

    /// Cut every started or pending note immediately
    fn all_notes_off(&mut self);
}

/// Instrument that only logs what it is asked to play
#[derive(Debug, Default)]
pub struct LoggingInstrument {
    next_note: u64,
}

impl Instrument for LoggingInstrument {
    fn note_on(&mut self, pitch: u8, velocity: u8, when: f64) -> NoteHandle {
        self.next_note += 1;
        tracing::info!(note = self.next_note, pitch, velocity, when, "note on");
        NoteHandle(self.next_note)
    }

    fn note_off(&mut self, note: NoteHandle, when: f64) {
        tracing::info!(note = note.0, when, "note off");
    }

    fn all_notes_off(&mut self) {
        tracing::info!("all notes off");
    }
}

/// A lane on the arrangement
pub trait Track: PlaybackScheduling + AudioGraphLifecycle + Send {
    fn id(&self) -> TrackId;

    fn name(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Regions ordered by position
    fn regions(&self) -> &[Region];

    fn regions_mut(&mut self) -> &mut Vec<Region>;

    fn is_muted(&self) -> bool;

    /// Muting silences what is already sounding
    fn set_muted(&mut self, muted: bool);

    fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions().iter().find(|region| region.id == id)
    }

    /// Insert keeping regions sorted by position. The caller checks the content kind.
    fn insert_region(&mut self, region: Region) {
        let regions = self.regions_mut();
        let insert_pos = regions
            .binary_search_by(|r| r.position.cmp(&region.position))
            .unwrap_or_else(|pos| pos);
        regions.insert(insert_pos, region);
    }

    fn take_region(&mut self, id: RegionId) -> Option<Region> {
        let regions = self.regions_mut();
        let index = regions.iter().position(|region| region.id == id)?;
        Some(regions.remove(index))
    }
}

/// State common to every track type
#[derive(Debug)]
struct TrackCore {
    id: TrackId,
    name: String,
    regions: Vec<Region>,
    muted: bool,
    binding: GraphBinding,
}

impl TrackCore {
    fn new(name: String) -> Self {
        Self {
            id: TrackId::generate(),
            name,
            regions: Vec::new(),
            muted: false,
            binding: GraphBinding::new(),
        }
    }

    /// Regions overlapping the window, with the signature each is measured in
    fn regions_in<'a>(
        &'a self,
        window: &'a SchedulingWindow,
        converter: &'a LocationToTime,
    ) -> impl Iterator<Item = (&'a Region, TimeSignature)> + 'a {
        self.regions
            .iter()
            .take_while(move |region| region.position < window.end)
            .filter_map(move |region| {
                let signature = converter.time_signature_at_location(&region.position);
                (region.end(&signature) > window.start).then_some((region, signature))
            })
    }
}

/// Note-on sent, note-off pending
#[derive(Debug, Clone, Copy)]
struct ActiveNote {
    handle: NoteHandle,
    pitch: u8,
    off_time: f64,
    /// Release before any boundary clipped it
    natural_off: f64,
}

/// (playback run, region, note index, loop iteration)
type NoteKey = (u32, RegionId, usize, u32);

/// New end for something ending at `end`, or None to leave it alone
///
/// Ends anchored to `old_time` follow the boundary to `new_time`, never past their
/// natural end. Other ends only move back onto `new_time`.
fn adjusted_end(end: f64, natural: f64, old_time: Option<f64>, new_time: Option<f64>) -> Option<f64> {
    let target = if old_time == Some(end) {
        new_time.map_or(natural, |boundary| natural.min(boundary))
    } else {
        match new_time {
            Some(boundary) if end > boundary => boundary,
            _ => return None,
        }
    };
    (target != end).then_some(target)
}

/// Track that plays MIDI regions on an external instrument
pub struct InstrumentTrack {
    core: TrackCore,
    instrument: Box<dyn Instrument>,
    active_notes: HashMap<NoteKey, ActiveNote>,
    run: u32,
}

impl InstrumentTrack {
    pub fn new(name: impl Into<String>, instrument: Box<dyn Instrument>) -> Self {
        Self {
            core: TrackCore::new(name.into()),
            instrument,
            active_notes: HashMap::new(),
            run: 0,
        }
    }

    pub fn active_note_count(&self) -> usize {
        self.active_notes.len()
    }

    /// Pitches currently started and not yet released
    pub fn active_pitches(&self) -> Vec<u8> {
        let mut pitches: Vec<u8> = self.active_notes.values().map(|note| note.pitch).collect();
        pitches.sort_unstable();
        pitches
    }
}

impl std::fmt::Debug for InstrumentTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentTrack")
            .field("core", &self.core)
            .field("active_notes", &self.active_notes.len())
            .finish()
    }
}

impl PlaybackScheduling for InstrumentTrack {
    fn schedule_audio_events(
        &mut self,
        _window: &SchedulingWindow,
        _converter: &LocationToTime,
    ) -> Result<(), SchedulingError> {
        self.core.binding.backend()?;
        Ok(())
    }

    fn schedule_midi_events(
        &mut self,
        window: &SchedulingWindow,
        converter: &LocationToTime,
    ) -> Result<(), SchedulingError> {
        self.core.binding.backend()?;
        if self.core.muted {
            return Ok(());
        }

        for (region, signature) in self.core.regions_in(window, converter) {
            let region_end = region.end(&signature);
            let region_end_time = window.absolute_time(&region_end, converter)?;

            for (index, note) in region.notes().iter().enumerate() {
                let note_start = region.position.add(note.start, &signature);
                if note_start < region.position || note_start >= region_end {
                    continue;
                }
                if !window.contains(&note_start) {
                    continue;
                }

                let key = (self.run, region.id, index, window.loop_iteration);
                if self.active_notes.contains_key(&key) {
                    continue;
                }

                let on_time = window.absolute_time(&note_start, converter)?;
                let note_end = note_start.add(note.length, &signature);
                let natural_off = window
                    .absolute_time(&note_end, converter)?
                    .min(region_end_time)
                    .max(on_time);
                let off_time = window.clip(natural_off).max(on_time);

                let handle = self.instrument.note_on(note.pitch, note.velocity, on_time);
                self.instrument.note_off(handle, off_time);
                tracing::trace!(
                    track = self.core.id.as_u64(),
                    note = %note.note_name(),
                    on_time,
                    off_time,
                    "scheduled note"
                );

                self.active_notes.insert(
                    key,
                    ActiveNote {
                        handle,
                        pitch: note.pitch,
                        off_time,
                        natural_off,
                    },
                );
            }
        }

        self.core.binding.set_active(!self.active_notes.is_empty());
        Ok(())
    }

    fn adjust_discontinuation_time(
        &mut self,
        _time_offset: f64,
        old_time: Option<f64>,
        new_time: Option<f64>,
        _converter: &LocationToTime,
        loop_iteration: u32,
    ) -> Result<(), SchedulingError> {
        for ((run, _, _, iteration), note) in self.active_notes.iter_mut() {
            if *run != self.run || *iteration > loop_iteration {
                continue;
            }
            if let Some(off_time) = adjusted_end(note.off_time, note.natural_off, old_time, new_time) {
                self.instrument.note_off(note.handle, off_time);
                note.off_time = off_time;
            }
        }
        Ok(())
    }

    fn begin_run(&mut self) {
        self.run = self.run.wrapping_add(1);
    }

    fn housekeeping(&mut self, current_time: f64) {
        self.active_notes
            .retain(|_, note| note.off_time > current_time);
        self.core.binding.set_active(!self.active_notes.is_empty());
    }

    fn stop(&mut self) {
        self.instrument.all_notes_off();
        self.active_notes.clear();
        self.core.binding.set_active(false);
    }
}

impl AudioGraphLifecycle for InstrumentTrack {
    fn initialize(&mut self, backend: &SharedBackend) -> Result<(), SchedulingError> {
        self.core.binding.bind(backend)?;
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<(), SchedulingError> {
        self.stop();
        self.core.binding.unbind()?;
        Ok(())
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.core.binding.state()
    }
}

impl Track for InstrumentTrack {
    fn id(&self) -> TrackId {
        self.core.id
    }

    fn name(&self) -> &str {
        &self.core.name
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Instrument
    }

    fn regions(&self) -> &[Region] {
        &self.core.regions
    }

    fn regions_mut(&mut self) -> &mut Vec<Region> {
        &mut self.core.regions
    }

    fn is_muted(&self) -> bool {
        self.core.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.core.muted = muted;
        if muted {
            self.stop();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledVoice {
    voice: VoiceHandle,
    stop_at: f64,
    natural_stop: f64,
}

/// Track that plays audio regions as buffers on the backend
#[derive(Debug)]
pub struct AudioTrack {
    core: TrackCore,
    /// Keyed by (playback run, region, loop iteration)
    voices: HashMap<(u32, RegionId, u32), ScheduledVoice>,
    run: u32,
}

impl AudioTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: TrackCore::new(name.into()),
            voices: HashMap::new(),
            run: 0,
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }
}

impl PlaybackScheduling for AudioTrack {
    fn schedule_audio_events(
        &mut self,
        window: &SchedulingWindow,
        converter: &LocationToTime,
    ) -> Result<(), SchedulingError> {
        let backend = self.core.binding.backend()?;
        if self.core.muted {
            return Ok(());
        }

        for (region, signature) in self.core.regions_in(window, converter) {
            let RegionContent::Audio(clip) = &region.content else {
                continue;
            };

            let key = (self.run, region.id, window.loop_iteration);
            if self.voices.contains_key(&key) {
                continue;
            }

            let region_start_time = window.absolute_time(&region.position, converter)?;
            let region_end_time = window.absolute_time(&region.end(&signature), converter)?;
            let clip_offset = clip.offset_seconds;

            let (when, offset) = if window.contains(&region.position) {
                (region_start_time, clip_offset)
            } else if let Some(continuation) = window.continuation_time {
                // Already under way at the window start: resume mid-buffer
                let elapsed = window.absolute_time(&window.start, converter)? - region_start_time;
                (continuation, clip_offset + elapsed)
            } else {
                continue;
            };

            let stop_at = window.clip(region_end_time);
            let voice = backend.play_buffer(BufferPlayback {
                buffer: clip.buffer,
                when,
                offset,
                stop_at,
                gain: clip.gain,
            });
            tracing::trace!(
                track = self.core.id.as_u64(),
                region = region.id.as_u64(),
                when,
                offset,
                stop_at,
                "scheduled buffer"
            );

            self.voices.insert(
                key,
                ScheduledVoice {
                    voice,
                    stop_at,
                    natural_stop: region_end_time,
                },
            );
        }

        self.core.binding.set_active(!self.voices.is_empty());
        Ok(())
    }

    fn schedule_midi_events(
        &mut self,
        _window: &SchedulingWindow,
        _converter: &LocationToTime,
    ) -> Result<(), SchedulingError> {
        self.core.binding.backend()?;
        Ok(())
    }

    fn adjust_discontinuation_time(
        &mut self,
        _time_offset: f64,
        old_time: Option<f64>,
        new_time: Option<f64>,
        _converter: &LocationToTime,
        loop_iteration: u32,
    ) -> Result<(), SchedulingError> {
        let backend = self.core.binding.backend()?;

        for ((run, _, iteration), scheduled) in self.voices.iter_mut() {
            if *run != self.run || *iteration > loop_iteration {
                continue;
            }
            if let Some(stop_at) =
                adjusted_end(scheduled.stop_at, scheduled.natural_stop, old_time, new_time)
            {
                backend.reschedule_stop(scheduled.voice, stop_at);
                scheduled.stop_at = stop_at;
            }
        }
        Ok(())
    }

    fn begin_run(&mut self) {
        self.run = self.run.wrapping_add(1);
    }

    fn housekeeping(&mut self, current_time: f64) {
        self.voices.retain(|_, scheduled| scheduled.stop_at > current_time);
        self.core.binding.set_active(!self.voices.is_empty());
    }

    fn stop(&mut self) {
        if let Ok(backend) = self.core.binding.backend() {
            for scheduled in self.voices.values() {
                backend.stop_voice(scheduled.voice);
            }
        }
        self.voices.clear();
        self.core.binding.set_active(false);
    }
}

impl AudioGraphLifecycle for AudioTrack {
    fn initialize(&mut self, backend: &SharedBackend) -> Result<(), SchedulingError> {
        self.core.binding.bind(backend)?;
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<(), SchedulingError> {
        self.stop();
        self.core.binding.unbind()?;
        Ok(())
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.core.binding.state()
    }
}

impl Track for AudioTrack {
    fn id(&self) -> TrackId {
        self.core.id
    }

    fn name(&self) -> &str {
        &self.core.name
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn regions(&self) -> &[Region] {
        &self.core.regions
    }

    fn regions_mut(&mut self) -> &mut Vec<Region> {
        &mut self.core.regions
    }

    fn is_muted(&self) -> bool {
        self.core.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.core.muted = muted;
        if muted {
            self.stop();
        }
    }
}
