// Audio backend - Boundary to the host audio subsystem
//
// The scheduler never renders audio. It hands time-stamped playback requests to a
// backend that owns the real-time render thread, and reads the backend's monotonic
// clock to decide how far ahead it has to schedule.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::parameters::AtomicF64;

/// Reference to an audio buffer already decoded by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AudioBufferId(pub u64);

/// Handle to one scheduled sound, used to move its stop time or cut it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle(pub u64);

/// Play `buffer` at `when`, starting `offset` seconds into it, until `stop_at`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferPlayback {
    pub buffer: AudioBufferId,
    pub when: f64,
    pub offset: f64,
    pub stop_at: f64,
    pub gain: f32,
}

/// Play a decaying tone of `frequency` Hz at `when` for `duration` seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonePlayback {
    pub frequency: f32,
    pub when: f64,
    pub duration: f64,
    pub gain: f32,
}

/// Host audio subsystem as seen by the scheduler
///
/// All times are absolute seconds on the backend's own clock (`now()`).
pub trait AudioBackend: Send + Sync {
    /// Monotonic audio clock in seconds
    fn now(&self) -> f64;

    fn play_buffer(&self, request: BufferPlayback) -> VoiceHandle;

    fn play_tone(&self, request: TonePlayback) -> VoiceHandle;

    /// Move the stop time of a scheduled voice
    fn reschedule_stop(&self, voice: VoiceHandle, when: f64);

    /// Silence a voice immediately, whether it started yet or not
    fn stop_voice(&self, voice: VoiceHandle);
}

pub type SharedBackend = Arc<dyn AudioBackend>;

/// Everything an [`OfflineBackend`] was asked to do, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceCommand {
    PlayBuffer {
        voice: VoiceHandle,
        request: BufferPlayback,
    },
    PlayTone {
        voice: VoiceHandle,
        request: TonePlayback,
    },
    RescheduleStop {
        voice: VoiceHandle,
        when: f64,
    },
    Stop {
        voice: VoiceHandle,
    },
}

/// Backend with a manually driven clock that records every request
///
/// Used for offline runs and for inspecting what the scheduler emitted.
#[derive(Debug, Default)]
pub struct OfflineBackend {
    clock: AtomicF64,
    next_voice: AtomicU64,
    commands: Mutex<Vec<VoiceCommand>>,
}

impl OfflineBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_time(&self, seconds: f64) {
        self.clock.set(seconds);
    }

    pub fn advance(&self, seconds: f64) -> f64 {
        self.clock.add(seconds)
    }

    pub fn commands(&self) -> Vec<VoiceCommand> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }

    pub fn take_commands(&self) -> Vec<VoiceCommand> {
        self.commands
            .lock()
            .map(|mut commands| std::mem::take(&mut *commands))
            .unwrap_or_default()
    }

    fn record(&self, command: VoiceCommand) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command);
        }
    }

    fn allocate_voice(&self) -> VoiceHandle {
        VoiceHandle(self.next_voice.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl AudioBackend for OfflineBackend {
    fn now(&self) -> f64 {
        self.clock.get()
    }

    fn play_buffer(&self, request: BufferPlayback) -> VoiceHandle {
        let voice = self.allocate_voice();
        self.record(VoiceCommand::PlayBuffer { voice, request });
        voice
    }

    fn play_tone(&self, request: TonePlayback) -> VoiceHandle {
        let voice = self.allocate_voice();
        self.record(VoiceCommand::PlayTone { voice, request });
        voice
    }

    fn reschedule_stop(&self, voice: VoiceHandle, when: f64) {
        self.record(VoiceCommand::RescheduleStop { voice, when });
    }

    fn stop_voice(&self, voice: VoiceHandle) {
        self.record(VoiceCommand::Stop { voice });
    }
}

/// Wall-clock backend that only logs what it would play
///
/// Lets the scheduler run headless against real time.
#[derive(Debug)]
pub struct LoggingBackend {
    started: Instant,
    next_voice: AtomicU64,
}

impl LoggingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            next_voice: AtomicU64::new(1),
        })
    }

    fn allocate_voice(&self) -> VoiceHandle {
        VoiceHandle(self.next_voice.fetch_add(1, Ordering::Relaxed))
    }
}

impl AudioBackend for LoggingBackend {
    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn play_buffer(&self, request: BufferPlayback) -> VoiceHandle {
        let voice = self.allocate_voice();
        tracing::info!(
            voice = voice.0,
            buffer = request.buffer.0,
            when = request.when,
            offset = request.offset,
            stop_at = request.stop_at,
            "play buffer"
        );
        voice
    }

    fn play_tone(&self, request: TonePlayback) -> VoiceHandle {
        let voice = self.allocate_voice();
        tracing::info!(
            voice = voice.0,
            frequency = request.frequency,
            when = request.when,
            "play tone"
        );
        voice
    }

    fn reschedule_stop(&self, voice: VoiceHandle, when: f64) {
        tracing::debug!(voice = voice.0, when, "reschedule stop");
    }

    fn stop_voice(&self, voice: VoiceHandle) {
        tracing::debug!(voice = voice.0, "stop voice");
    }
}
