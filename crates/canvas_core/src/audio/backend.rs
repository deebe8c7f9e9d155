//! The platform audio seam.
//!
//! `AudioBackend` models what the platform actually gives us: decode bytes
//! into immutable buffers, start one-shot voices at an offset, adjust a
//! voice's gain, and a monotonic clock. Voices cannot be restarted — a
//! stopped voice is gone, which is why the engine does offset bookkeeping
//! for pause/resume. The engine owns the channel/gain topology as
//! bookkeeping and hands the backend flattened per-voice gains.

use anyhow::Result;

pub type BufferId = u32;
pub type VoiceId = u64;

/// A decoded buffer: the handle plus its duration in seconds.
#[derive(Debug, Clone, Copy)]
pub struct DecodedBuffer {
    pub id: BufferId,
    pub duration: f64,
}

/// Everything needed to start a voice. `gain` is the flattened effective
/// gain at start time; `offset` is seconds into the buffer.
#[derive(Debug, Clone, Copy)]
pub struct VoiceSpec {
    pub buffer: BufferId,
    pub gain: f64,
    pub looping: bool,
    pub offset: f64,
}

pub trait AudioBackend {
    /// Bring the platform audio device up. May fail (no device, no user
    /// gesture yet); the engine degrades rather than propagating.
    fn activate(&mut self) -> Result<()>;

    /// Decode encoded bytes into an immutable buffer.
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedBuffer>;

    fn start_voice(&mut self, spec: VoiceSpec) -> Result<VoiceId>;

    /// Stops and discards the voice. Unknown ids are ignored.
    fn stop_voice(&mut self, voice: VoiceId);

    fn set_voice_gain(&mut self, voice: VoiceId, gain: f64);

    /// Monotonic clock in seconds. Must work before `activate`.
    fn now(&self) -> f64;

    fn close(&mut self);
}

/// Backend for environments without audio: activation always fails, so the
/// engine marks itself unavailable and every call becomes a safe no-op.
#[derive(Debug)]
pub struct NullBackend {
    start: std::time::Instant,
}

impl NullBackend {
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for NullBackend {
    fn activate(&mut self) -> Result<()> {
        anyhow::bail!("audio device not available")
    }

    fn decode(&mut self, _bytes: &[u8]) -> Result<DecodedBuffer> {
        anyhow::bail!("audio device not available")
    }

    fn start_voice(&mut self, _spec: VoiceSpec) -> Result<VoiceId> {
        anyhow::bail!("audio device not available")
    }

    fn stop_voice(&mut self, _voice: VoiceId) {}

    fn set_voice_gain(&mut self, _voice: VoiceId, _gain: f64) {}

    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn close(&mut self) {}
}
