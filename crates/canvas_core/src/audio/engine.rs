//! The audio engine: deferred initialization, a decoded-buffer cache, one
//! music slot, fire-and-forget sounds, and a named channel forest with
//! fades. The channel/gain topology is engine bookkeeping; the backend only
//! ever sees flattened per-voice gains.

use super::backend::{AudioBackend, VoiceId, VoiceSpec};
use anyhow::Result;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineStatus {
    /// Constructed but not yet unlocked (autoplay gate).
    Idle,
    Ready,
    /// Platform audio unavailable; calls are safe no-ops.
    Unavailable,
    Disposed,
}

#[derive(Debug, Clone, Copy)]
struct AudioRef {
    buffer: super::backend::BufferId,
    duration: f64,
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    /// Backend time the ramp started; doubles as the fencing token — a
    /// superseding fade replaces this record wholesale, so a stale ramp can
    /// never clear the new one.
    started_at: f64,
    from: f64,
    to: f64,
    duration: f64,
}

#[derive(Debug, Clone)]
struct Playback {
    audio: String,
    voice: Option<VoiceId>,
    looping: bool,
    duration: f64,
    /// Backend time playback (re)started, minus the offset already played.
    started_at: f64,
    paused_at: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct Channel {
    parent: Option<String>,
    volume: f64,
    fade: Option<Fade>,
    playback: Option<Playback>,
}

#[derive(Debug)]
struct OneShot {
    voice: VoiceId,
    volume: f64,
    ends_at: f64,
}

/// Channel mutations issued before `initialize()` completes, replayed in
/// call order once the engine comes up.
#[derive(Debug, Clone)]
enum QueuedOp {
    CreateChannel(String),
    SetChannelParent(String, Option<String>),
    SetChannelVolume(String, f64),
}

#[derive(Debug, Clone)]
struct MusicState {
    playback: Playback,
    volume: f64,
}

/// Behavior when decode is requested while the platform is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Log and drop (the embedding shell's default).
    Lenient,
    /// Fail loudly (worker/export contexts that want setup errors early).
    Strict,
}

pub struct AudioEngine {
    backend: Box<dyn AudioBackend>,
    status: EngineStatus,
    decode_policy: DecodePolicy,

    buffers: HashMap<String, AudioRef>,
    /// Raw bytes that arrived before unlock, decoded in registration order.
    pending_decodes: Vec<(String, Vec<u8>)>,
    queued_ops: Vec<QueuedOp>,

    master_volume: f64,
    muted: bool,

    channels: HashMap<String, Channel>,
    music: Option<MusicState>,
    oneshots: Vec<OneShot>,
}

impl AudioEngine {
    pub fn new(backend: Box<dyn AudioBackend>, decode_policy: DecodePolicy) -> Self {
        Self {
            backend,
            status: EngineStatus::Idle,
            decode_policy,
            buffers: HashMap::new(),
            pending_decodes: Vec::new(),
            queued_ops: Vec::new(),
            master_volume: 1.0,
            muted: false,
            channels: HashMap::new(),
            music: None,
            oneshots: Vec::new(),
        }
    }

    /// Idempotent unlock. Returns whether audio is available afterwards.
    /// Platform failure degrades the engine instead of propagating.
    pub fn initialize(&mut self) -> bool {
        match self.status {
            EngineStatus::Ready => return true,
            EngineStatus::Unavailable | EngineStatus::Disposed => return false,
            EngineStatus::Idle => {}
        }
        match self.backend.activate() {
            Ok(()) => {
                self.status = EngineStatus::Ready;
                self.flush_pending_decodes();
                self.replay_queued_ops();
                tracing::info!("Audio engine initialized");
                true
            }
            Err(e) => {
                tracing::warn!("Audio unavailable: {e:#}");
                self.status = EngineStatus::Unavailable;
                false
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == EngineStatus::Ready
    }

    fn flush_pending_decodes(&mut self) {
        let pending = std::mem::take(&mut self.pending_decodes);
        for (name, bytes) in pending {
            if let Err(e) = self.decode_now(&name, &bytes) {
                tracing::error!("Deferred decode of '{}' failed: {e:#}", name);
            }
        }
    }

    fn replay_queued_ops(&mut self) {
        let ops = std::mem::take(&mut self.queued_ops);
        for op in ops {
            match op {
                QueuedOp::CreateChannel(name) => self.create_channel(&name),
                QueuedOp::SetChannelParent(name, parent) => {
                    self.set_channel_parent(&name, parent.as_deref())
                }
                QueuedOp::SetChannelVolume(name, v) => self.set_channel_volume(&name, v),
            }
        }
    }

    /// Decode and store bytes under `name`. Before unlock the bytes are
    /// queued; when the platform is unavailable the policy decides between
    /// a logged no-op and a loud failure. Real decode errors propagate.
    pub fn decode_audio(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        match self.status {
            EngineStatus::Idle => {
                self.pending_decodes.push((name.to_string(), bytes.to_vec()));
                Ok(())
            }
            EngineStatus::Ready => self.decode_now(name, bytes),
            EngineStatus::Unavailable | EngineStatus::Disposed => match self.decode_policy {
                DecodePolicy::Lenient => {
                    tracing::warn!("Dropping audio '{}': engine unavailable", name);
                    Ok(())
                }
                DecodePolicy::Strict => anyhow::bail!("audio engine unavailable, cannot decode '{name}'"),
            },
        }
    }

    fn decode_now(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let decoded = self.backend.decode(bytes)?;
        tracing::debug!("Decoded audio '{}' ({:.2}s)", name, decoded.duration);
        self.buffers.insert(name.to_string(), AudioRef { buffer: decoded.id, duration: decoded.duration });
        Ok(())
    }

    pub fn has_audio(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    /// Duration is queryable without engine activity once decoded.
    pub fn duration(&self, name: &str) -> f64 {
        self.buffers.get(name).map(|r| r.duration).unwrap_or(0.0)
    }

    fn output_gain(&self) -> f64 {
        if self.muted {
            0.0
        } else {
            self.master_volume
        }
    }

    // --- Sounds ---

    /// Fire-and-forget playback; overlapping calls each get an independent
    /// voice. Unknown names log and no-op.
    pub fn play_sound(&mut self, name: &str, volume: f64) {
        if self.status != EngineStatus::Ready {
            tracing::debug!("play_sound('{}') before audio ready", name);
            return;
        }
        let Some(audio) = self.buffers.get(name).copied() else {
            tracing::warn!("play_sound: unknown sound '{}'", name);
            return;
        };
        let gain = volume * self.output_gain();
        match self.backend.start_voice(VoiceSpec { buffer: audio.buffer, gain, looping: false, offset: 0.0 }) {
            Ok(voice) => {
                let ends_at = self.backend.now() + audio.duration;
                self.oneshots.push(OneShot { voice, volume, ends_at });
            }
            Err(e) => tracing::warn!("play_sound('{}') failed: {e:#}", name),
        }
    }

    // --- Music (singleton slot) ---

    /// Starting new music always tears down the previous track first.
    pub fn play_music(&mut self, name: &str, volume: f64, looping: bool) -> bool {
        self.stop_music();
        if self.status != EngineStatus::Ready {
            tracing::debug!("play_music('{}') before audio ready", name);
            return false;
        }
        let Some(audio) = self.buffers.get(name).copied() else {
            tracing::warn!("play_music: unknown music '{}'", name);
            return false;
        };
        let gain = volume * self.output_gain();
        match self.backend.start_voice(VoiceSpec { buffer: audio.buffer, gain, looping, offset: 0.0 }) {
            Ok(voice) => {
                self.music = Some(MusicState {
                    playback: Playback {
                        audio: name.to_string(),
                        voice: Some(voice),
                        looping,
                        duration: audio.duration,
                        started_at: self.backend.now(),
                        paused_at: None,
                    },
                    volume,
                });
                true
            }
            Err(e) => {
                tracing::warn!("play_music('{}') failed: {e:#}", name);
                false
            }
        }
    }

    pub fn stop_music(&mut self) {
        if let Some(music) = self.music.take() {
            if let Some(voice) = music.playback.voice {
                self.backend.stop_voice(voice);
            }
        }
    }

    /// Sources are one-shot, so pausing tears the voice down and records
    /// the elapsed offset; looped tracks report position modulo duration.
    pub fn pause_music(&mut self) {
        let now = self.backend.now();
        if let Some(music) = self.music.as_mut() {
            pause_playback(&mut music.playback, self.backend.as_mut(), now);
        }
    }

    /// Recreates a voice at the saved offset.
    pub fn resume_music(&mut self) {
        if self.status != EngineStatus::Ready {
            return;
        }
        let gain = self.music.as_ref().map(|m| m.volume * self.output_gain());
        let now = self.backend.now();
        if let (Some(music), Some(gain)) = (self.music.as_mut(), gain) {
            let buffer = match self.buffers.get(&music.playback.audio) {
                Some(r) => r.buffer,
                None => return,
            };
            resume_playback(&mut music.playback, self.backend.as_mut(), buffer, gain, now);
        }
    }

    pub fn set_music_volume(&mut self, volume: f64) {
        let gain = volume * self.output_gain();
        if let Some(music) = self.music.as_mut() {
            music.volume = volume;
            if let Some(voice) = music.playback.voice {
                self.backend.set_voice_gain(voice, gain);
            }
        }
    }

    pub fn music_volume(&self) -> f64 {
        self.music.as_ref().map(|m| m.volume).unwrap_or(0.0)
    }

    pub fn is_music_playing(&self) -> bool {
        match &self.music {
            Some(m) => playback_active(&m.playback, self.backend.now()),
            None => false,
        }
    }

    pub fn music_time(&self) -> f64 {
        self.music
            .as_ref()
            .map(|m| playback_position(&m.playback, self.backend.now()))
            .unwrap_or(0.0)
    }

    pub fn music_duration(&self) -> f64 {
        self.music.as_ref().map(|m| m.playback.duration).unwrap_or(0.0)
    }

    // --- Master volume / mute ---

    pub fn set_master_volume(&mut self, volume: f64) {
        self.master_volume = volume.max(0.0);
        self.apply_gains();
    }

    pub fn master_volume(&self) -> f64 {
        self.master_volume
    }

    /// Mute zeroes effective output; the pre-mute multipliers are restored
    /// exactly on unmute because gains are always recomputed from scratch.
    pub fn mute(&mut self) {
        self.muted = true;
        self.apply_gains();
    }

    pub fn unmute(&mut self) {
        self.muted = false;
        self.apply_gains();
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    // --- Channels ---

    fn ready_or_queue(&mut self, op: QueuedOp) -> bool {
        if self.status == EngineStatus::Idle {
            self.queued_ops.push(op);
            return false;
        }
        true
    }

    pub fn create_channel(&mut self, name: &str) {
        if !self.ready_or_queue(QueuedOp::CreateChannel(name.to_string())) {
            return;
        }
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Channel { parent: None, volume: 1.0, fade: None, playback: None });
    }

    pub fn destroy_channel(&mut self, name: &str) {
        if let Some(mut channel) = self.channels.remove(name) {
            if let Some(playback) = channel.playback.take() {
                if let Some(voice) = playback.voice {
                    self.backend.stop_voice(voice);
                }
            }
            // Children of a destroyed channel reattach to the root so the
            // graph never holds a dangling parent edge
            for ch in self.channels.values_mut() {
                if ch.parent.as_deref() == Some(name) {
                    ch.parent = None;
                }
            }
        }
    }

    pub fn channel_exists(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn set_channel_parent(&mut self, name: &str, parent: Option<&str>) {
        if !self.ready_or_queue(QueuedOp::SetChannelParent(
            name.to_string(),
            parent.map(|p| p.to_string()),
        )) {
            return;
        }
        if let Some(parent) = parent {
            if !self.channels.contains_key(parent) {
                tracing::warn!("set_channel_parent: unknown parent '{}'", parent);
                return;
            }
            // Reject reparenting that would close a cycle
            let mut cursor = Some(parent.to_string());
            while let Some(cur) = cursor {
                if cur == name {
                    tracing::warn!("set_channel_parent: '{}' would create a cycle", name);
                    return;
                }
                cursor = self.channels.get(&cur).and_then(|c| c.parent.clone());
            }
        }
        if let Some(channel) = self.channels.get_mut(name) {
            channel.parent = parent.map(|p| p.to_string());
            self.apply_gains();
        } else {
            tracing::warn!("set_channel_parent: unknown channel '{}'", name);
        }
    }

    pub fn channel_parent(&self, name: &str) -> Option<String> {
        self.channels.get(name).and_then(|c| c.parent.clone())
    }

    pub fn set_channel_volume(&mut self, name: &str, volume: f64) {
        if !self.ready_or_queue(QueuedOp::SetChannelVolume(name.to_string(), volume)) {
            return;
        }
        if let Some(channel) = self.channels.get_mut(name) {
            channel.volume = volume.max(0.0);
            // An explicit set supersedes an in-flight ramp
            channel.fade = None;
            self.apply_gains();
        } else {
            tracing::warn!("set_channel_volume: unknown channel '{}'", name);
        }
    }

    pub fn channel_volume(&self, name: &str) -> f64 {
        match self.channels.get(name) {
            Some(ch) => self.current_channel_volume(ch, self.backend.now()),
            None => 0.0,
        }
    }

    fn current_channel_volume(&self, channel: &Channel, now: f64) -> f64 {
        match channel.fade {
            Some(fade) => {
                let t = ((now - fade.started_at) / fade.duration).clamp(0.0, 1.0);
                fade.from + (fade.to - fade.from) * t
            }
            None => channel.volume,
        }
    }

    /// Effective volume: the channel's own volume times every ancestor's,
    /// times master. Mute forces 0 regardless.
    pub fn effective_volume(&self, name: &str) -> f64 {
        if self.muted {
            return 0.0;
        }
        let now = self.backend.now();
        let mut product = self.master_volume;
        let mut cursor = Some(name.to_string());
        let mut hops = 0;
        while let Some(cur) = cursor {
            let Some(channel) = self.channels.get(&cur) else {
                return 0.0;
            };
            product *= self.current_channel_volume(channel, now);
            cursor = channel.parent.clone();
            hops += 1;
            if hops > self.channels.len() {
                // Defensive bound; cycles are rejected at reparent time
                break;
            }
        }
        product
    }

    /// Auto-creates the channel (forgiving API), stops whatever the channel
    /// was playing, and starts `name` at `start_time` — normalized modulo
    /// duration when looping, clamped otherwise.
    pub fn play_on_channel(&mut self, channel_name: &str, name: &str, looping: bool, start_time: f64) {
        if self.status != EngineStatus::Ready {
            tracing::debug!("play_on_channel('{}') before audio ready", channel_name);
            return;
        }
        self.create_channel(channel_name);
        self.stop_channel(channel_name);
        let Some(audio) = self.buffers.get(name).copied() else {
            tracing::warn!("play_on_channel: unknown audio '{}'", name);
            return;
        };
        let offset = normalize_offset(start_time, audio.duration, looping);
        let gain = self.effective_volume(channel_name);
        let now = self.backend.now();
        match self.backend.start_voice(VoiceSpec { buffer: audio.buffer, gain, looping, offset }) {
            Ok(voice) => {
                if let Some(channel) = self.channels.get_mut(channel_name) {
                    channel.playback = Some(Playback {
                        audio: name.to_string(),
                        voice: Some(voice),
                        looping,
                        duration: audio.duration,
                        started_at: now - offset,
                        paused_at: None,
                    });
                }
            }
            Err(e) => tracing::warn!("play_on_channel('{}', '{}') failed: {e:#}", channel_name, name),
        }
    }

    pub fn stop_channel(&mut self, name: &str) {
        if let Some(channel) = self.channels.get_mut(name) {
            if let Some(playback) = channel.playback.take() {
                if let Some(voice) = playback.voice {
                    self.backend.stop_voice(voice);
                }
            }
        }
    }

    pub fn pause_channel(&mut self, name: &str) {
        let now = self.backend.now();
        if let Some(channel) = self.channels.get_mut(name) {
            if let Some(playback) = channel.playback.as_mut() {
                pause_playback(playback, self.backend.as_mut(), now);
            }
        }
    }

    pub fn resume_channel(&mut self, name: &str) {
        if self.status != EngineStatus::Ready {
            return;
        }
        let gain = self.effective_volume(name);
        let now = self.backend.now();
        let buffer = match self
            .channels
            .get(name)
            .and_then(|c| c.playback.as_ref())
            .and_then(|p| self.buffers.get(&p.audio))
        {
            Some(r) => r.buffer,
            None => return,
        };
        if let Some(channel) = self.channels.get_mut(name) {
            if let Some(playback) = channel.playback.as_mut() {
                resume_playback(playback, self.backend.as_mut(), buffer, gain, now);
            }
        }
    }

    pub fn is_channel_playing(&self, name: &str) -> bool {
        match self.channels.get(name).and_then(|c| c.playback.as_ref()) {
            Some(p) => playback_active(p, self.backend.now()),
            None => false,
        }
    }

    pub fn channel_time(&self, name: &str) -> f64 {
        self.channels
            .get(name)
            .and_then(|c| c.playback.as_ref())
            .map(|p| playback_position(p, self.backend.now()))
            .unwrap_or(0.0)
    }

    pub fn channel_duration(&self, name: &str) -> f64 {
        self.channels
            .get(name)
            .and_then(|c| c.playback.as_ref())
            .map(|p| p.duration)
            .unwrap_or(0.0)
    }

    pub fn channel_audio(&self, name: &str) -> Option<String> {
        self.channels
            .get(name)
            .and_then(|c| c.playback.as_ref())
            .map(|p| p.audio.clone())
    }

    /// Linear ramp from the channel's current volume to `target`. The ramp
    /// start time fences the completion check, so a second fade pre-empting
    /// this one wins cleanly.
    pub fn fade_channel_to(&mut self, name: &str, target: f64, duration: f64) {
        let now = self.backend.now();
        let from = match self.channels.get(name) {
            Some(ch) => self.current_channel_volume(ch, now),
            None => {
                tracing::warn!("fade_channel_to: unknown channel '{}'", name);
                return;
            }
        };
        if let Some(channel) = self.channels.get_mut(name) {
            if duration <= 0.0 {
                channel.volume = target.max(0.0);
                channel.fade = None;
            } else {
                channel.fade = Some(Fade { started_at: now, from, to: target.max(0.0), duration });
            }
        }
        self.apply_gains();
    }

    pub fn is_channel_fading(&self, name: &str) -> bool {
        let now = self.backend.now();
        self.channels
            .get(name)
            .and_then(|c| c.fade)
            .map(|f| now < f.started_at + f.duration)
            .unwrap_or(false)
    }

    // --- Per-frame maintenance ---

    /// Called once per frame: settles finished fades and non-looping
    /// playbacks, prunes finished one-shots, and pushes current gains.
    pub fn update(&mut self) {
        if self.status != EngineStatus::Ready {
            return;
        }
        let now = self.backend.now();

        // Settle fades whose wall-clock window elapsed
        for channel in self.channels.values_mut() {
            if let Some(fade) = channel.fade {
                if now >= fade.started_at + fade.duration {
                    channel.volume = fade.to;
                    channel.fade = None;
                }
            }
        }

        // Retire non-looping playbacks that ran to the end
        let names: Vec<String> = self.channels.keys().cloned().collect();
        for name in &names {
            let finished = self
                .channels
                .get(name)
                .and_then(|c| c.playback.as_ref())
                .map(|p| p.paused_at.is_none() && !p.looping && now - p.started_at >= p.duration)
                .unwrap_or(false);
            if finished {
                self.stop_channel(name);
            }
        }
        if let Some(music) = &self.music {
            let p = &music.playback;
            if p.paused_at.is_none() && !p.looping && now - p.started_at >= p.duration {
                self.stop_music();
            }
        }

        // Prune finished one-shots
        let mut finished = Vec::new();
        self.oneshots.retain(|o| {
            if now >= o.ends_at {
                finished.push(o.voice);
                false
            } else {
                true
            }
        });
        for voice in finished {
            self.backend.stop_voice(voice);
        }

        self.apply_gains();
    }

    /// Recompute and push every active voice's flattened gain.
    fn apply_gains(&mut self) {
        if self.status != EngineStatus::Ready {
            return;
        }
        let output = self.output_gain();
        let mut updates: Vec<(VoiceId, f64)> = Vec::new();
        if let Some(music) = &self.music {
            if let Some(voice) = music.playback.voice {
                updates.push((voice, music.volume * output));
            }
        }
        for o in &self.oneshots {
            updates.push((o.voice, o.volume * output));
        }
        let channel_voices: Vec<(String, VoiceId)> = self
            .channels
            .iter()
            .filter_map(|(name, c)| c.playback.as_ref().and_then(|p| p.voice).map(|v| (name.clone(), v)))
            .collect();
        for (name, voice) in channel_voices {
            updates.push((voice, self.effective_volume(&name)));
        }
        for (voice, gain) in updates {
            self.backend.set_voice_gain(voice, gain);
        }
    }

    /// Tear everything down. Safe to call repeatedly and when never
    /// initialized.
    pub fn dispose(&mut self) {
        if self.status == EngineStatus::Disposed {
            return;
        }
        self.stop_music();
        let names: Vec<String> = self.channels.keys().cloned().collect();
        for name in names {
            self.destroy_channel(&name);
        }
        for o in self.oneshots.drain(..) {
            self.backend.stop_voice(o.voice);
        }
        self.buffers.clear();
        self.pending_decodes.clear();
        self.queued_ops.clear();
        self.backend.close();
        self.status = EngineStatus::Disposed;
        tracing::debug!("Audio engine disposed");
    }
}

fn normalize_offset(start_time: f64, duration: f64, looping: bool) -> f64 {
    if duration <= 0.0 || start_time <= 0.0 {
        return 0.0;
    }
    if looping {
        start_time % duration
    } else {
        start_time.min(duration)
    }
}

fn playback_active(p: &Playback, now: f64) -> bool {
    if p.paused_at.is_some() || p.voice.is_none() {
        return false;
    }
    p.looping || now - p.started_at < p.duration
}

fn playback_position(p: &Playback, now: f64) -> f64 {
    if let Some(at) = p.paused_at {
        return at;
    }
    if p.voice.is_none() {
        return 0.0;
    }
    let elapsed = now - p.started_at;
    if p.duration <= 0.0 {
        return 0.0;
    }
    if p.looping {
        elapsed % p.duration
    } else {
        elapsed.min(p.duration)
    }
}

fn pause_playback(p: &mut Playback, backend: &mut dyn AudioBackend, now: f64) {
    if p.paused_at.is_some() {
        return;
    }
    let Some(voice) = p.voice.take() else {
        return;
    };
    let elapsed = now - p.started_at;
    // Looped tracks report position modulo duration
    let at = if p.duration <= 0.0 {
        0.0
    } else if p.looping {
        elapsed % p.duration
    } else {
        elapsed.min(p.duration)
    };
    backend.stop_voice(voice);
    p.paused_at = Some(at);
}

fn resume_playback(
    p: &mut Playback,
    backend: &mut dyn AudioBackend,
    buffer: super::backend::BufferId,
    gain: f64,
    now: f64,
) {
    let Some(at) = p.paused_at else {
        return;
    };
    match backend.start_voice(VoiceSpec { buffer, gain, looping: p.looping, offset: at }) {
        Ok(voice) => {
            p.voice = Some(voice);
            p.started_at = now - at;
            p.paused_at = None;
        }
        Err(e) => tracing::warn!("resume of '{}' failed: {e:#}", p.audio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_normalization() {
        assert_eq!(normalize_offset(2.5, 2.0, true), 0.5);
        assert_eq!(normalize_offset(2.5, 2.0, false), 2.0);
        assert_eq!(normalize_offset(-1.0, 2.0, true), 0.0);
        assert_eq!(normalize_offset(1.0, 0.0, true), 0.0);
    }
}
