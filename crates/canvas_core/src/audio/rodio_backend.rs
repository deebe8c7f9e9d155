//! rodio-backed implementation of the audio seam.
//!
//! One sink per voice; voices are one-shot by contract, so `stop_voice`
//! drops the sink. Buffers hold the original encoded bytes and are decoded
//! per voice start, which is what lets offsets and looping compose.

use super::backend::{AudioBackend, BufferId, DecodedBuffer, VoiceId, VoiceSpec};
use anyhow::{Context, Result};
use rodio::source::Source;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RodioBackend {
    // The stream must stay alive for any sink to produce sound
    stream: Option<(OutputStream, OutputStreamHandle)>,
    buffers: HashMap<BufferId, Arc<[u8]>>,
    voices: HashMap<VoiceId, Sink>,
    next_buffer: BufferId,
    next_voice: VoiceId,
    epoch: Instant,
}

impl RodioBackend {
    pub fn new() -> Self {
        Self {
            stream: None,
            buffers: HashMap::new(),
            voices: HashMap::new(),
            next_buffer: 1,
            next_voice: 1,
            epoch: Instant::now(),
        }
    }

    fn handle(&self) -> Result<&OutputStreamHandle> {
        self.stream
            .as_ref()
            .map(|(_, h)| h)
            .context("audio backend not activated")
    }
}

impl Default for RodioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for RodioBackend {
    fn activate(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let (stream, handle) = OutputStream::try_default().context("no audio output device")?;
        self.stream = Some((stream, handle));
        tracing::info!("Audio output stream opened");
        Ok(())
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedBuffer> {
        let data: Arc<[u8]> = Arc::from(bytes);
        let decoder = Decoder::new(Cursor::new(data.clone())).context("unsupported audio format")?;
        let duration = match decoder.total_duration() {
            Some(d) => d.as_secs_f64(),
            None => {
                // Duration unknown up front (e.g. some vorbis streams):
                // measure by draining one decode pass.
                let probe = Decoder::new(Cursor::new(data.clone()))?;
                let rate = probe.sample_rate() as f64;
                let channels = probe.channels() as f64;
                let samples = probe.count() as f64;
                if rate > 0.0 && channels > 0.0 {
                    samples / (rate * channels)
                } else {
                    0.0
                }
            }
        };
        let id = self.next_buffer;
        self.next_buffer += 1;
        self.buffers.insert(id, data);
        Ok(DecodedBuffer { id, duration })
    }

    fn start_voice(&mut self, spec: VoiceSpec) -> Result<VoiceId> {
        let handle = self.handle()?;
        let data = self
            .buffers
            .get(&spec.buffer)
            .with_context(|| format!("unknown audio buffer {}", spec.buffer))?
            .clone();
        let sink = Sink::try_new(handle).context("failed to create audio sink")?;
        sink.set_volume(spec.gain as f32);
        let decoder = Decoder::new(Cursor::new(data))?;
        let offset = Duration::from_secs_f64(spec.offset.max(0.0));
        if spec.looping {
            sink.append(decoder.repeat_infinite().skip_duration(offset));
        } else {
            sink.append(decoder.skip_duration(offset));
        }
        let id = self.next_voice;
        self.next_voice += 1;
        self.voices.insert(id, sink);
        Ok(id)
    }

    fn stop_voice(&mut self, voice: VoiceId) {
        if let Some(sink) = self.voices.remove(&voice) {
            sink.stop();
        }
    }

    fn set_voice_gain(&mut self, voice: VoiceId, gain: f64) {
        if let Some(sink) = self.voices.get(&voice) {
            sink.set_volume(gain as f32);
        }
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn close(&mut self) {
        for (_, sink) in self.voices.drain() {
            sink.stop();
        }
        self.buffers.clear();
        self.stream = None;
    }
}
