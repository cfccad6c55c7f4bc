//! Device-side output graph: looping voices with scheduled gain, summed by a mixer.
//!
//! All timing is in device frames counted by the mixer clock, so gain ramps
//! follow the audio actually rendered rather than wall time.

use std::collections::HashMap;
use std::sync::Arc;

/// Identifies one voice in a [`Mixer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(u64);

/// A linear ramp between two gain levels over a frame range.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GainRamp {
    from: f32,
    to: f32,
    start_frame: u64,
    end_frame: u64,
}

/// A gain value that can follow a scheduled linear ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainParam {
    level: f32,
    ramp: Option<GainRamp>,
}

impl GainParam {
    pub fn new(level: f32) -> Self {
        Self { level, ramp: None }
    }

    /// Sets `level` now, cancelling any scheduled ramp.
    pub fn set_value(&mut self, level: f32) {
        self.level = level;
        self.ramp = None;
    }

    /// Sets `from` at `start_frame` and ramps linearly to `to` over `frames`.
    pub fn linear_ramp(&mut self, from: f32, to: f32, start_frame: u64, frames: u64) {
        if frames == 0 {
            self.set_value(to);
            return;
        }
        self.level = to;
        self.ramp = Some(GainRamp {
            from,
            to,
            start_frame,
            end_frame: start_frame + frames,
        });
    }

    /// Gain at device frame `frame`.
    pub fn value_at(&self, frame: u64) -> f32 {
        match self.ramp {
            Some(r) if frame <= r.start_frame => r.from,
            Some(r) if frame < r.end_frame => {
                let t = (frame - r.start_frame) as f32 / (r.end_frame - r.start_frame) as f32;
                r.from + (r.to - r.from) * t
            }
            _ => self.level,
        }
    }
}

/// One buffer source feeding the mixer.
#[derive(Debug)]
struct Voice {
    samples: Arc<[f32]>,
    looping: bool,
    cursor: usize,
    gain: GainParam,
}

impl Voice {
    fn next_sample(&mut self, frame: u64) -> f32 {
        if self.cursor >= self.samples.len() {
            if !self.looping || self.samples.is_empty() {
                return 0.0;
            }
            self.cursor = 0;
        }
        let sample = self.samples[self.cursor] * self.gain.value_at(frame);
        self.cursor += 1;
        sample
    }
}

/// Sums active voices into interleaved device frames.
#[derive(Debug, Default)]
pub struct Mixer {
    clock: u64,
    next_id: u64,
    voices: HashMap<VoiceId, Voice>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Adds a voice that starts at the next rendered frame.
    pub fn add_voice(&mut self, samples: Arc<[f32]>, looping: bool, gain: f32) -> VoiceId {
        let id = VoiceId(self.next_id);
        self.next_id += 1;
        self.voices.insert(
            id,
            Voice {
                samples,
                looping,
                cursor: 0,
                gain: GainParam::new(gain),
            },
        );
        id
    }

    /// Removes a voice. Returns false if it was already gone.
    pub fn remove_voice(&mut self, id: VoiceId) -> bool {
        self.voices.remove(&id).is_some()
    }

    /// Sets a voice's gain to `level` now and ramps to `ramp_to` over `frames`.
    pub fn schedule_gain(&mut self, id: VoiceId, level: f32, ramp_to: f32, frames: u64) -> bool {
        let clock = self.clock;
        match self.voices.get_mut(&id) {
            Some(voice) => {
                voice.gain.linear_ramp(level, ramp_to, clock, frames);
                true
            }
            None => false,
        }
    }

    /// Gain a voice would apply to the next frame.
    pub fn gain(&self, id: VoiceId) -> Option<f32> {
        self.voices.get(&id).map(|v| v.gain.value_at(self.clock))
    }

    /// Renders `out.len() / channels` frames, writing the mono mix to every channel.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let clock = self.clock;
            let mix: f32 = self.voices.values_mut().map(|v| v.next_sample(clock)).sum();
            frame.fill(mix.clamp(-1.0, 1.0));
            self.clock += 1;
        }
    }
}
