//! One buffer playing through the output device with its own gain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::error::{DaemonError, Result};
use crate::types::AudioBuffer;

use super::graph::VoiceId;
use super::output::{lock_mixer, OutputDevice, SharedMixer};

/// A source voice wired into a device mixer.
///
/// Dropping a channel does not stop it; call [`stop`](Self::stop).
#[derive(Debug)]
pub struct PlaybackChannel {
    mixer: SharedMixer,
    voice: VoiceId,
    sample_rate: u32,
    stopped: AtomicBool,
}

impl PlaybackChannel {
    /// Starts `buffer` on `device` immediately at `initial_gain`.
    ///
    /// The buffer must already be at the device's rate; conversion is the
    /// caller's job, done before any lock is held.
    pub fn start(
        device: &OutputDevice,
        buffer: &AudioBuffer,
        looping: bool,
        initial_gain: f32,
    ) -> Result<Self> {
        if buffer.sample_rate() != device.sample_rate() {
            return Err(DaemonError::Playback(format!(
                "buffer is {} Hz but the device runs at {} Hz",
                buffer.sample_rate(),
                device.sample_rate()
            )));
        }
        let voice = lock_mixer(device.mixer()).add_voice(buffer.shared_samples(), looping, initial_gain);
        debug!(?voice, frames = buffer.len(), looping, initial_gain, "channel started");

        Ok(Self {
            mixer: std::sync::Arc::clone(device.mixer()),
            voice,
            sample_rate: device.sample_rate(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn voice(&self) -> VoiceId {
        self.voice
    }

    /// Stops the source and disconnects it. Later calls do nothing.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        lock_mixer(&self.mixer).remove_voice(self.voice);
        debug!(voice = ?self.voice, "channel stopped");
    }

    /// Sets the gain to `level` now and ramps linearly to `ramp_to` over `over`.
    pub fn set_gain(&self, level: f32, ramp_to: f32, over: Duration) {
        let frames = (over.as_secs_f64() * f64::from(self.sample_rate)).round() as u64;
        lock_mixer(&self.mixer).schedule_gain(self.voice, level, ramp_to, frames);
    }

    /// Gain applied to the next rendered frame; 0 once stopped.
    pub fn gain(&self) -> f32 {
        lock_mixer(&self.mixer).gain(self.voice).unwrap_or(0.0)
    }
}
