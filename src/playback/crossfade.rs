//! Crossfaded hand-off between looping channels.
//!
//! ```text
//!   Idle --start--> SingleActive --start--> Transitioning
//!    ^                   ^                       |
//!    |                   +----ramp complete------+
//!    +------------- stop_all / shutdown ---------+
//! ```
//!
//! A new buffer always becomes the current channel immediately. The channel
//! it replaces becomes outgoing and is torn down by its own timer once the
//! fade has finished. Several transitions may overlap; each owns its timer
//! and never cancels another's.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_CROSSFADE_SECS, TEARDOWN_MARGIN};
use crate::error::{DaemonError, Result};
use crate::types::AudioBuffer;

use super::channel::PlaybackChannel;
use super::output::{DeviceOpener, OutputDevice};
use super::PlaybackTarget;

/// Coordinator state, derived from which channels exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    SingleActive,
    Transitioning,
}

/// Crossfade timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeSettings {
    /// Length of both gain ramps.
    pub duration: Duration,
    /// Extra wait after the ramps before the outgoing channel is stopped.
    pub margin: Duration,
}

impl Default for CrossfadeSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs_f32(DEFAULT_CROSSFADE_SECS),
            margin: TEARDOWN_MARGIN,
        }
    }
}

impl CrossfadeSettings {
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    fn teardown_delay(&self) -> Duration {
        self.duration + self.margin
    }
}

/// Monotonic id of one transition.
pub type TransitionId = u64;

struct Outgoing {
    channel: PlaybackChannel,
    teardown: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    device: Option<OutputDevice>,
    current: Option<PlaybackChannel>,
    outgoing: HashMap<TransitionId, Outgoing>,
    next_transition: TransitionId,
    /// Set by `shutdown`; the device is never reopened afterwards.
    closed: bool,
}

impl Slots {
    fn state(&self) -> PlaybackState {
        match (&self.current, self.outgoing.is_empty()) {
            (None, true) => PlaybackState::Idle,
            (_, false) => PlaybackState::Transitioning,
            (Some(_), true) => PlaybackState::SingleActive,
        }
    }

    /// Stops every channel and cancels pending teardowns. Returns how many were stopped.
    fn stop_channels(&mut self) -> usize {
        let mut stopped = 0;
        if let Some(current) = self.current.take() {
            current.stop();
            stopped += 1;
        }
        for (id, outgoing) in self.outgoing.drain() {
            outgoing.teardown.abort();
            outgoing.channel.stop();
            debug!(transition = id, "outgoing channel stopped early");
            stopped += 1;
        }
        stopped
    }
}

/// Owns the current channel, the outgoing channels, and the output device.
pub struct CrossfadeCoordinator {
    opener: Arc<dyn DeviceOpener>,
    settings: CrossfadeSettings,
    slots: Arc<Mutex<Slots>>,
    /// Serializes device opens without holding `slots` across them.
    opening: Mutex<()>,
}

fn closed_error() -> DaemonError {
    DaemonError::Playback("output closed".to_string())
}

impl CrossfadeCoordinator {
    /// Creates an idle coordinator. No device is open until [`open_output`](Self::open_output).
    pub fn new(opener: Arc<dyn DeviceOpener>, settings: CrossfadeSettings) -> Self {
        Self {
            opener,
            settings,
            slots: Arc::new(Mutex::new(Slots::default())),
            opening: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        lock_slots(&self.slots)
    }

    pub fn settings(&self) -> CrossfadeSettings {
        self.settings
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().state()
    }

    /// Number of channels still fading out.
    pub fn outgoing_count(&self) -> usize {
        self.lock().outgoing.len()
    }

    /// Gain of the current channel, if any.
    pub fn current_gain(&self) -> Option<f32> {
        self.lock().current.as_ref().map(PlaybackChannel::gain)
    }

    /// Opens the output device if it is not open yet and returns its rate.
    ///
    /// Blocks while the host opens the device; call it from a blocking
    /// context. Fails once the coordinator has been shut down.
    pub fn open_output(&self, sample_rate: u32) -> Result<u32> {
        let _opening = self.opening.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let slots = self.lock();
            if slots.closed {
                return Err(closed_error());
            }
            if let Some(device) = &slots.device {
                return Ok(device.sample_rate());
            }
        }

        let device = self.opener.open(sample_rate)?;
        let rate = device.sample_rate();
        let late = {
            let mut slots = self.lock();
            if slots.closed {
                Some(device)
            } else {
                info!(
                    requested = sample_rate,
                    sample_rate = rate,
                    channels = device.channels(),
                    "output device opened"
                );
                slots.device = Some(device);
                None
            }
        };
        // Shut down while the host was opening it.
        if let Some(mut device) = late {
            device.close();
            return Err(closed_error());
        }
        Ok(rate)
    }

    /// Starts looping `buffer`, crossfading from whatever is playing.
    ///
    /// The device must be open and `buffer` must be at its rate. Must be
    /// called from within a tokio runtime when something is already playing,
    /// since the outgoing teardown runs as a task.
    pub fn start(&self, buffer: &AudioBuffer) -> Result<()> {
        let mut guard = self.lock();
        let slots = &mut *guard;

        if slots.closed {
            return Err(closed_error());
        }
        let device = slots
            .device
            .as_ref()
            .ok_or_else(|| DaemonError::Playback("output device not open".to_string()))?;

        let Some(previous) = slots.current.take() else {
            let channel = PlaybackChannel::start(device, buffer, true, 1.0)?;
            info!(voice = ?channel.voice(), secs = buffer.duration_sec(), "playback started");
            slots.current = Some(channel);
            return Ok(());
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                slots.current = Some(previous);
                return Err(DaemonError::Playback(format!("no runtime for crossfade: {}", e)));
            }
        };

        let incoming = match PlaybackChannel::start(device, buffer, true, 0.0) {
            Ok(channel) => channel,
            Err(e) => {
                slots.current = Some(previous);
                return Err(e);
            }
        };

        let duration = self.settings.duration;
        incoming.set_gain(0.0, 1.0, duration);
        // Ramp down from wherever an interrupted fade-in left it.
        previous.set_gain(previous.gain(), 0.0, duration);

        let id = slots.next_transition;
        slots.next_transition += 1;
        let deadline = Instant::now() + self.settings.teardown_delay();
        let teardown = runtime.spawn(teardown_at(Arc::downgrade(&self.slots), id, deadline));

        info!(
            transition = id,
            incoming = ?incoming.voice(),
            outgoing = ?previous.voice(),
            fade_ms = duration.as_millis() as u64,
            "crossfade started"
        );
        slots.outgoing.insert(
            id,
            Outgoing {
                channel: previous,
                teardown,
            },
        );
        slots.current = Some(incoming);
        Ok(())
    }

    /// Stops every channel immediately and returns to `Idle`. The device stays open.
    pub fn stop_all(&self) {
        let stopped = self.lock().stop_channels();
        if stopped > 0 {
            info!(channels = stopped, "playback stopped");
        }
    }

    /// Stops everything and closes the output device for good. Safe when idle
    /// and when repeated; later `start` and `open_output` calls fail.
    pub fn shutdown(&self) {
        let device = {
            let mut slots = self.lock();
            slots.closed = true;
            slots.stop_channels();
            slots.device.take()
        };
        if let Some(mut device) = device {
            device.close();
            info!("playback shut down");
        }
    }
}

impl Drop for CrossfadeCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PlaybackTarget for CrossfadeCoordinator {
    fn prepare(&self, sample_rate: u32) -> Result<u32> {
        self.open_output(sample_rate)
    }

    fn play(&self, buffer: &AudioBuffer) -> Result<()> {
        self.start(buffer)
    }

    fn stop(&self) {
        self.stop_all();
    }
}

fn lock_slots(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases transition `id`'s outgoing channel at `deadline`.
///
/// The deadline is fixed when the transition starts, not when this task is
/// first polled.
async fn teardown_at(slots: Weak<Mutex<Slots>>, id: TransitionId, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;

    let Some(slots) = slots.upgrade() else {
        return;
    };
    let outgoing = lock_slots(&slots).outgoing.remove(&id);
    match outgoing {
        Some(outgoing) => {
            outgoing.channel.stop();
            debug!(transition = id, "crossfade complete, outgoing channel released");
        }
        None => warn!(transition = id, "outgoing channel already released"),
    }
}
