//! Looping playback with crossfaded hand-off.
//!
//! - [`graph`]: voices with schedulable gain and the mixer that sums them
//! - [`output`]: the device that pulls frames from a mixer (cpal or offline)
//! - [`channel`]: one looping buffer wired into a device
//! - [`crossfade`]: the coordinator that swaps channels without clicks

pub mod channel;
pub mod crossfade;
pub mod graph;
pub mod output;

pub use channel::PlaybackChannel;
pub use crossfade::{CrossfadeCoordinator, CrossfadeSettings, PlaybackState};
pub use output::{CpalOpener, DeviceOpener, OfflineOpener, OutputDevice};

use crate::error::Result;
use crate::types::AudioBuffer;

/// Where a finished buffer goes.
pub trait PlaybackTarget: Send + Sync {
    /// Readies the target for audio generated at `sample_rate` and returns
    /// the rate buffers passed to [`play`](Self::play) must have.
    ///
    /// May block (opening hardware), so call it off the async control path.
    fn prepare(&self, sample_rate: u32) -> Result<u32> {
        Ok(sample_rate)
    }

    /// Starts playing `buffer`. An error leaves whatever was playing untouched.
    fn play(&self, buffer: &AudioBuffer) -> Result<()>;

    /// Stops all playback. Redundant calls succeed.
    fn stop(&self);
}
