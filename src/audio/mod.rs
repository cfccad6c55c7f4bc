//! Audio buffer utilities.
//!
//! WAV rendering and sample-rate conversion for generated buffers.

pub mod resample;
pub mod wav;

pub use resample::resample;
pub use wav::{samples_to_duration, write_wav, WavTarget, CHANNELS};
