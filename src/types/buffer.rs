//! AudioBuffer: a complete, immutable block of generated audio.

use std::sync::Arc;

use crate::error::{DaemonError, Result};

/// Mono floating-point samples at a fixed sample rate.
///
/// Samples are held behind an `Arc<[f32]>` so a playback voice can read them
/// from the audio thread without copying.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Builds a buffer from raw model output.
    ///
    /// Fails with `EmptyResult` when there are no samples and with a
    /// synthesis error when the rate is zero or the samples contain
    /// non-finite values.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(DaemonError::EmptyResult);
        }

        if sample_rate == 0 {
            return Err(DaemonError::Synthesis("sample rate must be positive".to_string()));
        }

        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(DaemonError::Synthesis(format!(
                "non-finite sample at index {}",
                index
            )));
        }

        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    /// Returns the samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Returns a shared handle to the samples.
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    /// Returns the sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples (frames, since buffers are mono).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false for a constructed buffer; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the buffer in seconds.
    pub fn duration_sec(&self) -> f32 {
        crate::audio::samples_to_duration(self.samples.len(), self.sample_rate)
    }
}
