//! Capability traits for music generation backends.
//!
//! The daemon never looks inside a model. It loads one through a
//! [`ModelRuntime`] and drives it through the [`MusicModel`] it returns.
//! Both calls are blocking and run on the blocking thread pool.

use std::sync::Arc;

use crate::error::Result;
use crate::types::ModelConfig;

/// Byte-level progress reported while a runtime fetches its artifacts.
///
/// Callbacks may arrive zero or many times and byte counts are not
/// guaranteed to be monotonic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes received so far for `file_label`.
    pub loaded_bytes: u64,
    /// Total size if the source reported one.
    pub total_bytes: Option<u64>,
    /// Name of the artifact being fetched.
    pub file_label: String,
}

impl DownloadProgress {
    /// Completed fraction, if the total size is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some(self.loaded_bytes as f64 / total as f64),
            _ => None,
        }
    }
}

/// A loaded, ready-to-use generation capability.
pub trait MusicModel: Send + Sync {
    /// Configuration reported by the model, including its output sample rate.
    fn config(&self) -> &ModelConfig;

    /// Model version string.
    fn version(&self) -> &str {
        &self.config().model_version
    }

    /// Synthesizes mono samples at `config().sample_rate` for `prompt`.
    ///
    /// `on_step` receives the number of completed steps after each step.
    fn synthesize(&self, prompt: &str, max_steps: usize, on_step: &dyn Fn(usize))
        -> Result<Vec<f32>>;
}

/// Produces a [`MusicModel`], fetching whatever it needs first.
pub trait ModelRuntime: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Loads the model. May download artifacts, reporting through `on_progress`.
    fn load(&self, on_progress: &dyn Fn(DownloadProgress)) -> Result<Arc<dyn MusicModel>>;
}
