//! Daemon configuration module.
//!
//! Contains the runtime configuration for lofi-loop: where model artifacts
//! live and come from, which output device to use, and crossfade timing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default crossfade length in seconds.
pub const DEFAULT_CROSSFADE_SECS: f32 = 2.0;

/// Delay after a crossfade ends before the outgoing channel is torn down.
pub const TEARDOWN_MARGIN: Duration = Duration::from_millis(100);

/// Runtime configuration for the daemon.
///
/// Built from defaults, then environment variables, then command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding model artifacts.
    /// If None, uses the platform-specific default cache location.
    pub model_path: Option<PathBuf>,

    /// Base URL that missing model artifacts are downloaded from.
    /// If None, nothing is downloaded and built-in defaults are used.
    pub model_url: Option<String>,

    /// Output device name. If None, the host's default output device.
    pub output_device: Option<String>,

    /// Crossfade length in seconds.
    pub crossfade_secs: f32,

    /// Steps synthesized per request. If None, the model's own default.
    pub max_new_tokens: Option<usize>,
}

impl DaemonConfig {
    /// Creates a new DaemonConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a DaemonConfig from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `LOFI_MODEL_PATH` - Model artifact directory
    /// - `LOFI_MODEL_URL` - Base URL for artifact downloads
    /// - `LOFI_OUTPUT_DEVICE` - Output device name
    /// - `LOFI_CROSSFADE_SECS` - Crossfade length (0.1-30)
    /// - `LOFI_MAX_NEW_TOKENS` - Steps per request (1-4096)
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("LOFI_MODEL_PATH") {
            config.model_path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("LOFI_MODEL_URL").filter(|u| !u.trim().is_empty()) {
            config.model_url = Some(url);
        }

        if let Some(device) = lookup("LOFI_OUTPUT_DEVICE").filter(|d| !d.trim().is_empty()) {
            config.output_device = Some(device);
        }

        if let Some(secs) = lookup("LOFI_CROSSFADE_SECS").and_then(|s| s.parse::<f32>().ok()) {
            if (0.1..=30.0).contains(&secs) {
                config.crossfade_secs = secs;
            }
        }

        if let Some(steps) = lookup("LOFI_MAX_NEW_TOKENS").and_then(|s| s.parse::<usize>().ok()) {
            if (1..=4096).contains(&steps) {
                config.max_new_tokens = Some(steps);
            }
        }

        config
    }

    /// Returns the effective model path, using platform defaults if not specified.
    pub fn effective_model_path(&self) -> PathBuf {
        self.model_path.clone().unwrap_or_else(default_model_path)
    }

    /// Crossfade length as a Duration.
    pub fn crossfade_duration(&self) -> Duration {
        Duration::from_secs_f32(self.crossfade_secs)
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if !self.crossfade_secs.is_finite() || !(0.1..=30.0).contains(&self.crossfade_secs) {
            return Some(format!(
                "crossfade must be between 0.1 and 30 seconds, got {}",
                self.crossfade_secs
            ));
        }

        if let Some(steps) = self.max_new_tokens {
            if steps == 0 || steps > 4096 {
                return Some(format!("max_new_tokens out of range: {} (1-4096)", steps));
            }
        }

        if let Some(ref url) = self.model_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Some(format!("model_url must be http(s): {}", url));
            }
        }

        None
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model_url: None,
            output_device: None,
            crossfade_secs: DEFAULT_CROSSFADE_SECS,
            max_new_tokens: None,
        }
    }
}

/// Returns the platform-specific default model storage path.
///
/// - macOS: ~/Library/Caches/lofi-loop/model
/// - Linux: ~/.cache/lofi-loop/model
/// - Windows: C:\Users\<user>\AppData\Local\lofi-loop\cache\model
fn default_model_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "lofi-loop") {
        proj_dirs.cache_dir().join("model")
    } else {
        PathBuf::from("./model")
    }
}
