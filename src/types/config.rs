//! ModelConfig type for music model parameters.
//!
//! Read from the model directory's `config.json` when present. The sample
//! rate recorded here is authoritative: buffers are constructed and played
//! at exactly this rate.

use serde::{Deserialize, Serialize};

/// Configuration parameters reported by a loaded music model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier for logs and status events.
    /// Example: "lofi-procedural-v1"
    pub model_version: String,

    /// Output sample rate in Hz.
    pub sample_rate: u32,

    /// Number of output channels (1 for mono).
    pub audio_channels: u16,

    /// Generation steps per second of audio.
    pub steps_per_second: u32,

    /// Default number of steps to synthesize per request.
    pub max_new_tokens: usize,
}

impl ModelConfig {
    /// Creates the configuration used when the model directory has none.
    ///
    /// 32kHz mono, 50 steps per second, 512 steps (about 10 seconds).
    pub fn procedural_default() -> Self {
        Self {
            model_version: "lofi-procedural-v1".to_string(),
            sample_rate: 32000,
            audio_channels: 1,
            steps_per_second: 50,
            max_new_tokens: 512,
        }
    }

    /// Validates the configuration for consistency.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if self.sample_rate == 0 {
            return Some("sample_rate must be > 0".to_string());
        }

        if self.audio_channels != 1 {
            return Some(format!(
                "audio_channels must be 1, got {}",
                self.audio_channels
            ));
        }

        if self.steps_per_second == 0 {
            return Some("steps_per_second must be > 0".to_string());
        }

        if self.sample_rate % self.steps_per_second != 0 {
            return Some(format!(
                "sample_rate ({}) must be a multiple of steps_per_second ({})",
                self.sample_rate, self.steps_per_second
            ));
        }

        if self.max_new_tokens == 0 {
            return Some("max_new_tokens must be > 0".to_string());
        }

        None
    }

    /// Number of samples rendered per generation step.
    pub fn samples_per_step(&self) -> usize {
        (self.sample_rate / self.steps_per_second) as usize
    }

    /// Length of audio in seconds produced by `steps` steps.
    pub fn steps_to_seconds(&self, steps: usize) -> f32 {
        steps as f32 / self.steps_per_second as f32
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::procedural_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedural_default_config() {
        let config = ModelConfig::procedural_default();
        assert_eq!(config.sample_rate, 32000);
        assert_eq!(config.max_new_tokens, 512);
        assert_eq!(config.samples_per_step(), 640);
        assert!(config.validate().is_none());
    }

    #[test]
    fn config_validation() {
        let mut config = ModelConfig::procedural_default();
        config.steps_per_second = 33; // 32000 is not a multiple of 33
        assert!(config.validate().is_some());

        let mut config = ModelConfig::procedural_default();
        config.audio_channels = 2;
        assert!(config.validate().is_some());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ModelConfig = serde_json::from_str(r#"{ "sample_rate": 48000 }"#).unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.steps_per_second, 50);
        assert_eq!(config.model_version, "lofi-procedural-v1");
    }

    #[test]
    fn steps_to_seconds_calculation() {
        let config = ModelConfig::procedural_default();
        assert_eq!(config.steps_to_seconds(500), 10.0);
    }
}
