//! GenerationRequest type for user-triggered prompts.
//!
//! A request is created per user action. Its id only correlates log lines;
//! two overlapping requests carry no ordering guarantee.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum prompt length in characters.
pub const MAX_PROMPT_CHARS: usize = 1000;

/// A prompt submitted for generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// 16 hex characters derived from prompt and submission time.
    pub request_id: String,

    /// Text description of the desired music (non-empty, trimmed).
    pub prompt: String,

    /// When the request was created.
    #[serde(with = "system_time_serde")]
    pub requested_at: SystemTime,
}

impl GenerationRequest {
    /// Creates a request for `prompt`.
    ///
    /// Returns `None` for an empty or whitespace-only prompt; such input is
    /// ignored rather than reported.
    pub fn new(prompt: &str) -> Option<Self> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return None;
        }

        let requested_at = SystemTime::now();
        Some(Self {
            request_id: compute_request_id(prompt, requested_at),
            prompt: prompt.to_string(),
            requested_at,
        })
    }
}

/// Computes a request ID from the prompt and submission time.
///
/// The ID is the first 16 hex characters of the SHA256 hash of
/// `{prompt}:{unix_nanos}`.
pub fn compute_request_id(prompt: &str, requested_at: SystemTime) -> String {
    let nanos = requested_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let input = format!("{}:{}", prompt, nanos);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Derives a deterministic 64-bit seed from a prompt.
///
/// Identical prompts always produce the same seed, so regenerating a prompt
/// reproduces the same loop.
pub fn prompt_seed(prompt: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(prompt.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Serializes SystemTime as a Unix timestamp in seconds.
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}
