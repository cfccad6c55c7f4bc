//! Core types for lofi-loop.
//!
//! - [`AudioBuffer`]: a complete block of generated audio
//! - [`GenerationRequest`]: a user-triggered prompt
//! - [`ModelConfig`]: parameters reported by the loaded model
//! - [`Stage`], [`ProgressEvent`], [`ProgressReporter`]: staged progress

mod buffer;
mod config;
mod progress;
mod request;

pub use buffer::AudioBuffer;
pub use config::ModelConfig;
pub use progress::{ProgressEvent, ProgressReporter, Stage};
pub use request::{compute_request_id, prompt_seed, GenerationRequest, MAX_PROMPT_CHARS};
