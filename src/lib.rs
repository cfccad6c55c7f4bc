//! lofi-loop: turns text prompts into seamlessly looping music.
//!
//! A prompt runs through a [`GenerationPipeline`](generation::GenerationPipeline):
//! the model is loaded once on first use by a shared
//! [`ModelLoader`](models::ModelLoader), audio is synthesized and wrapped in an
//! [`AudioBuffer`](types::AudioBuffer), and playback starts as an endless loop.
//! Each new prompt crossfades into the previous loop through the
//! [`CrossfadeCoordinator`](playback::CrossfadeCoordinator).
//!
//! # Modules
//!
//! - [`types`]: Core data types (AudioBuffer, ModelConfig, progress stages)
//! - [`models`]: Model runtime seam, artifact downloads, single-flight loader
//! - [`generation`]: Prompt to buffer to playback with staged progress
//! - [`playback`]: Device output, looping channels and crossfades
//! - [`rpc`]: JSON-RPC over stdio
//! - [`config`]: Runtime configuration (DaemonConfig)
//! - [`error`]: Error types and codes (DaemonError, ErrorCode)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lofi_loop::{config::DaemonConfig, engine::LoopEngine, events::LogSink};
//!
//! let engine = LoopEngine::from_config(&DaemonConfig::from_env(), Arc::new(LogSink));
//! engine.generate("calm piano").await;
//! engine.generate("upbeat drums").await; // crossfades over two seconds
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod generation;
pub mod models;
pub mod playback;
pub mod rpc;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use config::DaemonConfig;
pub use engine::LoopEngine;
pub use error::{DaemonError, ErrorCode, Result};
pub use events::{DaemonEvent, EventSink, ModelStatus};
pub use generation::GenerationPipeline;
pub use playback::{CrossfadeCoordinator, PlaybackState, PlaybackTarget};
pub use types::{AudioBuffer, ModelConfig};
