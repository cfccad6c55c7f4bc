//! Prompt-to-playback generation.
//!
//! [`GenerationPipeline`] runs one prompt through model acquisition,
//! synthesis and validation, then hands the buffer to a playback target.

pub mod pipeline;

pub use pipeline::GenerationPipeline;
