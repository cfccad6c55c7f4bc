//! Music model access.
//!
//! - [`backend`]: the [`ModelRuntime`] / [`MusicModel`] capability traits
//! - [`loader`]: single-flight [`ModelLoader`] with staged load progress
//! - [`downloader`]: streaming download of model artifacts
//! - [`procedural`]: the built-in [`ProceduralRuntime`]

pub mod backend;
pub mod downloader;
pub mod loader;
pub mod procedural;

pub use backend::{DownloadProgress, ModelRuntime, MusicModel};
pub use downloader::{ensure_artifacts, Artifact};
pub use loader::ModelLoader;
pub use procedural::{ProceduralModel, ProceduralRuntime};
