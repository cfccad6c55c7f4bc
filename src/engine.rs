//! Top-level wiring: model runtime, loader, pipeline and crossfade playback.

use std::sync::Arc;

use tracing::info;

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::events::EventSink;
use crate::generation::GenerationPipeline;
use crate::models::{ModelLoader, ModelRuntime, ProceduralRuntime};
use crate::playback::{CpalOpener, CrossfadeCoordinator, CrossfadeSettings, DeviceOpener, PlaybackState};
use crate::types::AudioBuffer;

/// The running daemon: turns prompts into a crossfaded loop.
#[derive(Clone)]
pub struct LoopEngine {
    pipeline: GenerationPipeline,
    coordinator: Arc<CrossfadeCoordinator>,
}

impl LoopEngine {
    pub fn new(
        config: &DaemonConfig,
        runtime: Arc<dyn ModelRuntime>,
        opener: Arc<dyn DeviceOpener>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let settings = CrossfadeSettings::with_duration(config.crossfade_duration());
        let coordinator = Arc::new(CrossfadeCoordinator::new(opener, settings));
        let loader = ModelLoader::new(runtime, Arc::clone(&sink));
        let pipeline = GenerationPipeline::new(loader, sink, coordinator.clone())
            .with_max_steps(config.max_new_tokens);
        Self {
            pipeline,
            coordinator,
        }
    }

    /// Procedural model plus the host's audio device.
    pub fn from_config(config: &DaemonConfig, sink: Arc<dyn EventSink>) -> Self {
        info!(
            model_dir = %config.effective_model_path().display(),
            device = config.output_device.as_deref().unwrap_or("default"),
            crossfade_secs = config.crossfade_secs,
            "starting engine"
        );
        Self::new(
            config,
            Arc::new(ProceduralRuntime::from_config(config)),
            Arc::new(CpalOpener::new(config.output_device.clone())),
            sink,
        )
    }

    /// Generates and crossfades to a loop for `prompt`. `None` for an empty prompt.
    pub async fn generate(&self, prompt: &str) -> Option<Result<AudioBuffer>> {
        self.pipeline.generate(prompt).await
    }

    /// Stops every playing channel.
    pub fn stop_audio(&self) {
        self.coordinator.stop_all();
    }

    /// Stops playback and closes the device; later generates fail at playback.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.coordinator.state()
    }

    pub fn model_state(&self) -> &'static str {
        self.pipeline.loader().state_label()
    }
}
