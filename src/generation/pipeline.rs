//! End-to-end prompt to playing loop.
//!
//! One `generate` call acquires the model, synthesizes, validates the
//! samples into an [`AudioBuffer`] and hands it to the playback target,
//! reporting progress on the shared 0-100 scale:
//!
//! | Range  | Stage                                  |
//! |--------|----------------------------------------|
//! | 0-70   | model load (skipped once loaded)       |
//! | 70-95  | synthesis, by completed steps          |
//! | 95-98  | validation, output open, rate convert  |
//! | 98-100 | playback hand-off                      |
//!
//! Any failure ends the run with one `generation-progress {0, "Error: ..."}`
//! and leaves whatever was playing untouched.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::audio::resample;
use crate::error::{DaemonError, Result};
use crate::events::{DaemonEvent, EventSink};
use crate::models::{ModelLoader, MusicModel};
use crate::playback::PlaybackTarget;
use crate::types::{AudioBuffer, GenerationRequest, ProgressReporter, Stage, MAX_PROMPT_CHARS};

/// Drives prompts through load, synthesis and playback.
///
/// Cheap to clone; clones share the loader, sink and target.
#[derive(Clone)]
pub struct GenerationPipeline {
    loader: ModelLoader,
    sink: Arc<dyn EventSink>,
    target: Arc<dyn PlaybackTarget>,
    max_steps: Option<usize>,
}

impl GenerationPipeline {
    pub fn new(
        loader: ModelLoader,
        sink: Arc<dyn EventSink>,
        target: Arc<dyn PlaybackTarget>,
    ) -> Self {
        Self {
            loader,
            sink,
            target,
            max_steps: None,
        }
    }

    /// Overrides the model's default step count.
    pub fn with_max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn loader(&self) -> &ModelLoader {
        &self.loader
    }

    pub fn target(&self) -> &Arc<dyn PlaybackTarget> {
        &self.target
    }

    /// Generates and plays a loop for `prompt`.
    ///
    /// Returns `None` without emitting anything when the prompt is empty or
    /// whitespace. Otherwise returns the outcome after the terminal event.
    pub async fn generate(&self, prompt: &str) -> Option<Result<AudioBuffer>> {
        let request = GenerationRequest::new(prompt)?;
        let reporter = ProgressReporter::new(Arc::clone(&self.sink));
        info!(request_id = %request.request_id, prompt = %request.prompt, "generation requested");

        let outcome = match request.prompt.chars().count() {
            len if len > MAX_PROMPT_CHARS => Err(DaemonError::prompt_too_long(len)),
            _ => self.run(&request, &reporter).await,
        };

        match &outcome {
            Ok(buffer) => {
                self.sink.emit(DaemonEvent::complete());
                info!(
                    request_id = %request.request_id,
                    secs = buffer.duration_sec(),
                    sample_rate = buffer.sample_rate(),
                    "generation complete"
                );
            }
            Err(e) => {
                error!(request_id = %request.request_id, code = %e.code(), error = %e, "generation failed");
                reporter.fail(e.progress_label());
            }
        }
        Some(outcome)
    }

    async fn run(&self, request: &GenerationRequest, reporter: &ProgressReporter) -> Result<AudioBuffer> {
        let model = self.loader.ensure_loaded().await?;
        let config = model.config().clone();
        let steps = self.max_steps.unwrap_or(config.max_new_tokens);
        debug!(request_id = %request.request_id, steps, "synthesizing");

        reporter.report(Stage::Synthesis, 70, "Generating audio...");
        let samples = synthesize(model, request.prompt.clone(), steps, reporter.clone()).await?;

        reporter.report(Stage::PostProcess, 95, "Processing audio...");
        let (buffer, playable) =
            post_process(Arc::clone(&self.target), samples, config.sample_rate).await?;

        reporter.report(Stage::Playback, 98, "Starting playback...");
        self.target.play(&playable)?;
        reporter.report(Stage::Playback, 100, "Playing");
        Ok(buffer)
    }
}

/// Validates the samples, readies the target and converts to its rate.
///
/// Returns the buffer at the model's rate and the one to play. Runs on the
/// blocking pool since both the device open and the resample can take a while.
async fn post_process(
    target: Arc<dyn PlaybackTarget>,
    samples: Vec<f32>,
    sample_rate: u32,
) -> Result<(AudioBuffer, AudioBuffer)> {
    let joined = tokio::task::spawn_blocking(move || {
        let buffer = AudioBuffer::from_samples(samples, sample_rate)?;
        let output_rate = target.prepare(sample_rate)?;
        let playable = resample(&buffer, output_rate)?;
        Ok((buffer, playable))
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => Err(DaemonError::Playback(format!("post-processing task failed: {}", e))),
    }
}

/// Runs synthesis on the blocking pool, mapping step counts into 70-95.
async fn synthesize(
    model: Arc<dyn MusicModel>,
    prompt: String,
    steps: usize,
    reporter: ProgressReporter,
) -> Result<Vec<f32>> {
    let joined = tokio::task::spawn_blocking(move || {
        let on_step = |done: usize| {
            if steps == 0 {
                return;
            }
            let percent = Stage::Synthesis.percent_at(done as f64 / steps as f64);
            if percent > reporter.current() {
                reporter.report(
                    Stage::Synthesis,
                    percent,
                    format!("Generating audio... ({}/{})", done.min(steps), steps),
                );
            }
        };
        model.synthesize(&prompt, steps, &on_step)
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => Err(DaemonError::Synthesis(format!("synthesis task failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ModelStatus, RecordingSink};
    use crate::models::{DownloadProgress, ModelRuntime};
    use crate::types::ModelConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Emits `output` for every prompt, stepping once per requested step.
    struct ScriptedModel {
        config: ModelConfig,
        output: std::result::Result<Vec<f32>, DaemonError>,
    }

    impl MusicModel for ScriptedModel {
        fn config(&self) -> &ModelConfig {
            &self.config
        }

        fn synthesize(&self, _: &str, max_steps: usize, on_step: &dyn Fn(usize)) -> Result<Vec<f32>> {
            for step in 1..=max_steps {
                on_step(step);
            }
            // Noisy callbacks past the end must not escape the stage.
            on_step(max_steps * 3);
            self.output.clone()
        }
    }

    struct ScriptedRuntime {
        loads: AtomicUsize,
        fail_first: bool,
        output: std::result::Result<Vec<f32>, DaemonError>,
        sample_rate: u32,
    }

    impl ScriptedRuntime {
        fn new(output: std::result::Result<Vec<f32>, DaemonError>) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_first: false,
                output,
                sample_rate: 32000,
            }
        }
    }

    impl ModelRuntime for ScriptedRuntime {
        fn name(&self) -> &str {
            "scripted"
        }

        fn load(&self, on_progress: &dyn Fn(DownloadProgress)) -> Result<Arc<dyn MusicModel>> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            on_progress(DownloadProgress {
                loaded_bytes: 1,
                total_bytes: Some(2),
                file_label: "weights".into(),
            });
            if self.fail_first && n == 0 {
                return Err(DaemonError::ModelLoad("runtime unavailable".into()));
            }
            let mut config = ModelConfig::procedural_default();
            config.sample_rate = self.sample_rate;
            config.max_new_tokens = 10;
            Ok(Arc::new(ScriptedModel {
                config,
                output: self.output.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingTarget {
        played: Mutex<Vec<AudioBuffer>>,
        prepared: Mutex<Vec<u32>>,
        /// Rate reported by `prepare`; None echoes the request.
        output_rate: Option<u32>,
        fail_prepare: bool,
        fail: bool,
    }

    impl RecordingTarget {
        fn played(&self) -> Vec<AudioBuffer> {
            self.played.lock().unwrap().clone()
        }

        fn prepared(&self) -> Vec<u32> {
            self.prepared.lock().unwrap().clone()
        }
    }

    impl PlaybackTarget for RecordingTarget {
        fn prepare(&self, sample_rate: u32) -> Result<u32> {
            if self.fail_prepare {
                return Err(DaemonError::Playback("no output device".into()));
            }
            self.prepared.lock().unwrap().push(sample_rate);
            Ok(self.output_rate.unwrap_or(sample_rate))
        }

        fn play(&self, buffer: &AudioBuffer) -> Result<()> {
            if self.fail {
                return Err(DaemonError::Playback("device unplugged".into()));
            }
            self.played.lock().unwrap().push(buffer.clone());
            Ok(())
        }

        fn stop(&self) {}
    }

    struct Harness {
        pipeline: GenerationPipeline,
        sink: Arc<RecordingSink>,
        target: Arc<RecordingTarget>,
        runtime: Arc<ScriptedRuntime>,
    }

    fn harness(runtime: ScriptedRuntime, target: RecordingTarget) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let runtime = Arc::new(runtime);
        let target = Arc::new(target);
        let loader = ModelLoader::new(runtime.clone(), sink.clone());
        Harness {
            pipeline: GenerationPipeline::new(loader, sink.clone(), target.clone()),
            sink,
            target,
            runtime,
        }
    }

    fn assert_non_decreasing(values: &[u8]) {
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
    }

    #[tokio::test]
    async fn empty_prompt_is_ignored_silently() {
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), RecordingTarget::default());
        assert!(h.pipeline.generate("").await.is_none());
        assert!(h.pipeline.generate("   \n\t").await.is_none());
        assert!(h.sink.is_empty());
        assert_eq!(h.runtime.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_run_reaches_100_then_completes() {
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), RecordingTarget::default());
        let buffer = h.pipeline.generate("calm piano").await.unwrap().unwrap();
        assert_eq!(buffer.sample_rate(), 32000);

        let values = h.sink.progress_values();
        assert_non_decreasing(&values);
        assert_eq!(values.last(), Some(&100));
        assert!(values.contains(&95) && values.contains(&98));
        assert_eq!(h.sink.names().last(), Some(&"generation-complete"));
        assert_eq!(h.target.played().len(), 1);
    }

    #[tokio::test]
    async fn second_run_skips_load_progress() {
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), RecordingTarget::default());
        h.pipeline.generate("calm piano").await.unwrap().unwrap();
        let first_len = h.sink.events().len();

        h.pipeline.generate("upbeat drums").await.unwrap().unwrap();
        let events = h.sink.events();
        let later: Vec<_> = events[first_len..].to_vec();
        assert!(later.iter().all(|e| !matches!(e, DaemonEvent::ModelStatus(_))));

        let values: Vec<u8> = later
            .iter()
            .filter_map(|e| match e {
                DaemonEvent::GenerationProgress(p) => Some(p.progress),
                _ => None,
            })
            .collect();
        assert_eq!(values.first(), Some(&70));
        assert_non_decreasing(&values);
        assert_eq!(h.runtime.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_samples_fail_as_empty_result() {
        let h = harness(ScriptedRuntime::new(Ok(Vec::new())), RecordingTarget::default());
        let err = h.pipeline.generate("silence").await.unwrap().unwrap_err();
        assert_eq!(err, DaemonError::EmptyResult);
        assert!(!err.is_load_failure());

        let last = h.sink.events().pop().unwrap();
        assert_eq!(last, DaemonEvent::progress(0, "Error: No audio data generated"));
        assert!(!h.sink.names().contains(&"generation-complete"));
        assert!(h.target.played().is_empty());
    }

    #[tokio::test]
    async fn synthesis_error_is_reported_once() {
        let h = harness(
            ScriptedRuntime::new(Err(DaemonError::Synthesis("decoder exploded".into()))),
            RecordingTarget::default(),
        );
        let err = h.pipeline.generate("calm piano").await.unwrap().unwrap_err();
        assert!(matches!(err, DaemonError::Synthesis(_)));

        let values = h.sink.progress_values();
        assert_eq!(values.iter().filter(|v| **v == 0).count(), 1);
        assert_eq!(values.last(), Some(&0));
    }

    #[tokio::test]
    async fn load_failure_then_retry_succeeds() {
        let mut runtime = ScriptedRuntime::new(Ok(vec![0.1; 64]));
        runtime.fail_first = true;
        let h = harness(runtime, RecordingTarget::default());

        let err = h.pipeline.generate("calm piano").await.unwrap().unwrap_err();
        assert!(err.is_load_failure());
        assert_eq!(h.sink.progress_values().last(), Some(&0));

        assert!(h.pipeline.generate("calm piano").await.unwrap().is_ok());
        assert_eq!(h.runtime.loads.load(Ordering::SeqCst), 2);
        assert_eq!(h.target.played().len(), 1);
    }

    #[tokio::test]
    async fn playback_failure_is_terminal() {
        let target = RecordingTarget {
            fail: true,
            ..Default::default()
        };
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), target);
        let err = h.pipeline.generate("calm piano").await.unwrap().unwrap_err();
        assert!(matches!(err, DaemonError::Playback(_)));
        assert_eq!(h.sink.progress_values().last(), Some(&0));
    }

    #[tokio::test]
    async fn overlong_prompt_is_rejected() {
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), RecordingTarget::default());
        let prompt = "a".repeat(MAX_PROMPT_CHARS + 1);
        let err = h.pipeline.generate(&prompt).await.unwrap().unwrap_err();
        assert!(matches!(err, DaemonError::InvalidPrompt(_)));
        assert_eq!(h.runtime.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_runs_share_one_load() {
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), RecordingTarget::default());
        let (a, b) = tokio::join!(h.pipeline.generate("calm piano"), h.pipeline.generate("upbeat drums"));
        assert!(a.unwrap().is_ok());
        assert!(b.unwrap().is_ok());
        assert_eq!(h.runtime.loads.load(Ordering::SeqCst), 1);
        assert_eq!(h.target.played().len(), 2);

        let ready = h
            .sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, DaemonEvent::ModelStatus(p) if p.status == ModelStatus::Ready))
            .count();
        assert_eq!(ready, 1);
    }

    #[tokio::test]
    async fn model_sample_rate_is_used_verbatim() {
        let mut runtime = ScriptedRuntime::new(Ok(vec![0.1; 64]));
        runtime.sample_rate = 44100;
        let h = harness(runtime, RecordingTarget::default());
        let buffer = h.pipeline.generate("calm piano").await.unwrap().unwrap();
        assert_eq!(buffer.sample_rate(), 44100);
    }

    #[tokio::test]
    async fn played_buffer_is_converted_to_the_output_rate() {
        let target = RecordingTarget {
            output_rate: Some(48000),
            ..Default::default()
        };
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), target);
        let buffer = h.pipeline.generate("calm piano").await.unwrap().unwrap();
        assert_eq!(buffer.sample_rate(), 32000);
        assert_eq!(buffer.len(), 64);

        assert_eq!(h.target.prepared(), vec![32000]);
        let played = h.target.played();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].sample_rate(), 48000);
        assert_eq!(played[0].len(), 96);
    }

    #[tokio::test]
    async fn output_failure_is_terminal_before_playback() {
        let target = RecordingTarget {
            fail_prepare: true,
            ..Default::default()
        };
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), target);
        let err = h.pipeline.generate("calm piano").await.unwrap().unwrap_err();
        assert!(matches!(err, DaemonError::Playback(_)));
        assert!(h.target.played().is_empty());

        let values = h.sink.progress_values();
        assert!(!values.contains(&98));
        assert_eq!(values.last(), Some(&0));
    }

    #[tokio::test]
    async fn first_run_events_arrive_in_order() {
        let h = harness(ScriptedRuntime::new(Ok(vec![0.1; 64])), RecordingTarget::default());
        h.pipeline.generate("calm piano").await.unwrap().unwrap();

        let events = h.sink.events();
        let position = |pred: &dyn Fn(&DaemonEvent) -> bool| {
            events.iter().position(|e| pred(e)).expect("event missing")
        };
        let ready = position(&|e| matches!(e, DaemonEvent::ModelStatus(p) if p.status == ModelStatus::Ready));
        let playing = position(&|e| matches!(e, DaemonEvent::GenerationProgress(p) if p.progress == 100));
        let complete = position(&|e| matches!(e, DaemonEvent::GenerationComplete(_)));

        assert!(ready < playing, "ready at {}, 100 at {}", ready, playing);
        assert!(playing < complete);
        assert_eq!(complete, events.len() - 1);
    }
}
