//! Single-flight model loader.
//!
//! At most one load runs at a time. Every caller that arrives while a load
//! is in flight awaits that same load and receives its outcome. A success
//! is cached for the life of the process; a failure is remembered only
//! until the next call, which starts over.
//!
//! Load progress occupies 0-70 of the generation scale:
//! bootstrap 0-15, artifact download 15-65, finalize 65-70.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use crate::error::{DaemonError, Result};
use crate::events::{DaemonEvent, EventSink, ModelStatus};
use crate::types::{ProgressReporter, Stage};

use super::backend::{DownloadProgress, ModelRuntime, MusicModel};

type LoadOutcome = Result<Arc<dyn MusicModel>>;
type SharedLoad = Shared<BoxFuture<'static, LoadOutcome>>;

/// Cached load state.
enum LoadState {
    /// Nothing attempted yet.
    NotStarted,
    /// A load is running; await `load` to join it.
    InFlight { attempt: u64, load: SharedLoad },
    /// Loaded for the remainder of the process.
    Loaded(Arc<dyn MusicModel>),
    /// The last attempt failed; the next call starts a fresh one.
    Failed { attempt: u64, error: DaemonError },
}

impl LoadState {
    fn label(&self) -> &'static str {
        match self {
            LoadState::NotStarted => "not_started",
            LoadState::InFlight { .. } => "in_flight",
            LoadState::Loaded(_) => "loaded",
            LoadState::Failed { .. } => "failed",
        }
    }
}

/// Memoizes one shared load of a [`ModelRuntime`].
#[derive(Clone)]
pub struct ModelLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    runtime: Arc<dyn ModelRuntime>,
    sink: Arc<dyn EventSink>,
    state: Mutex<LoadState>,
    attempts: AtomicU64,
}

impl ModelLoader {
    /// Creates a loader; nothing is loaded until the first `ensure_loaded`.
    pub fn new(runtime: Arc<dyn ModelRuntime>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                runtime,
                sink,
                state: Mutex::new(LoadState::NotStarted),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the loaded model, loading it if necessary.
    ///
    /// Safe to call from any number of tasks at once; only one load runs.
    /// The load itself runs as a separate task, so it completes even if
    /// every caller stops waiting.
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn MusicModel>> {
        let load = {
            let mut state = self.inner.lock_state();
            match &*state {
                LoadState::Loaded(model) => return Ok(Arc::clone(model)),
                LoadState::InFlight { attempt, load } => {
                    debug!(attempt, "joining in-flight model load");
                    load.clone()
                }
                LoadState::NotStarted | LoadState::Failed { .. } => {
                    if let LoadState::Failed { attempt, error } = &*state {
                        info!(previous_attempt = attempt, error = %error, "retrying model load");
                    }
                    let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let load = LoaderInner::spawn_load(&self.inner, attempt);
                    *state = LoadState::InFlight {
                        attempt,
                        load: load.clone(),
                    };
                    load
                }
            }
        };

        load.await
    }

    /// Returns the model if a load has already succeeded.
    pub fn loaded(&self) -> Option<Arc<dyn MusicModel>> {
        match &*self.inner.lock_state() {
            LoadState::Loaded(model) => Some(Arc::clone(model)),
            _ => None,
        }
    }

    /// Number of load attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Current state name, for status reporting.
    pub fn state_label(&self) -> &'static str {
        self.inner.lock_state().label()
    }
}

impl LoaderInner {
    fn lock_state(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns attempt `attempt` and returns a shareable handle to its outcome.
    fn spawn_load(inner: &Arc<Self>, attempt: u64) -> SharedLoad {
        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move { task_inner.run_load(attempt).await });

        let settle_inner = Arc::clone(inner);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome: LoadOutcome =
                        Err(DaemonError::ModelLoad(format!("load task failed: {}", e)));
                    settle_inner.settle(attempt, &outcome);
                    outcome
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_load(self: Arc<Self>, attempt: u64) -> LoadOutcome {
        info!(attempt, runtime = self.runtime.name(), "starting model load");
        let reporter = ProgressReporter::new(Arc::clone(&self.sink));

        self.sink.emit(DaemonEvent::model_status(
            ModelStatus::Loading,
            format!("Loading {}...", self.runtime.name()),
        ));
        reporter.report(Stage::Bootstrap, 5, "Loading model runtime...");

        let runtime = Arc::clone(&self.runtime);
        let sink = Arc::clone(&self.sink);
        let download_reporter = reporter.clone();

        let joined = tokio::task::spawn_blocking(move || {
            download_reporter.report(Stage::Download, 15, "Downloading model...");
            let announced = AtomicBool::new(false);

            let on_progress = |progress: DownloadProgress| {
                if !announced.swap(true, Ordering::SeqCst) {
                    sink.emit(DaemonEvent::model_status(
                        ModelStatus::Downloading,
                        format!("Downloading {}", progress.file_label),
                    ));
                }
                let label = format!("Downloading model: {}", progress.file_label);
                match progress.fraction() {
                    Some(fraction) => {
                        download_reporter.report_fraction(Stage::Download, fraction, label);
                    }
                    None => {
                        download_reporter.relabel(Stage::Download, label);
                    }
                }
            };

            runtime.load(&on_progress)
        })
        .await;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(DaemonError::ModelLoad(format!("model runtime panicked: {}", e))),
        };

        match &outcome {
            Ok(model) => {
                let config = model.config();
                reporter.report(Stage::Finalize, 70, "Model ready");
                self.sink.emit(DaemonEvent::model_status(
                    ModelStatus::Ready,
                    format!("{} ({} Hz)", model.version(), config.sample_rate),
                ));
                info!(
                    attempt,
                    version = model.version(),
                    sample_rate = config.sample_rate,
                    "model loaded"
                );
            }
            Err(e) => error!(attempt, error = %e, "model load failed"),
        }

        self.settle(attempt, &outcome);
        outcome
    }

    /// Records the outcome of `attempt`, unless a newer attempt replaced it.
    fn settle(&self, attempt: u64, outcome: &LoadOutcome) {
        let mut state = self.lock_state();
        match &*state {
            LoadState::InFlight { attempt: current, .. } if *current == attempt => {}
            other => {
                warn!(attempt, state = other.label(), "stale load outcome ignored");
                return;
            }
        }

        *state = match outcome {
            Ok(model) => LoadState::Loaded(Arc::clone(model)),
            Err(error) => LoadState::Failed {
                attempt,
                error: error.clone(),
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::types::ModelConfig;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SilentModel {
        config: ModelConfig,
    }

    impl MusicModel for SilentModel {
        fn config(&self) -> &ModelConfig {
            &self.config
        }

        fn synthesize(&self, _: &str, max_steps: usize, _: &dyn Fn(usize)) -> Result<Vec<f32>> {
            Ok(vec![0.0; max_steps])
        }
    }

    #[derive(Default)]
    struct FakeRuntime {
        loads: AtomicUsize,
        failures_left: AtomicUsize,
        panic: bool,
        delay: Duration,
        script: Vec<DownloadProgress>,
    }

    impl ModelRuntime for FakeRuntime {
        fn name(&self) -> &str {
            "fake"
        }

        fn load(&self, on_progress: &dyn Fn(DownloadProgress)) -> Result<Arc<dyn MusicModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.panic {
                panic!("runtime exploded");
            }
            for progress in &self.script {
                on_progress(progress.clone());
            }
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(DaemonError::ModelLoad("weights missing".into()));
            }
            Ok(Arc::new(SilentModel {
                config: ModelConfig::procedural_default(),
            }))
        }
    }

    fn progress(loaded: u64, total: Option<u64>) -> DownloadProgress {
        DownloadProgress {
            loaded_bytes: loaded,
            total_bytes: total,
            file_label: "weights.bin".into(),
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_load() {
        let runtime = Arc::new(FakeRuntime {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let loader = ModelLoader::new(runtime.clone(), Arc::new(RecordingSink::default()));

        let results =
            futures::future::join_all((0..8).map(|_| loader.ensure_loaded())).await;

        assert_eq!(runtime.loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.attempts(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert_eq!(loader.state_label(), "loaded");
    }

    #[tokio::test]
    async fn failed_load_is_retried_from_scratch() {
        let runtime = Arc::new(FakeRuntime {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let loader = ModelLoader::new(runtime.clone(), Arc::new(RecordingSink::default()));

        let err = loader.ensure_loaded().await.err().unwrap();
        assert!(matches!(err, DaemonError::ModelLoad(_)));
        assert_eq!(loader.state_label(), "failed");
        assert!(loader.loaded().is_none());

        assert!(loader.ensure_loaded().await.is_ok());
        assert_eq!(runtime.loads.load(Ordering::SeqCst), 2);
        assert!(loader.loaded().is_some());
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter() {
        let runtime = Arc::new(FakeRuntime {
            failures_left: AtomicUsize::new(1),
            delay: Duration::from_millis(30),
            ..Default::default()
        });
        let loader = ModelLoader::new(runtime.clone(), Arc::new(RecordingSink::default()));

        let results =
            futures::future::join_all((0..4).map(|_| loader.ensure_loaded())).await;
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(runtime.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_model_emits_no_events() {
        let sink = Arc::new(RecordingSink::default());
        let loader = ModelLoader::new(Arc::new(FakeRuntime::default()), sink.clone());
        loader.ensure_loaded().await.unwrap();
        let before = sink.events().len();

        loader.ensure_loaded().await.unwrap();
        assert_eq!(sink.events().len(), before);
    }

    #[tokio::test]
    async fn load_emits_status_lifecycle() {
        let runtime = Arc::new(FakeRuntime {
            script: vec![progress(10, Some(100)), progress(100, Some(100))],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let loader = ModelLoader::new(runtime, sink.clone());
        loader.ensure_loaded().await.unwrap();

        let statuses: Vec<ModelStatus> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                DaemonEvent::ModelStatus(p) => Some(p.status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![ModelStatus::Loading, ModelStatus::Downloading, ModelStatus::Ready]
        );
        assert_eq!(sink.progress_values(), vec![5, 15, 20, 65, 70]);
    }

    #[tokio::test]
    async fn noisy_download_progress_is_clamped() {
        let runtime = Arc::new(FakeRuntime {
            script: vec![
                progress(50, Some(100)),
                progress(20, Some(100)),
                progress(500, Some(100)),
                progress(7, None),
                progress(3, Some(0)),
            ],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let loader = ModelLoader::new(runtime, sink.clone());
        loader.ensure_loaded().await.unwrap();

        let values = sink.progress_values();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
        assert!(values.iter().all(|v| *v <= 70));
        assert_eq!(*values.last().unwrap(), 70);
    }

    #[tokio::test]
    async fn panicking_runtime_becomes_load_failure() {
        let runtime = Arc::new(FakeRuntime {
            panic: true,
            ..Default::default()
        });
        let loader = ModelLoader::new(runtime, Arc::new(RecordingSink::default()));
        let err = loader.ensure_loaded().await.err().unwrap();
        assert!(err.is_load_failure());
        assert_eq!(loader.state_label(), "failed");
    }
}
