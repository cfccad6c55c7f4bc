//! Built-in procedural music model.
//!
//! Renders a short lofi loop without any neural inference: a four-chord
//! minor-seventh pad, optional kick and hat pattern, and a little vinyl
//! noise. The prompt picks tempo and texture and seeds every random choice,
//! so the same prompt always renders the same loop.

use std::f32::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::types::{prompt_seed, ModelConfig};

use super::backend::{DownloadProgress, ModelRuntime, MusicModel};
use super::downloader::{artifacts_from_base_url, ensure_artifacts, Artifact};

/// Artifact files the procedural model can use, and whether each is required.
pub const MODEL_FILES: &[(&str, bool)] = &[("config.json", false)];

/// Semitone offsets of the chord roots, one per quarter of the loop.
const PROGRESSION: [i32; 4] = [0, 8, 3, 10];

/// Minor seventh chord tones relative to the root.
const CHORD_TONES: [i32; 4] = [0, 3, 7, 10];

/// Peak level after normalization.
const PEAK: f32 = 0.8;

/// Fade length at every chord boundary and at the loop seam.
const EDGE_FADE_SECS: f32 = 0.02;

/// Loads a [`ProceduralModel`] from a model directory.
pub struct ProceduralRuntime {
    model_dir: PathBuf,
    artifacts: Vec<Artifact>,
}

impl ProceduralRuntime {
    pub fn new(model_dir: PathBuf, artifacts: Vec<Artifact>) -> Self {
        Self {
            model_dir,
            artifacts,
        }
    }

    /// Uses the configured model path; downloads only when a model URL is set.
    pub fn from_config(config: &DaemonConfig) -> Self {
        let artifacts = config
            .model_url
            .as_deref()
            .map(|url| artifacts_from_base_url(url, MODEL_FILES))
            .unwrap_or_default();
        Self::new(config.effective_model_path(), artifacts)
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}

impl ModelRuntime for ProceduralRuntime {
    fn name(&self) -> &str {
        "procedural"
    }

    fn load(&self, on_progress: &dyn Fn(DownloadProgress)) -> Result<Arc<dyn MusicModel>> {
        ensure_artifacts(&self.model_dir, &self.artifacts, on_progress)?;

        let config = load_model_config(&self.model_dir)?;
        if let Some(msg) = config.validate() {
            return Err(DaemonError::ModelLoad(msg));
        }

        info!(
            dir = %self.model_dir.display(),
            version = %config.model_version,
            sample_rate = config.sample_rate,
            "procedural model ready"
        );
        Ok(Arc::new(ProceduralModel { config }))
    }
}

/// Reads `config.json` from the model directory, or returns the defaults.
///
/// A present but unreadable config is a load failure.
pub fn load_model_config(model_dir: &Path) -> Result<ModelConfig> {
    let path = model_dir.join("config.json");
    if !path.exists() {
        debug!(path = %path.display(), "no model config, using defaults");
        return Ok(ModelConfig::procedural_default());
    }

    let text = fs::read_to_string(&path).map_err(|e| {
        DaemonError::ModelLoad(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        DaemonError::ModelLoad(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Musical choices derived from the prompt.
#[derive(Debug, Clone, PartialEq)]
struct Style {
    bpm: f32,
    drums: bool,
    brightness: f32,
    root_hz: f32,
}

impl Style {
    fn from_prompt(prompt: &str, rng: &mut ChaCha8Rng) -> Self {
        let text = prompt.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

        let base_bpm = if has(&["upbeat", "dance", "energetic", "fast"]) {
            124.0
        } else if has(&["calm", "ambient", "sleep", "slow", "chill"]) {
            70.0
        } else {
            85.0
        };
        let drums = has(&["drum", "beat", "upbeat", "groove", "hip hop"]);
        let brightness = if has(&["piano", "bright", "keys"]) { 0.6 } else { 0.25 };

        // Transpose within a fifth so prompts differ in key.
        let transpose = rng.gen_range(0..7) as f32;
        Self {
            bpm: base_bpm + rng.gen_range(-3.0..3.0),
            drums,
            brightness,
            root_hz: 110.0 * 2f32.powf(transpose / 12.0),
        }
    }
}

/// The model handle returned by [`ProceduralRuntime`].
pub struct ProceduralModel {
    config: ModelConfig,
}

impl ProceduralModel {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl MusicModel for ProceduralModel {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn synthesize(
        &self,
        prompt: &str,
        max_steps: usize,
        on_step: &dyn Fn(usize),
    ) -> Result<Vec<f32>> {
        if max_steps == 0 {
            return Ok(Vec::new());
        }

        let mut rng = ChaCha8Rng::seed_from_u64(prompt_seed(prompt));
        let style = Style::from_prompt(prompt, &mut rng);
        let noise = Normal::new(0.0f32, 1.0)
            .map_err(|e| DaemonError::Synthesis(format!("noise source: {}", e)))?;

        let sample_rate = self.config.sample_rate as f32;
        let per_step = self.config.samples_per_step();
        let total = max_steps * per_step;
        debug!(
            ?style,
            steps = max_steps,
            samples = total,
            secs = self.config.steps_to_seconds(max_steps),
            "rendering loop"
        );

        let renderer = LoopRenderer::new(&style, sample_rate, total);
        let mut samples = Vec::with_capacity(total);
        for step in 0..max_steps {
            let start = step * per_step;
            for n in start..start + per_step {
                let hiss = noise.sample(&mut rng);
                samples.push(renderer.sample(n, hiss));
            }
            on_step(step + 1);
        }

        normalize(&mut samples, PEAK);
        if samples.iter().all(|s| *s == 0.0) {
            warn!("procedural render is silent");
        }
        Ok(samples)
    }
}

/// Per-sample renderer for one loop.
struct LoopRenderer {
    sample_rate: f32,
    total: usize,
    segment_len: usize,
    beat_len: usize,
    edge: f32,
    drums: bool,
    brightness: f32,
    chords: [[f32; 4]; 4],
}

impl LoopRenderer {
    fn new(style: &Style, sample_rate: f32, total: usize) -> Self {
        let mut chords = [[0.0f32; 4]; 4];
        for (chord, root) in chords.iter_mut().zip(PROGRESSION) {
            for (freq, tone) in chord.iter_mut().zip(CHORD_TONES) {
                *freq = style.root_hz * 2f32.powf((root + tone) as f32 / 12.0);
            }
        }

        Self {
            sample_rate,
            total,
            segment_len: (total / PROGRESSION.len()).max(1),
            beat_len: ((sample_rate * 60.0 / style.bpm) as usize).max(1),
            edge: EDGE_FADE_SECS * sample_rate,
            drums: style.drums,
            brightness: style.brightness,
            chords,
        }
    }

    fn sample(&self, n: usize, hiss: f32) -> f32 {
        let segment = (n / self.segment_len).min(PROGRESSION.len() - 1);
        let in_segment = n - segment * self.segment_len;
        let segment_end = if segment == PROGRESSION.len() - 1 {
            self.total
        } else {
            (segment + 1) * self.segment_len
        };
        let t = n as f32 / self.sample_rate;

        let mut pad = 0.0;
        for freq in self.chords[segment] {
            let phase = 2.0 * PI * freq * t;
            pad += phase.sin() + self.brightness * (2.0 * phase).sin() * 0.5;
        }
        pad *= 0.12 * fade(in_segment as f32, (segment_end - n) as f32, self.edge);

        let mut out = pad + hiss * 0.004;

        if self.drums {
            let in_beat = (n % self.beat_len) as f32 / self.sample_rate;
            let sweep = 50.0 + 90.0 * (-in_beat * 30.0).exp();
            out += (2.0 * PI * sweep * in_beat).sin() * (-in_beat * 9.0).exp() * 0.5;

            let off = ((n + self.beat_len / 2) % self.beat_len) as f32 / self.sample_rate;
            out += hiss * (-off * 45.0).exp() * 0.08;
        }

        // Loop seam: both ends of the buffer sit at silence.
        out * fade(n as f32, (self.total - n) as f32, self.edge)
    }
}

/// Raised-cosine edge gain: 0 at either boundary, 1 once `edge` samples in.
fn fade(from_start: f32, to_end: f32, edge: f32) -> f32 {
    let distance = from_start.min(to_end - 1.0).max(0.0);
    if distance >= edge {
        1.0
    } else {
        0.5 - 0.5 * (PI * distance / edge).cos()
    }
}

/// Scales `samples` so the loudest one sits at `peak`.
fn normalize(samples: &mut [f32], peak: f32) {
    let max = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if max > 0.0 {
        let gain = peak / max;
        samples.iter_mut().for_each(|s| *s *= gain);
    }
}
