//! Progress stages and the monotonic progress reporter.
//!
//! Each stage owns a reserved percent range. Reports are clamped into the
//! stage's range and never move backwards within one run; only
//! [`ProgressReporter::fail`] resets to 0.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::events::{DaemonEvent, EventSink};

/// A named phase of a generation run with a reserved percent range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Runtime bootstrap (0-15).
    Bootstrap,
    /// Model artifact download (15-65).
    Download,
    /// Model finalization (65-70).
    Finalize,
    /// Step-by-step synthesis (70-95).
    Synthesis,
    /// Validation and buffer construction (95-98).
    PostProcess,
    /// Hand-off to playback (98-100).
    Playback,
}

impl Stage {
    /// Inclusive percent range reserved for this stage.
    pub fn range(&self) -> (u8, u8) {
        match self {
            Stage::Bootstrap => (0, 15),
            Stage::Download => (15, 65),
            Stage::Finalize => (65, 70),
            Stage::Synthesis => (70, 95),
            Stage::PostProcess => (95, 98),
            Stage::Playback => (98, 100),
        }
    }

    /// Maps a completed fraction of this stage onto its percent range.
    ///
    /// Fractions outside 0..=1 (noisy callbacks) are clamped.
    pub fn percent_at(&self, fraction: f64) -> u8 {
        let (start, end) = self.range();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = f64::from(end - start);
        start + (fraction * span).round() as u8
    }

    /// Clamps an absolute percent into this stage's range.
    pub fn clamp(&self, percent: u8) -> u8 {
        let (start, end) = self.range();
        percent.clamp(start, end)
    }
}

/// A progress update within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub percent: u8,
    pub label: String,
}

/// Emits `generation-progress` events for one run, never going backwards.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn EventSink>,
    last: Arc<Mutex<u8>>,
}

impl ProgressReporter {
    /// Creates a reporter starting at 0.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::starting_at(sink, 0)
    }

    /// Creates a reporter whose floor is `percent`.
    pub fn starting_at(sink: Arc<dyn EventSink>, percent: u8) -> Self {
        Self {
            sink,
            last: Arc::new(Mutex::new(percent.min(100))),
        }
    }

    /// Reports an absolute percent within `stage`.
    ///
    /// Returns the event that was emitted. The percent is clamped to the
    /// stage range and raised to the last reported value if lower.
    pub fn report(&self, stage: Stage, percent: u8, label: impl Into<String>) -> ProgressEvent {
        let percent = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            let percent = stage.clamp(percent).max(*last);
            *last = percent;
            percent
        };

        let event = ProgressEvent {
            stage,
            percent,
            label: label.into(),
        };
        self.sink.emit(DaemonEvent::progress(event.percent, event.label.clone()));
        event
    }

    /// Reports a completed fraction of `stage`.
    pub fn report_fraction(
        &self,
        stage: Stage,
        fraction: f64,
        label: impl Into<String>,
    ) -> ProgressEvent {
        self.report(stage, stage.percent_at(fraction), label)
    }

    /// Re-emits the current percent with a new label (indeterminate progress).
    pub fn relabel(&self, stage: Stage, label: impl Into<String>) -> ProgressEvent {
        let current = self.current();
        self.report(stage, current, label)
    }

    /// Emits the terminal failure event: percent 0 with the given label.
    pub fn fail(&self, label: impl Into<String>) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        self.sink.emit(DaemonEvent::progress(0, label.into()));
    }

    /// The last reported percent.
    pub fn current(&self) -> u8 {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
