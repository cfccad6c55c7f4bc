//! Events exposed to the UI collaborator.
//!
//! Events are fire-and-forget: a sink may see the same stage more than once
//! and must tolerate repeated or equal progress values.
//!
//! | Event                 | Payload                                   |
//! |-----------------------|-------------------------------------------|
//! | `model-status`        | `{status: loading|downloading|ready, detail}` |
//! | `generation-progress` | `{progress: 0-100, label}`                |
//! | `generation-complete` | `{}`                                      |

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Model-load lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Downloading,
    Ready,
}

/// Payload of `model-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatusParams {
    pub status: ModelStatus,
    pub detail: String,
}

/// Payload of `generation-progress`.
///
/// `progress: 0` with an `Error: ...` label signals failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgressParams {
    pub progress: u8,
    pub label: String,
}

/// Payload of `generation-complete`; serializes as `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerationCompleteParams {}

/// An event for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DaemonEvent {
    ModelStatus(ModelStatusParams),
    GenerationProgress(GenerationProgressParams),
    GenerationComplete(GenerationCompleteParams),
}

impl DaemonEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            DaemonEvent::ModelStatus(_) => "model-status",
            DaemonEvent::GenerationProgress(_) => "generation-progress",
            DaemonEvent::GenerationComplete(_) => "generation-complete",
        }
    }

    pub fn model_status(status: ModelStatus, detail: impl Into<String>) -> Self {
        DaemonEvent::ModelStatus(ModelStatusParams {
            status,
            detail: detail.into(),
        })
    }

    pub fn progress(progress: u8, label: impl Into<String>) -> Self {
        DaemonEvent::GenerationProgress(GenerationProgressParams {
            progress,
            label: label.into(),
        })
    }

    pub fn complete() -> Self {
        DaemonEvent::GenerationComplete(GenerationCompleteParams {})
    }
}

/// Destination for UI events.
///
/// Called from async tasks and from blocking model threads, so
/// implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DaemonEvent);
}

/// Forwards events into a tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DaemonEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver draining it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DaemonEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: DaemonEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: DaemonEvent) {
        match &event {
            DaemonEvent::ModelStatus(p) => {
                tracing::info!(status = ?p.status, "{}", p.detail)
            }
            DaemonEvent::GenerationProgress(p) if p.progress == 0 && p.label.starts_with("Error") => {
                tracing::error!("{}", p.label)
            }
            DaemonEvent::GenerationProgress(p) => {
                tracing::info!(progress = p.progress, "{}", p.label)
            }
            DaemonEvent::GenerationComplete(_) => tracing::info!("generation complete"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DaemonEvent>>,
}

impl RecordingSink {
    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<DaemonEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The `progress` values of every `generation-progress` event, in order.
    pub fn progress_values(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DaemonEvent::GenerationProgress(p) => Some(p.progress),
                _ => None,
            })
            .collect()
    }

    /// Event names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(DaemonEvent::name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DaemonEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names() {
        assert_eq!(DaemonEvent::complete().name(), "generation-complete");
        assert_eq!(DaemonEvent::progress(5, "x").name(), "generation-progress");
        assert_eq!(
            DaemonEvent::model_status(ModelStatus::Ready, "").name(),
            "model-status"
        );
    }

    #[test]
    fn payloads_serialize_flat() {
        let json = serde_json::to_value(DaemonEvent::progress(42, "Generating audio...")).unwrap();
        assert_eq!(json, serde_json::json!({ "progress": 42, "label": "Generating audio..." }));

        let json = serde_json::to_value(DaemonEvent::complete()).unwrap();
        assert_eq!(json, serde_json::json!({}));

        let json =
            serde_json::to_value(DaemonEvent::model_status(ModelStatus::Downloading, "config.json"))
                .unwrap();
        assert_eq!(json["status"], "downloading");
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(DaemonEvent::complete());
        assert_eq!(rx.recv().await, Some(DaemonEvent::complete()));
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.emit(DaemonEvent::complete());
    }
}
