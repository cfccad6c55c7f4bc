//! JSON-RPC server over stdin/stdout.
//!
//! Requests are newline-delimited JSON-RPC 2.0. Responses and event
//! notifications share one line channel so they reach stdout whole and in
//! the order they were produced.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::LoopEngine;
use crate::events::{DaemonEvent, EventSink};

use super::methods::handle_request;
use super::types::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// Sender half of the output line channel.
pub type LineSender = mpsc::UnboundedSender<String>;

/// State shared across all request handlers.
pub struct ServerState {
    engine: LoopEngine,
    shutdown: AtomicBool,
}

impl ServerState {
    pub fn new(engine: LoopEngine) -> Self {
        Self {
            engine,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &LoopEngine {
        &self.engine
    }

    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns true if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Sends every event as a JSON-RPC notification line.
pub struct NotificationSink {
    out: LineSender,
}

impl NotificationSink {
    pub fn new(out: LineSender) -> Self {
        Self { out }
    }
}

impl EventSink for NotificationSink {
    fn emit(&self, event: DaemonEvent) {
        let notification = JsonRpcNotification::from(event);
        match serde_json::to_string(&notification) {
            Ok(line) => {
                let _ = self.out.send(line);
            }
            Err(e) => warn!(method = notification.method, error = %e, "notification not serializable"),
        }
    }
}

/// Reads requests from `input` until EOF or `shutdown`, answering on `out`.
pub async fn run_server<R>(state: &ServerState, input: R, out: &LineSender) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    info!("JSON-RPC server started, waiting for requests");
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(response) = process_request(&line, state) {
            let _ = out.send(response);
        }

        if state.is_shutdown() {
            info!("server shutdown requested");
            break;
        }
    }

    info!("JSON-RPC server stopped");
    Ok(())
}

/// Drains the line channel into `writer`, one JSON document per line.
pub async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<String>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Processes a single JSON-RPC request line.
fn process_request(line: &str, state: &ServerState) -> Option<String> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            let error = JsonRpcErrorResponse::new(
                None,
                JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
            );
            return serde_json::to_string(&error).ok();
        }
    };

    if request.jsonrpc != "2.0" {
        let error = JsonRpcErrorResponse::new(
            Some(request.id),
            JsonRpcError::invalid_request("Invalid JSON-RPC version (expected 2.0)"),
        );
        return serde_json::to_string(&error).ok();
    }

    debug!(method = %request.method, "request");
    match handle_request(&request.method, request.params, state) {
        Ok(result) => serde_json::to_string(&JsonRpcResponse::new(request.id, result)).ok(),
        Err(error) => {
            serde_json::to_string(&JsonRpcErrorResponse::new(Some(request.id), error)).ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::models::{DownloadProgress, ModelRuntime, MusicModel, ProceduralModel};
    use crate::playback::OfflineOpener;
    use crate::types::ModelConfig;
    use serde_json::Value;
    use std::sync::Arc;

    struct TestRuntime;

    impl ModelRuntime for TestRuntime {
        fn name(&self) -> &str {
            "test"
        }

        fn load(&self, _: &dyn Fn(DownloadProgress)) -> crate::error::Result<Arc<dyn MusicModel>> {
            Ok(Arc::new(ProceduralModel::new(ModelConfig::procedural_default())))
        }
    }

    fn state(out: &LineSender) -> ServerState {
        let mut config = DaemonConfig::new();
        config.max_new_tokens = Some(10);
        let engine = LoopEngine::new(
            &config,
            Arc::new(TestRuntime),
            Arc::new(OfflineOpener::new()),
            Arc::new(NotificationSink::new(out.clone())),
        );
        ServerState::new(engine)
    }

    fn parse(line: &str) -> Value {
        serde_json::from_str(line).unwrap()
    }

    #[tokio::test]
    async fn process_invalid_json() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let response = process_request("not json", &state(&tx)).unwrap();
        assert_eq!(parse(&response)["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn process_invalid_version() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = r#"{"jsonrpc":"1.0","method":"ping","id":1}"#;
        let response = process_request(request, &state(&tx)).unwrap();
        assert_eq!(parse(&response)["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn process_unknown_method() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = r#"{"jsonrpc":"2.0","method":"unknown","id":1}"#;
        let response = process_request(request, &state(&tx)).unwrap();
        assert_eq!(parse(&response)["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn generate_without_prompt_is_invalid_params() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = r#"{"jsonrpc":"2.0","method":"generate-audio","params":{},"id":2}"#;
        let response = process_request(request, &state(&tx)).unwrap();
        assert_eq!(parse(&response)["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn blank_prompt_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = r#"{"jsonrpc":"2.0","method":"generate-audio","params":{"prompt":"  "},"id":3}"#;
        let response = process_request(request, &state(&tx)).unwrap();
        assert_eq!(parse(&response)["result"]["status"], "ignored");
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ping_reports_idle_engine() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = r#"{"jsonrpc":"2.0","method":"ping","id":"a"}"#;
        let response = parse(&process_request(request, &state(&tx)).unwrap());
        assert_eq!(response["id"], "a");
        assert_eq!(response["result"]["status"], "ok");
        assert_eq!(response["result"]["model"], "not_started");
        assert_eq!(response["result"]["playback"], "idle");
    }

    #[tokio::test]
    async fn session_streams_events_and_stops_on_shutdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = state(&tx);

        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"generate-audio","params":{"prompt":"calm piano"},"id":1}"#,
            "\n"
        );
        run_server(&state, tokio::io::BufReader::new(input.as_bytes()), &tx)
            .await
            .unwrap();

        // The spawned run finishes on its own after the reply.
        let mut methods = Vec::new();
        let mut accepted = false;
        while !methods.iter().any(|m| m == "generation-complete") {
            let line = rx.recv().await.unwrap();
            let value = parse(&line);
            if value["result"]["status"] == "accepted" {
                accepted = true;
            }
            if let Some(method) = value["method"].as_str() {
                methods.push(method.to_string());
            }
        }
        assert!(accepted);
        assert_eq!(methods.first().map(String::as_str), Some("model-status"));
        assert!(methods.iter().any(|m| m == "generation-progress"));

        let shutdown = concat!(r#"{"jsonrpc":"2.0","method":"shutdown","id":9}"#, "\n", "ignored\n");
        run_server(&state, tokio::io::BufReader::new(shutdown.as_bytes()), &tx)
            .await
            .unwrap();
        assert!(state.is_shutdown());
        let reply = parse(&rx.recv().await.unwrap());
        assert_eq!(reply["result"]["status"], "shutting_down");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_lines_appends_newlines() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("{}".to_string()).unwrap();
        tx.send("[]".to_string()).unwrap();
        drop(tx);

        let mut out = Vec::new();
        write_lines(rx, &mut out).await.unwrap();
        assert_eq!(out, b"{}\n[]\n");
    }
}
