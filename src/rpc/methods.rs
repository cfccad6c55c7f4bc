//! JSON-RPC method handlers.

use serde_json::Value;
use tracing::{debug, info};

use super::server::ServerState;
use super::types::{
    GenerateAudioParams, GenerateAudioResult, GenerateStatus, JsonRpcError, PingResult,
    ShutdownResult, StopAudioResult,
};

/// Dispatches a request to its handler.
///
/// Must run inside a tokio runtime; `generate-audio` spawns its run.
pub fn handle_request(
    method: &str,
    params: Value,
    state: &ServerState,
) -> Result<Value, JsonRpcError> {
    match method {
        "generate-audio" => handle_generate_audio(params, state),
        "stop-audio" => handle_stop_audio(state),
        "ping" => handle_ping(state),
        "shutdown" => handle_shutdown(state),
        _ => Err(JsonRpcError::method_not_found(method)),
    }
}

fn to_value<T: serde::Serialize>(result: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(result).map_err(|e| JsonRpcError::invalid_request(e.to_string()))
}

fn handle_generate_audio(params: Value, state: &ServerState) -> Result<Value, JsonRpcError> {
    let params: GenerateAudioParams = serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))?;
    params.validate()?;

    if params.is_blank() {
        debug!("blank prompt ignored");
        return to_value(GenerateAudioResult {
            status: GenerateStatus::Ignored,
        });
    }

    let engine = state.engine().clone();
    let prompt = params.prompt;
    // Outcome is reported through events; the handle is not awaited.
    tokio::spawn(async move {
        engine.generate(&prompt).await;
    });

    to_value(GenerateAudioResult {
        status: GenerateStatus::Accepted,
    })
}

fn handle_stop_audio(state: &ServerState) -> Result<Value, JsonRpcError> {
    state.engine().stop_audio();
    to_value(StopAudioResult {
        state: state.engine().playback_state(),
    })
}

fn handle_ping(state: &ServerState) -> Result<Value, JsonRpcError> {
    to_value(PingResult {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.engine().model_state(),
        playback: state.engine().playback_state(),
    })
}

fn handle_shutdown(state: &ServerState) -> Result<Value, JsonRpcError> {
    info!("shutdown requested");
    state.engine().shutdown();
    state.shutdown();
    to_value(ShutdownResult {
        status: "shutting_down",
    })
}
