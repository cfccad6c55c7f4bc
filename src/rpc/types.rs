//! JSON-RPC types for the daemon protocol.

use serde::{Deserialize, Serialize};

use crate::error::DaemonError;
use crate::events::DaemonEvent;
use crate::playback::PlaybackState;
use crate::types::MAX_PROMPT_CHARS;

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Integer(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

/// A JSON-RPC request wrapper.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub id: RequestId,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A JSON-RPC response wrapper.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse<T: Serialize> {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: T,
}

impl<T: Serialize> JsonRpcResponse<T> {
    pub fn new(id: RequestId, result: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// A JSON-RPC error response.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Serialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonRpcErrorData>,
}

/// Extended error data for application-specific errors.
#[derive(Debug, Serialize, PartialEq)]
pub struct JsonRpcErrorData {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub recovery_hint: String,
}

impl JsonRpcError {
    /// Creates a parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an invalid request error (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a method not found error (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    /// Creates an invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// Invalid params carrying the daemon error's code and recovery hint.
    pub fn from_daemon_error(err: &DaemonError) -> Self {
        let code = err.code();
        Self {
            code: -32602,
            message: code.description().to_string(),
            data: Some(JsonRpcErrorData {
                error_code: code.as_str().to_string(),
                details: Some(err.to_string()),
                recovery_hint: code.recovery_hint().to_string(),
            }),
        }
    }
}

/// Parameters for `generate-audio`.
#[derive(Debug, Deserialize)]
pub struct GenerateAudioParams {
    /// Text description of desired music.
    pub prompt: String,
}

impl GenerateAudioParams {
    /// Rejects prompts over the length limit. Empty prompts are valid and ignored later.
    pub fn validate(&self) -> Result<(), JsonRpcError> {
        let len = self.prompt.trim().chars().count();
        if len > MAX_PROMPT_CHARS {
            return Err(JsonRpcError::from_daemon_error(&DaemonError::prompt_too_long(len)));
        }
        Ok(())
    }

    pub fn is_blank(&self) -> bool {
        self.prompt.trim().is_empty()
    }
}

/// Whether a `generate-audio` request started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerateStatus {
    /// A run was started; progress arrives as notifications.
    Accepted,
    /// The prompt was empty; nothing happens.
    Ignored,
}

/// Response for `generate-audio`.
#[derive(Debug, Serialize)]
pub struct GenerateAudioResult {
    pub status: GenerateStatus,
}

/// Response for `stop-audio`.
#[derive(Debug, Serialize)]
pub struct StopAudioResult {
    pub state: PlaybackState,
}

/// Response for `ping`.
#[derive(Debug, Serialize)]
pub struct PingResult {
    pub status: &'static str,
    pub version: &'static str,
    pub model: &'static str,
    pub playback: PlaybackState,
}

/// Response for `shutdown`.
#[derive(Debug, Serialize)]
pub struct ShutdownResult {
    pub status: &'static str,
}

/// A JSON-RPC notification (no id field).
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<T: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: T,
}

impl<T: Serialize> JsonRpcNotification<T> {
    pub fn new(method: &'static str, params: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

impl From<DaemonEvent> for JsonRpcNotification<DaemonEvent> {
    fn from(event: DaemonEvent) -> Self {
        Self::new(event.name(), event)
    }
}
