//! JSON-RPC module for daemon communication.
//!
//! Methods:
//! - `generate-audio`: Start a prompt-to-loop run
//! - `stop-audio`: Stop all playback
//! - `ping`: Health check
//! - `shutdown`: Stop playback and exit
//!
//! Notifications carry the daemon events: `model-status`,
//! `generation-progress` and `generation-complete`.

pub mod methods;
pub mod server;
pub mod types;

pub use server::{run_server, write_lines, LineSender, NotificationSink, ServerState};
pub use types::{
    GenerateAudioParams, GenerateAudioResult, GenerateStatus, JsonRpcError, JsonRpcErrorResponse,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
