//! Error types for lofi-loop.
//!
//! Every failure that can end a generation run maps to one [`ErrorCode`],
//! which is what gets surfaced to the UI in the terminal progress label and
//! in JSON-RPC error data.

use std::fmt;

/// Error codes identifying the category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The model runtime could not be obtained.
    /// Trigger: missing/corrupt model files, runtime initialization error.
    ModelLoadFailed,

    /// A model artifact could not be downloaded.
    /// Trigger: network error, HTTP error status, disk full.
    ModelDownloadFailed,

    /// The synthesis call itself raised an error.
    SynthesisFailed,

    /// Synthesis completed but produced no usable samples.
    EmptyResult,

    /// The audio output device is unavailable or rejected the stream.
    PlaybackFailed,

    /// Prompt text is invalid.
    /// Trigger: prompt exceeds 1000 characters.
    InvalidPrompt,

    /// Configuration value out of range.
    InvalidConfig,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ModelLoadFailed => "MODEL_LOAD_FAILED",
            ErrorCode::ModelDownloadFailed => "MODEL_DOWNLOAD_FAILED",
            ErrorCode::SynthesisFailed => "SYNTHESIS_FAILED",
            ErrorCode::EmptyResult => "EMPTY_RESULT",
            ErrorCode::PlaybackFailed => "PLAYBACK_FAILED",
            ErrorCode::InvalidPrompt => "INVALID_PROMPT",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::ModelLoadFailed => "The music model could not be loaded",
            ErrorCode::ModelDownloadFailed => "A model file could not be downloaded",
            ErrorCode::SynthesisFailed => "Audio synthesis failed",
            ErrorCode::EmptyResult => "Synthesis finished without producing audio",
            ErrorCode::PlaybackFailed => "The audio output device is unavailable",
            ErrorCode::InvalidPrompt => "Prompt must be at most 1000 characters",
            ErrorCode::InvalidConfig => "A configuration value is out of range",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::ModelLoadFailed => {
                "Generate again to retry the load; if it keeps failing, delete the model \
                 directory so it is fetched fresh"
            }
            ErrorCode::ModelDownloadFailed => {
                "Check the network connection and LOFI_MODEL_URL, then generate again"
            }
            ErrorCode::SynthesisFailed => "Try a different prompt or fewer steps (LOFI_MAX_NEW_TOKENS)",
            ErrorCode::EmptyResult => "Try a more descriptive prompt",
            ErrorCode::PlaybackFailed => {
                "Check that an output device is connected, or pick one with LOFI_OUTPUT_DEVICE"
            }
            ErrorCode::InvalidPrompt => "Shorten the prompt to 1000 characters or fewer",
            ErrorCode::InvalidConfig => "Fix the offending LOFI_* variable or command-line flag",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for daemon operations.
///
/// `Clone` because a single in-flight model load hands the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DaemonError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to download model: {0}")]
    ModelDownload(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("No audio data generated")]
    EmptyResult,

    #[error("Audio output unavailable: {0}")]
    Playback(String),

    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DaemonError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DaemonError::ModelLoad(_) => ErrorCode::ModelLoadFailed,
            DaemonError::ModelDownload(_) => ErrorCode::ModelDownloadFailed,
            DaemonError::Synthesis(_) => ErrorCode::SynthesisFailed,
            DaemonError::EmptyResult => ErrorCode::EmptyResult,
            DaemonError::Playback(_) => ErrorCode::PlaybackFailed,
            DaemonError::InvalidPrompt(_) => ErrorCode::InvalidPrompt,
            DaemonError::Config(_) => ErrorCode::InvalidConfig,
        }
    }

    /// Creates an INVALID_PROMPT error for prompts that are too long.
    pub fn prompt_too_long(len: usize) -> Self {
        DaemonError::InvalidPrompt(format!("{} characters (maximum 1000)", len))
    }

    /// Returns true if the failure happened before a model was available.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, DaemonError::ModelLoad(_) | DaemonError::ModelDownload(_))
    }

    /// Label used for the terminal `generation-progress` event.
    pub fn progress_label(&self) -> String {
        format!("Error: {}", self)
    }
}

/// Result type alias using DaemonError.
pub type Result<T> = std::result::Result<T, DaemonError>;
