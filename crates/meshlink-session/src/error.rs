//! Error types for the device session and correlator
//!
//! Errors fall into the classes the bridge distinguishes at runtime:
//! caller timeouts, dispatch failures, process-fatal failures, and local
//! I/O or configuration problems. Classification errors on device output
//! never surface here; they are traced and dropped at the classifier.

use std::time::Duration;
use thiserror::Error;

/// Main error type for session operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Caller-visible command errors =====
    /// Caller stopped waiting before the device answered
    #[error("Command timeout after {} seconds", .after.as_secs_f64())]
    CommandTimeout {
        /// Command identifier
        cmd_id: String,
        /// Caller timeout
        after: Duration,
    },

    /// Writing the command to the device failed
    #[error("Failed to send command: {0}")]
    Dispatch(String),

    /// The device process exited while the command was in flight
    #[error("meshcli process crashed (exit code: {})", exit_code_label(.exit_code))]
    ProcessExited {
        /// Exit code, if the platform reported one
        exit_code: Option<i32>,
    },

    /// The response disappeared between completion and retrieval
    #[error("Command response lost")]
    ResponseLost,

    /// Empty argument list
    #[error("Missing command arguments")]
    EmptyCommand,

    // ===== Process lifecycle errors =====
    /// Spawning the device process failed
    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed {
        /// Program that was launched
        program: String,
        /// Failure reason
        reason: String,
    },

    /// Process did not hand over its stdio pipes
    #[error("Device process stdio unavailable")]
    StdioUnavailable,

    /// Session is shutting down
    #[error("Session is shutting down")]
    ShuttingDown,

    // ===== Configuration errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No serial device could be found
    #[error("No serial device found")]
    DeviceNotFound,

    // ===== Data errors =====
    /// Packet reconstruction failed
    #[error("Payload error: {0}")]
    Payload(#[from] meshlink_core::CoreError),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl BridgeError {
    /// Whether this error came from the device process going away
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::ProcessExited { .. }
                | BridgeError::LaunchFailed { .. }
                | BridgeError::StdioUnavailable
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::CommandTimeout { .. } => "COMMAND_TIMEOUT",
            BridgeError::Dispatch(_) => "DISPATCH_FAILED",
            BridgeError::ProcessExited { .. } => "PROCESS_EXITED",
            BridgeError::ResponseLost => "RESPONSE_LOST",
            BridgeError::EmptyCommand => "EMPTY_COMMAND",
            BridgeError::LaunchFailed { .. } => "LAUNCH_FAILED",
            BridgeError::StdioUnavailable => "STDIO_UNAVAILABLE",
            BridgeError::ShuttingDown => "SHUTTING_DOWN",
            BridgeError::InvalidConfig(_) => "INVALID_CONFIG",
            BridgeError::DeviceNotFound => "DEVICE_NOT_FOUND",
            BridgeError::Payload(_) => "PAYLOAD_ERROR",
            BridgeError::Json(_) => "JSON_ERROR",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, BridgeError>;
