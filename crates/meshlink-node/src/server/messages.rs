//! WebSocket message types

use serde::{Deserialize, Serialize};

use meshlink_session::{tokenize, CommandOutput};

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A command finished, successfully or not
    CommandResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        command: String,
        success: bool,
        stdout: String,
        stderr: String,
        #[serde(rename = "returnCode")]
        return_code: i32,
    },

    /// Error message
    Error { message: String },
}

impl WsMessage {
    pub fn command_result(id: Option<String>, command: String, output: CommandOutput) -> Self {
        WsMessage::CommandResult {
            id,
            command,
            success: output.success,
            stdout: output.stdout,
            stderr: output.stderr,
            return_code: output.return_code,
        }
    }
}

/// Messages received from client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Run a command
    Command {
        #[serde(default)]
        id: Option<String>,
        args: Vec<String>,
        #[serde(default, rename = "timeoutSeconds")]
        timeout_seconds: Option<f64>,
    },
}

/// Interpret one text frame.
///
/// Frames starting with `{` must be a JSON [`ClientMessage`]; anything else
/// is a console line, split the way the device would.
pub fn parse_client_text(text: &str) -> Result<ClientMessage, String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).map_err(|e| format!("Invalid message: {}", e));
    }
    Ok(ClientMessage::Command {
        id: None,
        args: tokenize(trimmed),
        timeout_seconds: None,
    })
}
