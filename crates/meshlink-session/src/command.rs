//! Command requests, results, and the per-command completion state machine
//!
//! The console gives no end-of-response marker. A command is considered
//! finished once it has run for its minimum time and output has gone quiet
//! for one poll interval.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BridgeError;

/// Result handed back to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
}

impl CommandOutput {
    /// Successful result from collected response lines
    pub fn from_lines(lines: &[String]) -> Self {
        Self {
            success: true,
            stdout: lines.join("\n"),
            stderr: String::new(),
            return_code: 0,
        }
    }

    /// Failed result carrying the error text
    pub fn from_error(err: &BridgeError) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: err.to_string(),
            return_code: -1,
        }
    }
}

/// One caller invocation
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Short unique id for logs
    pub id: String,
    /// Argument tokens
    pub args: Vec<String>,
    /// Minimum run time before quiescence may complete the command
    pub min_elapsed: Duration,
}

impl CommandRequest {
    /// Build a request with a fresh id
    pub fn new(args: Vec<String>, min_elapsed: Duration) -> Self {
        Self {
            id: new_command_id(),
            args,
            min_elapsed,
        }
    }

    /// Line written to the device
    pub fn command_line(&self) -> String {
        quote_args(&self.args)
    }
}

/// Eight hex characters from a v4 uuid
pub fn new_command_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Join arguments into a console line.
///
/// The console's parser is not shell compatible: tokens with spaces or
/// quotes are wrapped in double quotes and inner `"` become `\"`.
pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.contains(' ') || arg.contains('"') || arg.contains('\'') {
                format!("\"{}\"", arg.replace('"', "\\\""))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a free-form command line into tokens.
///
/// Single and double quotes group words; a backslash escapes the next
/// character. An unterminated quote runs to the end of the line.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_token = true;
            }
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Completion rule for one dispatched command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuiescenceRule {
    /// Quiet period that ends a response
    pub poll_interval: Duration,
    /// Minimum run time before the quiet period counts
    pub min_elapsed: Duration,
}

/// Lifecycle of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    /// Waiting in the queue
    Queued,
    /// Written to the device, no output yet
    Dispatched,
    /// Output arriving
    Accumulating,
    /// Output quiet but minimum run time not reached
    QuiescentWait,
    /// Response handed to the caller
    Complete,
    /// Caller stopped waiting
    TimedOut,
    /// Dispatch failure or process exit
    Failed,
}

impl CommandPhase {
    /// A response line arrived
    pub fn on_line(self) -> Self {
        match self {
            CommandPhase::Dispatched | CommandPhase::QuiescentWait => CommandPhase::Accumulating,
            other => other,
        }
    }

    /// Monitor tick: `since_dispatch` is total run time and `since_output`
    /// the time since the last line (or since dispatch if there was none).
    pub fn on_tick(
        self,
        rule: &QuiescenceRule,
        since_dispatch: Duration,
        since_output: Duration,
    ) -> Self {
        match self {
            CommandPhase::Dispatched | CommandPhase::Accumulating | CommandPhase::QuiescentWait => {
                let quiet = since_output >= rule.poll_interval;
                if !quiet {
                    CommandPhase::Accumulating
                } else if since_dispatch >= rule.min_elapsed {
                    CommandPhase::Complete
                } else {
                    CommandPhase::QuiescentWait
                }
            }
            other => other,
        }
    }
}
