//! meshlink node - HTTP/WebSocket front for a MeshCore device
//!
//! The node owns one [`SessionManager`] and exposes it over:
//! - REST endpoints for commands, health, echo and ACK queries, and settings
//! - A WebSocket endpoint where each text frame runs as a command

pub mod server;

use std::sync::Arc;
use std::time::Instant;

use meshlink_session::{SerialPortSource, SessionManager};

/// Application state shared across handlers
pub struct AppState {
    /// Device session
    pub session: Arc<SessionManager>,
    /// How the serial port was chosen
    pub serial_port_source: SerialPortSource,
    /// Node start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(session: Arc<SessionManager>, serial_port_source: SerialPortSource) -> Self {
        Self {
            session,
            serial_port_source,
            start_time: Instant::now(),
        }
    }
}
