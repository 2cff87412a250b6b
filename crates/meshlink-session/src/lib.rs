//! MeshCore console session bridge
//!
//! This crate turns a MeshCore device's interactive `meshcli` console into a
//! concurrent request/response service and a typed event log.
//!
//! # Architecture
//!
//! The bridge operates in four layers:
//!
//! 1. **Device Process** - `meshcli` attached to the serial port, seen only
//!    as line-oriented stdin/stdout/stderr
//! 2. **Stream Classifier** - Splits stdout into adverts, repeats, ACKs and
//!    command response lines
//! 3. **Packet Correlator** - Matches overheard repeats and ACKs against
//!    locally sent traffic, with JSONL persistence
//! 4. **Session Manager** - FIFO command queue, quiescence-based completion,
//!    watchdog restarts, device name detection
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meshlink_session::{MeshcliLauncher, SessionConfigBuilder, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfigBuilder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .config_dir("/config")
//!         .build();
//!
//!     let launcher = MeshcliLauncher::new("meshcli", &config.serial_port);
//!     let session = SessionManager::start(config, Arc::new(launcher)).await?;
//!
//!     let output = session.submit(vec!["infos".into()], None).await?;
//!     println!("{}", output.stdout);
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Command Flow
//!
//! 1. Caller submits args; a request with a fresh id is queued
//! 2. The dispatcher writes the quoted line to the device's stdin
//! 3. stdout lines that are not events accumulate in the request's buffer
//! 4. The monitor completes the request once output goes quiet
//! 5. The caller's oneshot resolves, or its own timeout fires first

pub mod adverts;
pub mod classifier;
pub mod command;
pub mod config;
pub mod correlator;
pub mod error;
pub mod process;
pub mod session;
pub mod store;

// Scripted fake device, shared with integration tests
pub mod test_utils;

pub use adverts::AdvertLog;
pub use classifier::{classify, AckEvent, RepeatEvent, StreamEvent};
pub use command::{quote_args, tokenize, CommandOutput, CommandPhase, CommandRequest};
pub use config::{
    detect_serial_port, LogPaths, SerialPortSource, SessionConfig, SessionConfigBuilder,
    WebuiSettings,
};
pub use correlator::{
    AckOutcome, AckRecord, EchoSummary, PacketCorrelator, RepeatOutcome, SendFingerprint,
};
pub use error::{BridgeError, Result};
pub use process::{DeviceIo, DeviceLauncher, DeviceProcess, MeshcliLauncher, ProcessExit};
pub use session::{HealthStatus, NameSource, SessionManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_config_defaults_reexported() {
        let config = SessionConfigBuilder::new().build();
        assert_eq!(config.device_name, config::DEFAULT_DEVICE_NAME);
    }
}
