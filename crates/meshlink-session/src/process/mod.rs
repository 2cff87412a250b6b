//! Device process abstraction
//!
//! The session never talks to `tokio::process` directly. A [`DeviceLauncher`]
//! produces a fresh [`DeviceIo`] bundle on every (re)start, which lets the
//! watchdog restart logic run against a scripted fake in tests.

pub mod meshcli;

use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

pub use meshcli::MeshcliLauncher;

/// Writable half of the device console
pub type DeviceStdin = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable half of the device console
pub type DeviceOutput = Box<dyn AsyncRead + Send + Unpin>;

/// How a device process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Handle to a running device process
#[async_trait]
pub trait DeviceProcess: Send {
    /// OS process id, if any
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness check; `Some` once the process has exited
    fn try_exit(&mut self) -> Result<Option<ProcessExit>>;

    /// Stop the process and reap it
    async fn terminate(&mut self) -> Result<()>;
}

/// Pipes and handle of one launched device process
pub struct DeviceIo {
    /// Command input
    pub stdin: DeviceStdin,
    /// Response and event output
    pub stdout: DeviceOutput,
    /// Diagnostic output
    pub stderr: DeviceOutput,
    /// Lifecycle handle
    pub process: Box<dyn DeviceProcess>,
}

impl fmt::Debug for DeviceIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIo")
            .field("pid", &self.process.id())
            .finish_non_exhaustive()
    }
}

/// Starts device console processes
#[async_trait]
pub trait DeviceLauncher: Send + Sync + 'static {
    /// Launch a new process with piped stdio
    async fn launch(&self) -> Result<DeviceIo>;

    /// Human-readable device path for health reporting
    fn device_path(&self) -> String;
}
