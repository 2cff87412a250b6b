//! `meshcli` console launcher
//!
//! Spawns `meshcli -s <port>` with piped stdio.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{DeviceIo, DeviceLauncher, DeviceProcess, ProcessExit};
use crate::error::{BridgeError, Result};

/// How long to wait for the process to be reaped after a kill
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Launches the real console program against a serial port
#[derive(Debug, Clone)]
pub struct MeshcliLauncher {
    program: String,
    serial_port: PathBuf,
}

impl MeshcliLauncher {
    /// Create a launcher for `program -s serial_port`
    pub fn new(program: impl Into<String>, serial_port: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            serial_port: serial_port.into(),
        }
    }
}

#[async_trait]
impl DeviceLauncher for MeshcliLauncher {
    async fn launch(&self) -> Result<DeviceIo> {
        info!(
            program = %self.program,
            port = %self.serial_port.display(),
            "Starting meshcli session"
        );

        let mut child = Command::new(&self.program)
            .arg("-s")
            .arg(&self.serial_port)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::LaunchFailed {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or(BridgeError::StdioUnavailable)?;
        let stdout = child.stdout.take().ok_or(BridgeError::StdioUnavailable)?;
        let stderr = child.stderr.take().ok_or(BridgeError::StdioUnavailable)?;

        info!(pid = ?child.id(), "meshcli process started");

        Ok(DeviceIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            process: Box::new(MeshcliProcess { child }),
        })
    }

    fn device_path(&self) -> String {
        self.serial_port.display().to_string()
    }
}

/// A spawned `meshcli` child
#[derive(Debug)]
pub struct MeshcliProcess {
    child: Child,
}

#[async_trait]
impl DeviceProcess for MeshcliProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> Result<Option<ProcessExit>> {
        let status = self.child.try_wait()?;
        Ok(status.map(|s| ProcessExit { code: s.code() }))
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        debug!(pid = ?self.child.id(), "Killing meshcli process");
        self.child.start_kill()?;
        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(code = ?status.code(), "meshcli process stopped");
            }
            Err(_) => warn!("meshcli process did not exit after kill"),
        }
        Ok(())
    }
}
