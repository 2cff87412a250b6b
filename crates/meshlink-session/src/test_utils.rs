//! Scripted fake device for session tests
//!
//! [`ScriptedLauncher`] stands in for the real `meshcli` console. Each launch
//! creates in-memory pipes and a small device task that records every line
//! written to it and answers according to per-command rules. Tests can also
//! inject unsolicited output or make the process exit.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshlink_session::test_utils::ScriptedLauncher;
//!
//! let device = ScriptedLauncher::new()
//!     .respond("status", ["Battery: 4.1V", "Uptime: 3h", "Queue: 0"])
//!     .exit_on("reboot", Some(1));
//! let session = SessionManager::start(config, Arc::new(device.clone())).await?;
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{BridgeError, Result};
use crate::process::{DeviceIo, DeviceLauncher, DeviceProcess, ProcessExit};

/// In-memory pipe capacity
const PIPE_CAPACITY: usize = 64 * 1024;

/// Lines written by session setup, not by callers
pub const SESSION_SETTING_LINES: &[&str] = &[
    "set json_log_rx on",
    "set print_adverts on",
    "msgs_subscribe",
    "set manual_add_contacts on",
];

/// What the fake device does when it reads a command
#[derive(Debug, Clone)]
pub enum Reply {
    /// Print lines after an optional delay
    Lines {
        delay: Duration,
        lines: Vec<String>,
    },
    /// Exit with the given code without answering
    Exit { code: Option<i32> },
}

enum DeviceControl {
    Stdout(String),
    Stderr(String),
    Exit(Option<i32>),
}

#[derive(Default)]
struct ScriptState {
    rules: Mutex<Vec<(String, Reply)>>,
    received: Mutex<Vec<String>>,
    launches: AtomicUsize,
    failing_launches: AtomicUsize,
    prompt: Mutex<Option<String>>,
    control: Mutex<Option<mpsc::UnboundedSender<DeviceControl>>>,
}

impl ScriptState {
    fn reply_for(&self, line: &str) -> Option<Reply> {
        let verb = line.split_whitespace().next().unwrap_or_default();
        self.rules
            .lock()
            .iter()
            .rev()
            .find(|(v, _)| v == verb)
            .map(|(_, reply)| reply.clone())
    }
}

/// Launcher producing scripted in-memory device processes
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    state: Arc<ScriptState>,
}

impl std::fmt::Debug for ScriptedLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedLauncher")
            .field("launches", &self.launch_count())
            .finish_non_exhaustive()
    }
}

impl ScriptedLauncher {
    /// A device that never answers anything
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `verb` with `lines` immediately
    pub fn respond<I, S>(self, verb: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.respond_after(verb, Duration::ZERO, lines)
    }

    /// Answer `verb` with `lines` after `delay`
    pub fn respond_after<I, S>(self, verb: &str, delay: Duration, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reply = Reply::Lines {
            delay,
            lines: lines.into_iter().map(Into::into).collect(),
        };
        self.state.rules.lock().push((verb.to_string(), reply));
        self
    }

    /// Exit the process when `verb` is received
    pub fn exit_on(self, verb: &str, code: Option<i32>) -> Self {
        self.state
            .rules
            .lock()
            .push((verb.to_string(), Reply::Exit { code }));
        self
    }

    /// Print `<name>|*` as soon as the process starts
    pub fn with_prompt(self, name: &str) -> Self {
        *self.state.prompt.lock() = Some(name.to_string());
        self
    }

    /// Make the next `n` launches fail
    pub fn fail_next_launches(&self, n: usize) {
        self.state.failing_launches.store(n, Ordering::SeqCst);
    }

    /// Every line the device has read, across restarts
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    /// Lines read from callers, without session setup commands
    pub fn received_commands(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter(|line| !SESSION_SETTING_LINES.contains(&line.as_str()))
            .collect()
    }

    /// Number of launch attempts so far
    pub fn launch_count(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Print an unsolicited stdout line on the running device
    pub fn emit(&self, line: &str) {
        self.send(DeviceControl::Stdout(line.to_string()));
    }

    /// Print a stderr line on the running device
    pub fn emit_stderr(&self, line: &str) {
        self.send(DeviceControl::Stderr(line.to_string()));
    }

    /// Make the running device exit
    pub fn crash(&self, code: Option<i32>) {
        self.send(DeviceControl::Exit(code));
    }

    fn send(&self, msg: DeviceControl) {
        if let Some(tx) = self.state.control.lock().as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Poll until `n` launches happened or `within` elapses
    pub async fn wait_for_launches(&self, n: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.launch_count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.launch_count() >= n
    }
}

#[async_trait]
impl DeviceLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<DeviceIo> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);

        let failing = self.state.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.state
                .failing_launches
                .store(failing - 1, Ordering::SeqCst);
            return Err(BridgeError::LaunchFailed {
                program: "scripted".to_string(),
                reason: "scripted launch failure".to_string(),
            });
        }

        let (stdin_host, stdin_dev) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_dev, stdout_host) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_dev, stderr_host) = tokio::io::duplex(PIPE_CAPACITY);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let exit = Arc::new(Mutex::new(None));

        *self.state.control.lock() = Some(control_tx.clone());

        tokio::spawn(run_device(
            self.state.clone(),
            stdin_dev,
            stdout_dev,
            stderr_dev,
            control_rx,
            exit.clone(),
        ));

        Ok(DeviceIo {
            stdin: Box::new(stdin_host),
            stdout: Box::new(stdout_host),
            stderr: Box::new(stderr_host),
            process: Box::new(ScriptedProcess {
                exit,
                control: control_tx,
            }),
        })
    }

    fn device_path(&self) -> String {
        "scripted://device".to_string()
    }
}

async fn run_device(
    state: Arc<ScriptState>,
    stdin: DuplexStream,
    mut stdout: DuplexStream,
    mut stderr: DuplexStream,
    mut control: mpsc::UnboundedReceiver<DeviceControl>,
    exit: Arc<Mutex<Option<ProcessExit>>>,
) {
    let mut lines = BufReader::new(stdin).lines();

    let prompt = state.prompt.lock().clone();
    if let Some(name) = prompt {
        let _ = stdout.write_all(format!("{}|*\n", name).as_bytes()).await;
    }

    let code = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => break None,
                };
                debug!(line = %line, "Scripted device read line");
                state.received.lock().push(line.clone());
                match state.reply_for(&line) {
                    Some(Reply::Lines { delay, lines: reply }) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        for out in reply {
                            let _ = stdout.write_all(format!("{}\n", out).as_bytes()).await;
                        }
                    }
                    Some(Reply::Exit { code }) => break code,
                    None => {}
                }
            }
            msg = control.recv() => match msg {
                Some(DeviceControl::Stdout(line)) => {
                    let _ = stdout.write_all(format!("{}\n", line).as_bytes()).await;
                }
                Some(DeviceControl::Stderr(line)) => {
                    let _ = stderr.write_all(format!("{}\n", line).as_bytes()).await;
                }
                Some(DeviceControl::Exit(code)) => break code,
                None => break None,
            }
        }
    };

    // Exit status becomes visible before the pipes close
    exit.lock().get_or_insert(ProcessExit { code });
    drop(stdout);
    drop(stderr);
}

struct ScriptedProcess {
    exit: Arc<Mutex<Option<ProcessExit>>>,
    control: mpsc::UnboundedSender<DeviceControl>,
}

#[async_trait]
impl DeviceProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_exit(&mut self) -> Result<Option<ProcessExit>> {
        Ok(*self.exit.lock())
    }

    async fn terminate(&mut self) -> Result<()> {
        self.exit.lock().get_or_insert(ProcessExit { code: None });
        let _ = self.control.send(DeviceControl::Exit(None));
        Ok(())
    }
}

/// Session config with short windows, rooted in `dir`
pub fn fast_config(dir: &std::path::Path) -> SessionConfig {
    crate::config::SessionConfigBuilder::new()
        .config_dir(dir)
        .device_name("TestNode")
        .poll_interval(Duration::from_millis(100))
        .default_timeout(Duration::from_secs(5))
        .watchdog_interval(Duration::from_millis(50))
        .restart_backoff(Duration::from_millis(100))
        .name_grace(Duration::from_secs(3600))
        .abandon_grace(Duration::from_millis(500))
        .startup_settle(Duration::ZERO)
        .build()
}
