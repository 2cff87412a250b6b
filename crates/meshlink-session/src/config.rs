//! Configuration types for the device session
//!
//! This module provides the session configuration (device, paths, timing
//! windows), the persisted web UI settings that feed session setup, the
//! per-device log file layout, and serial device auto-detection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

/// Default serial port for the device console
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Default console program
pub const DEFAULT_MESHCLI_PROGRAM: &str = "meshcli";

/// Name used for log files until the device reports its own
pub const DEFAULT_DEVICE_NAME: &str = "MeshCore";

/// Default caller timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default caller timeout for `recv`
pub const RECV_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default quiescence poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Settings file shared with the web front end
pub const SETTINGS_FILE_NAME: &str = ".webui_settings.json";

/// Serial paths tried when the port is set to `auto`
const COMMON_DEVICE_PATHS: &[&str] = &[
    "/dev/serial/by-id/*",
    "/dev/ttyUSB*",
    "/dev/ttyACM*",
    "/dev/tty.usbserial-*",
    "/dev/cu.usbserial-*",
];

/// Main configuration for a device session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Serial port passed to the console program
    #[serde(default = "default_serial_port")]
    pub serial_port: PathBuf,

    /// Console program to launch
    #[serde(default = "default_meshcli_program")]
    pub meshcli_program: String,

    /// Directory holding settings and log files
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Device name used for log file names until auto-detection
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Commands whose results arrive late (minimum elapsed applies)
    #[serde(default = "default_slow_commands")]
    pub slow_commands: Vec<String>,

    /// Command timing windows
    #[serde(default)]
    pub timing: TimingConfig,

    /// Echo/ACK correlation windows
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

fn default_serial_port() -> PathBuf {
    PathBuf::from(DEFAULT_SERIAL_PORT)
}

fn default_meshcli_program() -> String {
    DEFAULT_MESHCLI_PROGRAM.to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/config")
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

fn default_slow_commands() -> Vec<String> {
    ["recv", "wait_msg", "wait_ack", "trace"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            serial_port: default_serial_port(),
            meshcli_program: default_meshcli_program(),
            config_dir: default_config_dir(),
            device_name: default_device_name(),
            slow_commands: default_slow_commands(),
            timing: TimingConfig::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Whether `command` is known to produce delayed output
    pub fn is_slow_command(&self, command: &str) -> bool {
        self.slow_commands.iter().any(|c| c == command)
    }

    /// Caller timeout to use when none was given
    pub fn default_timeout_for(&self, command: &str) -> Duration {
        if command == "recv" {
            self.timing.recv_timeout
        } else {
            self.timing.default_timeout
        }
    }

    /// Minimum time a command must run before quiescence can complete it
    pub fn min_elapsed_for(&self, command: &str, timeout: Duration) -> Duration {
        if self.is_slow_command(command) {
            timeout.mul_f64(self.timing.slow_command_fraction)
        } else {
            Duration::ZERO
        }
    }

    /// Log file layout for the given device name
    pub fn log_paths(&self, device_name: &str) -> LogPaths {
        LogPaths::new(&self.config_dir, device_name)
    }

    /// Path of the web UI settings file
    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE_NAME)
    }

    /// Reject windows that would make the session misbehave
    pub fn validate(&self) -> Result<()> {
        if self.timing.poll_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.timing.slow_command_fraction) {
            return Err(BridgeError::InvalidConfig(format!(
                "slow_command_fraction {} outside [0, 1)",
                self.timing.slow_command_fraction
            )));
        }
        if self.device_name.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "device_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timing windows for command completion and supervision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Caller timeout when none is supplied
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub default_timeout: Duration,

    /// Caller timeout for `recv` when none is supplied
    #[serde(with = "humantime_serde", default = "default_recv_timeout")]
    pub recv_timeout: Duration,

    /// Quiescence window and monitor poll interval
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Fraction of the caller timeout slow commands must run for
    #[serde(default = "default_slow_fraction")]
    pub slow_command_fraction: f64,

    /// Process liveness poll interval
    #[serde(with = "humantime_serde", default = "default_watchdog_interval")]
    pub watchdog_interval: Duration,

    /// Delay before retrying a failed relaunch
    #[serde(with = "humantime_serde", default = "default_restart_backoff")]
    pub restart_backoff: Duration,

    /// How long to wait for a prompt before asking the device for its name
    #[serde(with = "humantime_serde", default = "default_name_grace")]
    pub name_grace: Duration,

    /// Longest an abandoned command may hold the device after its caller left
    #[serde(with = "humantime_serde", default = "default_abandon_grace")]
    pub abandon_grace: Duration,

    /// Pause after launch before session configuration is written
    #[serde(with = "humantime_serde", default = "default_startup_settle")]
    pub startup_settle: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

fn default_recv_timeout() -> Duration {
    RECV_COMMAND_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_slow_fraction() -> f64 {
    0.7
}

fn default_watchdog_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_restart_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_name_grace() -> Duration {
    Duration::from_secs(3)
}

fn default_abandon_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_startup_settle() -> Duration {
    Duration::from_millis(500)
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            recv_timeout: default_recv_timeout(),
            poll_interval: default_poll_interval(),
            slow_command_fraction: default_slow_fraction(),
            watchdog_interval: default_watchdog_interval(),
            restart_backoff: default_restart_backoff(),
            name_grace: default_name_grace(),
            abandon_grace: default_abandon_grace(),
            startup_settle: default_startup_settle(),
        }
    }
}

/// Echo and ACK correlation windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// How long a registered send waits for its first repeat
    #[serde(with = "humantime_serde", default = "default_echo_window")]
    pub echo_window: Duration,

    /// Timestamp tolerance when looking up echo counts
    #[serde(with = "humantime_serde", default = "default_echo_match_window")]
    pub echo_match_window: Duration,

    /// Age after which persisted records are dropped
    #[serde(with = "humantime_serde", default = "default_retention")]
    pub retention: Duration,
}

fn default_echo_window() -> Duration {
    Duration::from_secs(60)
}

fn default_echo_match_window() -> Duration {
    Duration::from_secs(5)
}

fn default_retention() -> Duration {
    meshlink_core::RECORD_RETENTION
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            echo_window: default_echo_window(),
            echo_match_window: default_echo_match_window(),
            retention: default_retention(),
        }
    }
}

/// Builder for SessionConfig
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set serial port path
    pub fn serial_port(mut self, port: impl Into<PathBuf>) -> Self {
        self.config.serial_port = port.into();
        self
    }

    /// Set console program
    pub fn meshcli_program(mut self, program: impl Into<String>) -> Self {
        self.config.meshcli_program = program.into();
        self
    }

    /// Set config/log directory
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.config_dir = dir.into();
        self
    }

    /// Set the initial device name
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.config.device_name = name.into();
        self
    }

    /// Set the quiescence poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.timing.poll_interval = interval;
        self
    }

    /// Set the default caller timeout
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.timing.default_timeout = timeout;
        self
    }

    /// Set the watchdog poll interval
    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.config.timing.watchdog_interval = interval;
        self
    }

    /// Set the relaunch backoff
    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.config.timing.restart_backoff = backoff;
        self
    }

    /// Set the prompt grace period before the name query
    pub fn name_grace(mut self, grace: Duration) -> Self {
        self.config.timing.name_grace = grace;
        self
    }

    /// Set the abandoned-command grace
    pub fn abandon_grace(mut self, grace: Duration) -> Self {
        self.config.timing.abandon_grace = grace;
        self
    }

    /// Set the post-launch settle time
    pub fn startup_settle(mut self, settle: Duration) -> Self {
        self.config.timing.startup_settle = settle;
        self
    }

    /// Replace the slow command list
    pub fn slow_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.slow_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Set the pending-send window
    pub fn echo_window(mut self, window: Duration) -> Self {
        self.config.correlation.echo_window = window;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Settings shared with the web front end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebuiSettings {
    /// Require manual approval for new contacts
    #[serde(default)]
    pub manual_add_contacts: bool,

    /// Fields owned by the front end, preserved on save
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WebuiSettings {
    /// Load settings, falling back to defaults if the file is missing or bad
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(settings) => {
                    info!(path = %path.display(), "Loaded webui settings");
                    settings
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse webui settings");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No webui settings file found, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read webui settings");
                Self::default()
            }
        }
    }

    /// Write settings back, pretty-printed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Session configuration commands derived from these settings
    pub fn session_commands(&self) -> Vec<&'static str> {
        let mut commands = vec!["set json_log_rx on", "set print_adverts on", "msgs_subscribe"];
        if self.manual_add_contacts {
            commands.push("set manual_add_contacts on");
        }
        commands
    }
}

/// Per-device log files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// Advert log
    pub adverts: PathBuf,
    /// Echo and incoming-path log
    pub echoes: PathBuf,
    /// ACK log
    pub acks: PathBuf,
}

impl LogPaths {
    /// Layout for `device_name` under `dir`
    pub fn new(dir: &Path, device_name: &str) -> Self {
        let stem = sanitize_file_stem(device_name);
        Self {
            adverts: dir.join(format!("{}.adverts.jsonl", stem)),
            echoes: dir.join(format!("{}.echoes.jsonl", stem)),
            acks: dir.join(format!("{}.acks.jsonl", stem)),
        }
    }
}

/// Keep device names usable as file stems
fn sanitize_file_stem(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect()
}

/// Where the serial port setting came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialPortSource {
    /// Given explicitly on the command line or in config
    Config,
    /// Read from the environment
    Env,
    /// Found by scanning for USB serial devices
    Detected,
}

impl std::fmt::Display for SerialPortSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerialPortSource::Config => write!(f, "config"),
            SerialPortSource::Env => write!(f, "env"),
            SerialPortSource::Detected => write!(f, "detected"),
        }
    }
}

/// Find the first serial device matching the usual USB console paths
pub fn detect_serial_port() -> Result<PathBuf> {
    for pattern in COMMON_DEVICE_PATHS {
        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(pattern, error = %e, "Bad device glob");
                continue;
            }
        };
        let mut matches: Vec<PathBuf> = entries.flatten().filter(|p| p.exists()).collect();
        matches.sort();
        if let Some(path) = matches.into_iter().next() {
            info!(path = %path.display(), "Detected serial device");
            return Ok(path);
        }
    }
    Err(BridgeError::DeviceNotFound)
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
