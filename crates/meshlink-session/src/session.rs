//! Command session manager
//!
//! Turns the device's single untagged console into a request/response
//! service. Callers enqueue commands onto one FIFO queue; a dispatcher task
//! is the only writer of the device's stdin and runs exactly one command at
//! a time. Each dispatched command gets a monitor task that decides, from
//! output quiescence, when its reply is complete. A watchdog restarts the
//! whole process when it exits and fails every outstanding command.
//!
//! Two mutexes guard shared state: the command book (in-flight map plus the
//! current command) here, and the correlator's own state. They are never
//! held together.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adverts::AdvertLog;
use crate::classifier::{classify, split_prompt, StreamEvent};
use crate::command::{CommandOutput, CommandPhase, CommandRequest, QuiescenceRule};
use crate::config::{SessionConfig, WebuiSettings};
use crate::correlator::PacketCorrelator;
use crate::error::{BridgeError, Result};
use crate::process::{DeviceLauncher, DeviceOutput, DeviceProcess, DeviceStdin};

/// Hidden console command that prints device info as JSON
pub const NAME_QUERY_COMMAND: &str = ".infos";

/// Where the device name in use came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameSource {
    /// Configured name, nothing detected yet
    Config,
    /// Read from the interactive prompt
    Prompt,
    /// Returned by the hidden info command
    Device,
}

impl std::fmt::Display for NameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameSource::Config => write!(f, "config"),
            NameSource::Prompt => write!(f, "prompt"),
            NameSource::Device => write!(f, "device"),
        }
    }
}

/// Snapshot for health checks
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub alive: bool,
    pub device_path: String,
    pub device_name: String,
    pub name_source: NameSource,
    pub advert_log: PathBuf,
    pub echoes_log: PathBuf,
    pub acks_log: PathBuf,
    pub restarts: u64,
}

struct InFlight {
    reply: oneshot::Sender<Result<CommandOutput>>,
    lines: Vec<String>,
    phase: CommandPhase,
}

struct CurrentCommand {
    id: String,
    dispatched_at: Instant,
    last_line_at: Option<Instant>,
    abandoned_at: Option<Instant>,
}

#[derive(Default)]
struct CommandBook {
    inflight: HashMap<String, InFlight>,
    current: Option<CurrentCommand>,
}

struct DeviceName {
    name: String,
    source: NameSource,
}

enum Control {
    /// A fresh process is up; apply session settings then accept commands
    Attach {
        generation: u64,
        stdin: DeviceStdin,
        init: Vec<String>,
    },
    /// The process behind `generation` is gone
    Detach { generation: u64 },
}

struct Shared {
    config: SessionConfig,
    device_path: String,
    book: Mutex<CommandBook>,
    correlator: Arc<PacketCorrelator>,
    adverts: Arc<AdvertLog>,
    name: Mutex<DeviceName>,
    settings: Mutex<WebuiSettings>,
    alive: AtomicBool,
    shutting_down: AtomicBool,
    restarts: AtomicU64,
    queue_tx: mpsc::UnboundedSender<CommandRequest>,
    control_tx: mpsc::UnboundedSender<Control>,
    shutdown_tx: watch::Sender<bool>,
    exit_hint: Notify,
}

/// Owns the device process and serializes commands to it
pub struct SessionManager {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("device_path", &self.shared.device_path)
            .field("alive", &self.shared.alive.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Open the record logs, launch the device process, and start the
    /// dispatcher, watchdog and name detection tasks.
    pub async fn start(
        config: SessionConfig,
        launcher: Arc<dyn DeviceLauncher>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let paths = config.log_paths(&config.device_name);
        let correlator = Arc::new(PacketCorrelator::open(&paths, config.correlation.clone())?);
        let adverts = Arc::new(AdvertLog::open(&paths.adverts, config.correlation.retention)?);

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            device_path: launcher.device_path(),
            book: Mutex::new(CommandBook::default()),
            correlator,
            adverts,
            name: Mutex::new(DeviceName {
                name: config.device_name.clone(),
                source: NameSource::Config,
            }),
            settings: Mutex::new(WebuiSettings::default()),
            alive: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            queue_tx,
            control_tx,
            shutdown_tx,
            exit_hint: Notify::new(),
            config,
        });

        let dispatcher = tokio::spawn(run_dispatcher(
            shared.clone(),
            queue_rx,
            control_rx,
            shared.shutdown_tx.subscribe(),
        ));

        let process = match shared.launch_generation(launcher.as_ref(), 0).await {
            Ok(process) => process,
            Err(e) => {
                error!(error = %e, "Failed to start meshcli session");
                let _ = shared.shutdown_tx.send(true);
                return Err(e);
            }
        };

        let watchdog = tokio::spawn(run_watchdog(
            shared.clone(),
            launcher,
            process,
            shared.shutdown_tx.subscribe(),
        ));
        let detector = tokio::spawn(detect_name(shared.clone(), shared.shutdown_tx.subscribe()));

        info!(device = %shared.device_path, "meshcli session started");

        Ok(Arc::new(Self {
            shared,
            tasks: Mutex::new(vec![dispatcher, watchdog, detector]),
        }))
    }

    /// Run one command and wait for its reply.
    ///
    /// `timeout` of `None` picks the default for the command (`recv` gets
    /// the extended one).
    pub async fn submit(
        &self,
        args: Vec<String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        self.shared.submit(args, timeout).await
    }

    /// Like [`submit`](Self::submit) but folds errors into the result
    pub async fn execute(&self, args: Vec<String>, timeout: Option<Duration>) -> CommandOutput {
        match self.submit(args, timeout).await {
            Ok(output) => output,
            Err(e) => CommandOutput::from_error(&e),
        }
    }

    /// Process liveness and log locations
    pub fn health(&self) -> HealthStatus {
        let shared = &self.shared;
        let (device_name, name_source) = {
            let name = shared.name.lock();
            (name.name.clone(), name.source)
        };
        HealthStatus {
            alive: shared.alive.load(Ordering::SeqCst)
                && !shared.shutting_down.load(Ordering::SeqCst),
            device_path: shared.device_path.clone(),
            device_name,
            name_source,
            advert_log: shared.adverts.path(),
            echoes_log: shared.correlator.echo_log_path(),
            acks_log: shared.correlator.ack_log_path(),
            restarts: shared.restarts.load(Ordering::SeqCst),
        }
    }

    /// Echo/ACK correlator fed by this session
    pub fn correlator(&self) -> &Arc<PacketCorrelator> {
        &self.shared.correlator
    }

    /// Settings applied at the last (re)start
    pub fn settings(&self) -> WebuiSettings {
        self.shared.settings.lock().clone()
    }

    /// Persist the manual contact approval flag and apply it to the device
    pub async fn set_manual_add_contacts(&self, enabled: bool) -> Result<CommandOutput> {
        let path = self.shared.config.settings_path();
        let mut settings = WebuiSettings::load(&path);
        settings.manual_add_contacts = enabled;
        settings.save(&path)?;
        *self.shared.settings.lock() = settings;
        info!(enabled, "Updated manual_add_contacts setting");

        let value = if enabled { "on" } else { "off" };
        self.submit(
            vec![
                "set".to_string(),
                "manual_add_contacts".to_string(),
                value.to_string(),
            ],
            None,
        )
        .await
    }

    /// Stop all tasks, kill the process, and fail outstanding commands
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down meshcli session");
        let _ = self.shared.shutdown_tx.send(true);
        self.shared.fail_all(|| BridgeError::ShuttingDown);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task ended abnormally");
            }
        }
        self.shared.alive.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    async fn submit(&self, args: Vec<String>, timeout: Option<Duration>) -> Result<CommandOutput> {
        if args.is_empty() {
            return Err(BridgeError::EmptyCommand);
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ShuttingDown);
        }

        let verb = args[0].clone();
        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout_for(&verb));
        let min_elapsed = self.config.min_elapsed_for(&verb, timeout);
        let request = CommandRequest::new(args, min_elapsed);
        let cmd_id = request.id.clone();

        let (reply_tx, reply_rx) = oneshot::channel();
        self.book.lock().inflight.insert(
            cmd_id.clone(),
            InFlight {
                reply: reply_tx,
                lines: Vec::new(),
                phase: CommandPhase::Queued,
            },
        );

        debug!(cmd_id = %cmd_id, command = %request.command_line(), "Queued command");
        if self.queue_tx.send(request).is_err() {
            self.book.lock().inflight.remove(&cmd_id);
            return Err(BridgeError::ShuttingDown);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::ResponseLost),
            Err(_) => {
                self.abandon(&cmd_id);
                warn!(cmd_id = %cmd_id, timeout = ?timeout, "Command timed out");
                Err(BridgeError::CommandTimeout {
                    cmd_id,
                    after: timeout,
                })
            }
        }
    }

    /// Caller gave up: drop the entry, keep the device marked busy
    fn abandon(&self, cmd_id: &str) {
        let mut book = self.book.lock();
        if let Some(mut entry) = book.inflight.remove(cmd_id) {
            entry.phase = CommandPhase::TimedOut;
        }
        if let Some(current) = book.current.as_mut() {
            if current.id == cmd_id {
                current.abandoned_at = Some(Instant::now());
            }
        }
    }

    /// Fail every queued or running command and clear the current marker
    fn fail_all<F: Fn() -> BridgeError>(&self, make_error: F) {
        let mut book = self.book.lock();
        book.current = None;
        for (cmd_id, mut entry) in book.inflight.drain() {
            entry.phase = CommandPhase::Failed;
            warn!(cmd_id = %cmd_id, "Failing outstanding command");
            let _ = entry.reply.send(Err(make_error()));
        }
    }

    /// Mark `request` current. Returns false if its caller already left.
    fn begin(&self, request: &CommandRequest) -> bool {
        let mut book = self.book.lock();
        match book.inflight.get_mut(&request.id) {
            Some(entry) => entry.phase = CommandPhase::Dispatched,
            None => return false,
        }
        book.current = Some(CurrentCommand {
            id: request.id.clone(),
            dispatched_at: Instant::now(),
            last_line_at: None,
            abandoned_at: None,
        });
        true
    }

    fn fail_dispatch(&self, cmd_id: &str, reason: String) {
        let mut book = self.book.lock();
        if book.current.as_ref().is_some_and(|c| c.id == cmd_id) {
            book.current = None;
        }
        if let Some(mut entry) = book.inflight.remove(cmd_id) {
            entry.phase = CommandPhase::Failed;
            let _ = entry.reply.send(Err(BridgeError::Dispatch(reason)));
        }
    }

    /// One monitor tick. Returns true once the device is free again.
    fn check_quiescence(&self, cmd_id: &str, rule: &QuiescenceRule) -> bool {
        let mut book = self.book.lock();
        let book = &mut *book;
        let (dispatched_at, last_line_at, abandoned_at) = match book.current.as_ref() {
            Some(c) if c.id == cmd_id => (c.dispatched_at, c.last_line_at, c.abandoned_at),
            // Cleared by a process failure or shutdown
            _ => return true,
        };

        let now = Instant::now();
        let since_dispatch = now.duration_since(dispatched_at);
        let since_output = now.duration_since(last_line_at.unwrap_or(dispatched_at));

        if let Some(abandoned_at) = abandoned_at {
            let grace = self.config.timing.abandon_grace;
            if now.duration_since(abandoned_at) >= grace && since_output >= rule.poll_interval {
                debug!(cmd_id, "Releasing abandoned command");
                book.current = None;
                return true;
            }
            return false;
        }

        let phase = match book.inflight.get_mut(cmd_id) {
            Some(entry) => {
                entry.phase = entry.phase.on_tick(rule, since_dispatch, since_output);
                entry.phase
            }
            None => {
                if let Some(current) = book.current.as_mut() {
                    current.abandoned_at = Some(now);
                }
                return false;
            }
        };

        if phase != CommandPhase::Complete {
            return false;
        }

        book.current = None;
        if let Some(entry) = book.inflight.remove(cmd_id) {
            info!(
                cmd_id,
                lines = entry.lines.len(),
                elapsed_ms = since_dispatch.as_millis() as u64,
                "Command completed"
            );
            let _ = entry.reply.send(Ok(CommandOutput::from_lines(&entry.lines)));
        }
        true
    }

    fn handle_stdout_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let line = match split_prompt(line) {
            Some((name, rest)) if self.accepts_prompt(name) => {
                self.observe_name(name, NameSource::Prompt);
                if rest.is_empty() {
                    return;
                }
                rest
            }
            _ => line,
        };

        match classify(line) {
            Some(StreamEvent::Advert(value)) => self.adverts.record(value),
            Some(StreamEvent::Repeat(event)) => {
                let outcome = self.correlator.on_repeat(&event);
                debug!(?outcome, "Repeat event");
            }
            Some(StreamEvent::Ack(event)) => {
                let outcome = self.correlator.on_ack(&event);
                debug!(?outcome, "ACK event");
            }
            Some(StreamEvent::ResponseLine(text)) => self.append_response(text),
            None => {}
        }
    }

    fn append_response(&self, line: String) {
        let mut book = self.book.lock();
        let book = &mut *book;
        let Some(current) = book.current.as_mut() else {
            debug!(line = %line, "Dropping output with no current command");
            return;
        };
        current.last_line_at = Some(Instant::now());
        match book.inflight.get_mut(&current.id) {
            Some(entry) => {
                entry.lines.push(line);
                entry.phase = entry.phase.on_line();
            }
            None => debug!(cmd_id = %current.id, line = %line, "Dropping late output for abandoned command"),
        }
    }

    /// Once a name is detected only that name's prompt is stripped, so reply
    /// text containing the separator is kept whole.
    fn accepts_prompt(&self, name: &str) -> bool {
        let current = self.name.lock();
        current.source == NameSource::Config || current.name == name
    }

    /// Adopt a detected device name and move the record logs to match
    fn observe_name(&self, name: &str, source: NameSource) {
        {
            let mut current = self.name.lock();
            if current.source != NameSource::Config {
                return;
            }
            current.name = name.to_string();
            current.source = source;
        }
        info!(name, %source, "Detected device name");

        let paths = self.config.log_paths(name);
        if let Err(e) = self.correlator.retarget(&paths) {
            warn!(error = %e, "Failed to move correlator logs");
        }
        if let Err(e) = self.adverts.retarget(&paths.adverts) {
            warn!(error = %e, "Failed to move advert log");
        }
    }

    fn name_source(&self) -> NameSource {
        self.name.lock().source
    }

    /// Launch a process and hand its pipes to the readers and dispatcher
    async fn launch_generation(
        self: &Arc<Self>,
        launcher: &dyn DeviceLauncher,
        generation: u64,
    ) -> Result<Box<dyn DeviceProcess>> {
        let io = launcher.launch().await?;

        tokio::spawn(read_stdout(self.clone(), io.stdout, generation));
        tokio::spawn(read_stderr(io.stderr, generation));

        let settings = WebuiSettings::load(&self.config.settings_path());
        let init = settings
            .session_commands()
            .into_iter()
            .map(str::to_string)
            .collect();
        *self.settings.lock() = settings;

        self.control_tx
            .send(Control::Attach {
                generation,
                stdin: io.stdin,
                init,
            })
            .map_err(|_| BridgeError::ShuttingDown)?;
        self.alive.store(true, Ordering::SeqCst);
        Ok(io.process)
    }
}

async fn write_line(stdin: &mut DeviceStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

async fn run_dispatcher(
    shared: Arc<Shared>,
    mut queue_rx: mpsc::UnboundedReceiver<CommandRequest>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("Dispatcher started");
    let mut attached: Option<(u64, DeviceStdin)> = None;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            control = control_rx.recv() => match control {
                Some(Control::Attach { generation, mut stdin, init }) => {
                    tokio::time::sleep(shared.config.timing.startup_settle).await;
                    for line in &init {
                        if let Err(e) = write_line(&mut stdin, line).await {
                            error!(generation, error = %e, "Failed to apply session settings");
                            break;
                        }
                    }
                    info!(generation, settings = ?init, "Session settings applied");
                    // Let setting acknowledgements drain before the first command
                    tokio::time::sleep(shared.config.timing.poll_interval).await;
                    attached = Some((generation, stdin));
                }
                Some(Control::Detach { generation }) => {
                    if attached.as_ref().is_some_and(|(g, _)| *g == generation) {
                        debug!(generation, "Detached from exited process");
                        attached = None;
                    }
                }
                None => break,
            },
            request = queue_rx.recv(), if attached.is_some() => {
                let Some(request) = request else { break };
                let Some((_, stdin)) = attached.as_mut() else { continue };
                dispatch(&shared, stdin, request, &mut shutdown_rx).await;
            }
        }
    }
    debug!("Dispatcher exiting");
}

/// Write one command and hold the device until its monitor releases it
async fn dispatch(
    shared: &Arc<Shared>,
    stdin: &mut DeviceStdin,
    request: CommandRequest,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    if !shared.begin(&request) {
        debug!(cmd_id = %request.id, "Skipping command abandoned while queued");
        return;
    }

    let line = request.command_line();
    info!(cmd_id = %request.id, command = %line, "Sending command");
    if let Err(e) = write_line(stdin, &line).await {
        error!(cmd_id = %request.id, error = %e, "Failed to send command");
        shared.fail_dispatch(&request.id, e.to_string());
        return;
    }

    let rule = QuiescenceRule {
        poll_interval: shared.config.timing.poll_interval,
        min_elapsed: request.min_elapsed,
    };
    let (release_tx, release_rx) = oneshot::channel();
    tokio::spawn(monitor(shared.clone(), request.id, rule, release_tx));

    tokio::select! {
        _ = release_rx => {}
        _ = shutdown_rx.changed() => {}
    }
}

async fn monitor(
    shared: Arc<Shared>,
    cmd_id: String,
    rule: QuiescenceRule,
    release: oneshot::Sender<()>,
) {
    loop {
        tokio::time::sleep(rule.poll_interval).await;
        if shared.check_quiescence(&cmd_id, &rule) {
            break;
        }
    }
    let _ = release.send(());
}

async fn read_stdout(shared: Arc<Shared>, stdout: DeviceOutput, generation: u64) {
    debug!(generation, "stdout reader started");
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                shared.handle_stdout_line(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                warn!(generation, error = %e, "stdout reader error");
                break;
            }
        }
    }
    debug!(generation, "stdout reader exiting");
    shared.exit_hint.notify_one();
}

async fn read_stderr(stderr: DeviceOutput, generation: u64) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if !line.is_empty() {
                    warn!(generation, "meshcli stderr: {}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(generation, error = %e, "stderr reader error");
                break;
            }
        }
    }
}

async fn run_watchdog(
    shared: Arc<Shared>,
    launcher: Arc<dyn DeviceLauncher>,
    mut process: Box<dyn DeviceProcess>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut generation = 0u64;
    let mut ticker = tokio::time::interval(shared.config.timing.watchdog_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    'supervise: loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break 'supervise,
            _ = ticker.tick() => {}
            _ = shared.exit_hint.notified() => {}
        }

        let exit = match process.try_exit() {
            Ok(Some(exit)) => exit,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Failed to poll meshcli process");
                continue;
            }
        };

        error!(code = ?exit.code, "meshcli process died ({})", exit);
        shared.alive.store(false, Ordering::SeqCst);
        let _ = shared.control_tx.send(Control::Detach { generation });
        shared.fail_all(|| BridgeError::ProcessExited {
            exit_code: exit.code,
        });

        loop {
            info!("Attempting to restart meshcli session");
            match shared.launch_generation(launcher.as_ref(), generation + 1).await {
                Ok(next) => {
                    process = next;
                    generation += 1;
                    shared.restarts.fetch_add(1, Ordering::SeqCst);
                    info!(generation, "meshcli session restarted");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Restart failed");
                    tokio::select! {
                        _ = shutdown_rx.changed() => break 'supervise,
                        _ = tokio::time::sleep(shared.config.timing.restart_backoff) => {}
                    }
                }
            }
        }
    }

    if let Err(e) = process.terminate().await {
        warn!(error = %e, "Failed to stop meshcli process");
    }
    debug!("Watchdog exiting");
}

/// Fall back to asking the device for its name if no prompt shows up
async fn detect_name(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::select! {
        _ = shutdown_rx.changed() => return,
        _ = tokio::time::sleep(shared.config.timing.name_grace) => {}
    }
    if shared.name_source() != NameSource::Config {
        return;
    }

    debug!("No prompt seen, querying device name");
    match shared
        .submit(vec![NAME_QUERY_COMMAND.to_string()], None)
        .await
    {
        Ok(output) => match parse_infos_name(&output.stdout) {
            Some(name) => shared.observe_name(&name, NameSource::Device),
            None => info!("Device did not report a name, keeping configured name"),
        },
        Err(e) => warn!(error = %e, "Device name query failed"),
    }
}

/// Pull `name` out of the info command's JSON output
pub fn parse_infos_name(stdout: &str) -> Option<String> {
    let from_value = |value: serde_json::Value| {
        value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    };

    if let Some(start) = stdout.find('{') {
        if let Ok(value) = serde_json::from_str(&stdout[start..]) {
            if let Some(name) = from_value(value) {
                return Some(name);
            }
        }
    }
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str(line.trim()).ok())
        .find_map(from_value)
}
