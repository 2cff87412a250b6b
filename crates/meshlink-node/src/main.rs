//! meshlink node - MeshCore bridge service
//!
//! This binary runs the device bridge with:
//! - A persistent `meshcli` session on the serial port, restarted on exit
//! - REST API for commands, health, echoes and ACKs
//! - WebSocket endpoint for interactive command sessions

use clap::parser::ValueSource;
use clap::{CommandFactory, FromArgMatches, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use meshlink_node::{server, AppState};
use meshlink_session::config::{
    DEFAULT_DEVICE_NAME, DEFAULT_MESHCLI_PROGRAM, DEFAULT_SERIAL_PORT,
};
use meshlink_session::{
    detect_serial_port, MeshcliLauncher, SerialPortSource, SessionConfigBuilder, SessionManager,
};

/// Serial port value that triggers device scanning
const AUTO_PORT: &str = "auto";

#[derive(Parser)]
#[command(name = "meshlink-node")]
#[command(about = "MeshCore serial bridge with HTTP and WebSocket API")]
struct Args {
    /// Serial device, or "auto" to scan for one
    #[arg(long, env = "MC_SERIAL_PORT", default_value = DEFAULT_SERIAL_PORT)]
    serial_port: String,

    /// Directory holding meshcli config, settings and JSONL logs
    #[arg(long, env = "MC_CONFIG_DIR", default_value = "/config")]
    config_dir: PathBuf,

    /// Device name used for log files until the device reports its own
    #[arg(long, env = "MC_DEVICE_NAME", default_value = DEFAULT_DEVICE_NAME)]
    device_name: String,

    /// meshcli executable
    #[arg(long, env = "MC_MESHCLI_BIN", default_value = DEFAULT_MESHCLI_PROGRAM)]
    meshcli: String,

    /// HTTP server port
    #[arg(long, default_value_t = 5001)]
    http_port: u16,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches)?;

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (serial_port, serial_port_source) = resolve_serial_port(&args, &matches)?;

    info!("Starting meshlink node v{}", meshlink_session::VERSION);
    info!(
        port = %serial_port.display(),
        source = %serial_port_source,
        "Using serial port"
    );

    let config = SessionConfigBuilder::new()
        .serial_port(&serial_port)
        .meshcli_program(&args.meshcli)
        .config_dir(&args.config_dir)
        .device_name(&args.device_name)
        .build();

    let launcher = MeshcliLauncher::new(&args.meshcli, &serial_port);
    let session = SessionManager::start(config, Arc::new(launcher)).await?;

    let state = Arc::new(AppState::new(session.clone(), serial_port_source));
    let app = server::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("========================================");
    info!("  HTTP API:   http://{}", actual_addr);
    info!("  WebSocket:  ws://{}/ws", actual_addr);
    info!("  Logs:       {}", args.config_dir.display());
    info!("========================================");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown().await;
    info!("Node stopped");
    Ok(())
}

/// Pick the serial port and remember where it came from
fn resolve_serial_port(
    args: &Args,
    matches: &clap::ArgMatches,
) -> anyhow::Result<(PathBuf, SerialPortSource)> {
    if args.serial_port.eq_ignore_ascii_case(AUTO_PORT) {
        let port = detect_serial_port()?;
        return Ok((port, SerialPortSource::Detected));
    }

    let source = match matches.value_source("serial_port") {
        Some(ValueSource::EnvVariable) => SerialPortSource::Env,
        _ => SerialPortSource::Config,
    };
    Ok((PathBuf::from(&args.serial_port), source))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
