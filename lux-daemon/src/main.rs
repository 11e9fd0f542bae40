//! luxd - daemon de iluminação ambiente
//!
//! Dono do orquestrador de instâncias: restaura o registro, executa a
//! varredura inicial e serializa comandos, eventos de instância e eventos
//! de energia em um único loop de controle.
//!
//! ## Environment Variables
//! - `LUX_CONFIG`: configuration file (TOML)
//! - `LUX_STATE`: state file (overrides `[daemon] state_file`)
//! - `LUX_LOG` / `RUST_LOG`: log filter (default: `lux=info`)
//!
//! ## Signals (Unix)
//! - `SIGUSR1`: host is suspending (hibernate)
//! - `SIGUSR2`: host resumed
//! - `SIGINT` / `SIGTERM`: shutdown

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lux_daemon::config::DaemonConfig;
use lux_daemon::control::ControlLoop;
use lux_daemon::state;
use lux_device::{DefaultPortFactory, DeviceConfig, DeviceOutputPort, PortFactory};
use lux_orchestration::{
    EventFilter, InstanceOrchestrator, MemoryRegistry, OrchestratorConfig, PowerEventBridge,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "luxd")]
#[command(author = "SIL Contributors")]
#[command(version = "2026.1.16")]
#[command(about = "Ambient-lighting daemon for FTDI/MPSSE LED strips", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE", env = "LUX_CONFIG")]
    config: Option<PathBuf>,

    /// State file restored at startup and written at exit
    #[arg(short, long, value_name = "FILE", env = "LUX_STATE")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List the devices a device type can open
    Discover {
        /// Device type (ftdi, virtual)
        #[arg(short = 't', long = "type", default_value = "ftdi")]
        device_type: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LUX_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "lux=info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };

    match cli.command {
        Some(Command::Discover { device_type }) => discover(&device_type),
        None => run(config, cli.state).await,
    }
}

fn discover(device_type: &str) -> anyhow::Result<()> {
    let factory = DefaultPortFactory::new();
    let mut port = factory
        .create(&DeviceConfig::with_type(device_type))
        .with_context(|| format!("supported types: {}", factory.supported_types().join(", ")))?;

    let result = port.discover(&serde_json::Value::Null);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run(config: DaemonConfig, state_override: Option<PathBuf>) -> anyhow::Result<()> {
    let (mut orchestrator, events) = InstanceOrchestrator::with_config(
        OrchestratorConfig {
            event_history_size: config.daemon.event_history,
        },
        Box::new(MemoryRegistry::new()),
        Arc::new(DefaultPortFactory::new()),
    );

    let state_file = state_override.or_else(|| config.daemon.state_file.clone());
    let saved = match &state_file {
        Some(path) => state::load(path)?,
        None => None,
    };
    if let Some(document) = saved.or_else(|| config.to_backup()) {
        orchestrator
            .restore_backup(&document)
            .context("cannot restore the instance registry")?;
    }

    orchestrator.event_bus().on(EventFilter::All, |event| {
        info!(?event, "Orchestrator event");
    })?;

    orchestrator.start_all();

    let (bridge, power) = PowerEventBridge::channel();
    watch_power_signals(bridge)?;

    // o handle mantém o canal de comandos aberto enquanto o daemon vive
    let (control, _handle) = ControlLoop::new(orchestrator, events, power, state_file);
    control.run(shutdown_signal()).await
}

#[cfg(unix)]
fn watch_power_signals(bridge: PowerEventBridge) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut suspend = signal(SignalKind::user_defined1()).context("cannot watch SIGUSR1")?;
    let mut resume = signal(SignalKind::user_defined2()).context("cannot watch SIGUSR2")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = suspend.recv() => { bridge.notify(false); }
                Some(()) = resume.recv() => { bridge.notify(true); }
                else => break,
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn watch_power_signals(_bridge: PowerEventBridge) -> anyhow::Result<()> {
    warn!("Power signals are not available on this platform");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
