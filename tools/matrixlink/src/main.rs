//! matrixlink - command-line control panel for a multi-matrix router
//!
//! `run` connects to a device and reads panel commands from stdin.
//! `simulate` serves a simulated device for trying the panel out.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use matrixlink_panel::{MatrixKind, Panel, PanelCommand, PanelConfig, PanelEvent, Surface};
use matrixlink_test_utils::{DeviceModel, SimulatedDevice};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// matrixlink - matrix routing control panel
#[derive(Parser)]
#[command(name = "matrixlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a device and read panel commands from stdin
    Run {
        /// Panel configuration file (TOML)
        #[arg(short, long, env = "MATRIXLINK_CONFIG")]
        config: Option<PathBuf>,

        /// Device host, overrides the configuration
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Device port, overrides the configuration
        #[arg(short, long)]
        port: Option<u16>,

        /// Write the configuration with discovered counts here on exit
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Serve a simulated device
    Simulate {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        listen: String,

        /// Inputs per matrix
        #[arg(short, long, default_value = "16")]
        inputs: u32,

        /// Outputs per matrix
        #[arg(short, long, default_value = "8")]
        outputs: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Commands::Run {
            config,
            host,
            port,
            save,
        } => {
            let mut config = match config {
                Some(path) => PanelConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => PanelConfig::default(),
            };
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            run_panel(config, save).await?;
        }

        Commands::Simulate {
            listen,
            inputs,
            outputs,
        } => {
            simulate(&listen, inputs, outputs).await?;
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }

    Ok(())
}

async fn run_panel(config: PanelConfig, save: Option<PathBuf>) -> Result<()> {
    println!(
        "{} Connecting to {}",
        "MATRIXLINK".cyan().bold(),
        config.address()
    );

    let panel = Panel::new(config).context("Invalid panel configuration")?;
    let events = tokio::spawn(log_events(panel.subscribe_events()));
    panel.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                handle_line(&panel, line).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    panel.shutdown().await;
    events.abort();

    if let Some(path) = save {
        let toml = panel.discovered_config().to_toml()?;
        std::fs::write(&path, toml)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} Saved {}", "MATRIXLINK".cyan().bold(), path.display());
    }

    Ok(())
}

async fn handle_line(panel: &Arc<Panel>, line: &str) {
    let command = match line.parse::<PanelCommand>() {
        Ok(command) => command,
        Err(e) => {
            println!("{} {}", "error:".red().bold(), e);
            return;
        }
    };

    match command {
        PanelCommand::Status => print_status(panel),
        PanelCommand::Action(action) => {
            if let Err(e) = panel.dispatch(action).await {
                println!("{} {}", "error:".red().bold(), e);
            }
        }
    }
}

fn print_status(panel: &Panel) {
    let surface = panel.surface();
    println!("state:     {}", panel.state());
    println!("selection: {}", panel.routing().selection());
    for (name, value) in surface.selection_variables() {
        println!("  {:<28} {}", name, value);
    }
    println!(
        "take {}  clear {}  undo {}",
        flag(surface.take_possible()),
        flag(surface.clear_possible()),
        flag(surface.undo_possible())
    );
    print_routes(surface);
}

/// Routed inputs of the selected matrix
fn print_routes(surface: &Surface) {
    let Some(kind) = MatrixKind::ALL
        .into_iter()
        .find(|k| surface.matrix_selected(*k))
    else {
        return;
    };
    let prefix = format!("output_{}_", kind.name());
    for (id, value) in surface.variables() {
        if id.starts_with(&prefix) && id.ends_with("_input") {
            println!("  {:<28} {}", id, value);
        }
    }
}

fn flag(on: bool) -> colored::ColoredString {
    if on {
        "yes".green()
    } else {
        "no".dimmed()
    }
}

async fn log_events(mut events: broadcast::Receiver<PanelEvent>) {
    loop {
        match events.recv().await {
            Ok(PanelEvent::SessionState(state)) => info!("Session {}", state),
            Ok(PanelEvent::TakeCompleted {
                matrix,
                target,
                source,
                ok,
            }) => {
                if ok {
                    info!("{} take {} -> {} confirmed", matrix, source, target);
                } else {
                    warn!("{} take {} -> {} rejected", matrix, source, target);
                }
            }
            Ok(PanelEvent::RoutesChanged { matrix, targets }) => {
                debug!("{} routes changed {:?}", matrix, targets)
            }
            Ok(PanelEvent::LabelsChanged { matrix }) => debug!("{} labels changed", matrix),
            Ok(PanelEvent::SelectionChanged(selection)) => debug!("Selection {}", selection),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event log skipped {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn simulate(listen: &str, inputs: u32, outputs: u32) -> Result<()> {
    let device = SimulatedDevice::start_on(listen, DeviceModel::standard(outputs, inputs))
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;

    println!(
        "{} Simulated device on {} ({} inputs, {} outputs per matrix)",
        "MATRIXLINK".cyan().bold(),
        device.addr(),
        inputs,
        outputs
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    info!("Received shutdown signal");
    Ok(())
}
