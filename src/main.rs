//! traffic-replay: HTTP record, diff and replay engine.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌───────────────────────────────────────────────────────┐
//!   pcap file /    │  ┌─────────┐    ┌──────────┐    ┌────────────────┐    │
//!   interface ─────┼─▶│ capture │───▶│ exchange │───▶│   projection   │    │
//!                  │  │ session │    │  model   │    │ schema + diff  │    │
//!                  │  └─────────┘    └──────────┘    └───────┬────────┘    │
//!                  │                                         │             │
//!                  │             record ┌────────────────────┴──┐ compare  │
//!                  │                    ▼                       ▼          │
//!                  │              ┌──────────┐           ┌──────────┐      │
//!                  │              │ storage  │◀──────────│ matching │      │
//!                  │              │ corpus   │           └────┬─────┘      │
//!                  │              └──────────┘                │            │
//!   Device under   │  ┌─────────┐                             ▼            │
//!   test ◀─────────┼─▶│  http   │──────────────────────▶ ┌──────────┐      │
//!                  │  │ replay  │                        │  report  │      │
//!                  │  └─────────┘                        │  junit   │      │
//!                  │                                     └──────────┘      │
//!                  └───────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use traffic_replay::capture::{open_source, CaptureSession};
use traffic_replay::config::{load_or_default, validate_config, ConfigError, EngineConfig};
use traffic_replay::error::EngineError;
use traffic_replay::http::ReplayServer;
use traffic_replay::lifecycle::signals::spawn_interrupt_handler;
use traffic_replay::lifecycle::SessionSummary;
use traffic_replay::observability::{logging, metrics};
use traffic_replay::storage::CorpusStore;

#[derive(Parser)]
#[command(name = "traffic-replay")]
#[command(about = "Record, compare and replay HTTP traffic", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a corpus on first run, compare against it afterwards
    Capture {
        app: String,
        /// Read packets from a capture file
        #[arg(long, conflicts_with = "interface")]
        pcap: Option<PathBuf>,
        /// Capture live from a network interface
        #[arg(short, long)]
        interface: Option<String>,
        /// TCP port to observe
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Answer requests from a recorded corpus
    Replay {
        app: String,
        /// Listen address, e.g. 0.0.0.0:8080
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Delete recorded corpora (all of them without an app)
    Clear { app: Option<String> },
    /// Validate the configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_or_default(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli.command);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "traffic-replay starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.command {
        Commands::Capture { app, .. } => {
            let source = open_source(&config.capture).map_err(EngineError::from)?;
            let session = CaptureSession::new(config, app);
            let interrupt = spawn_interrupt_handler(session.control());
            let summary = session.run(source).await?;
            interrupt.abort();
            print_summary(&summary);
        }
        Commands::Replay { app, .. } => {
            let address = config.listener.bind_address.clone();
            let server = ReplayServer::new(config, app)?;
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|source| EngineError::Bind { address, source })?;
            let interrupt = spawn_interrupt_handler(server.control());
            let summary = server.run(listener).await?;
            interrupt.abort();
            print_summary(&summary);
        }
        Commands::Clear { app } => {
            let store = CorpusStore::new(&config.storage.corpus_dir);
            match app {
                Some(app) => {
                    if store.clear(&app).map_err(EngineError::from)? {
                        println!("Cleared corpus for {app}");
                    } else {
                        println!("No corpus recorded for {app}");
                    }
                }
                None => {
                    let cleared = store.clear_all().map_err(EngineError::from)?;
                    println!("Cleared {} corpora", cleared.len());
                }
            }
        }
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Command-line flags take precedence over the configuration file.
fn apply_overrides(config: &mut EngineConfig, command: &Commands) {
    match command {
        Commands::Capture {
            pcap, interface, port, ..
        } => {
            if let Some(pcap) = pcap {
                config.capture.pcap_file = Some(pcap.clone());
                config.capture.interface = None;
            }
            if let Some(interface) = interface {
                config.capture.interface = Some(interface.clone());
                config.capture.pcap_file = None;
            }
            if let Some(port) = port {
                config.capture.port = *port;
            }
        }
        Commands::Replay { bind: Some(bind), .. } => {
            config.listener.bind_address = bind.clone();
        }
        _ => {}
    }
}

fn print_summary(summary: &SessionSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "Failed to render session summary"),
    }
}
