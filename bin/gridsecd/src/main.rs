//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the gridsec daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gridsec_common::{init_tracing, AppConfig, Mode, PersistenceBackend};
use gridsec_core::EngineBuilder;
use gridsec_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use gridsec_net::{mqtt_transport, ApiServerBuilder};
use gridsec_persistence::{JournalStore, MemoryStore, PersistenceMetrics, RecordStore};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("gridsecd ", env!("CARGO_PKG_VERSION")),
    about = "gridsec state-sync and threat-scoring daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override telemetry mode")]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Hardware,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Hardware => Mode::Hardware,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the engine, API and metrics exporter")]
    Run,
    #[command(about = "Validate the configuration and print the effective settings")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/gridsec.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    let load_duration = load_started.elapsed();
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            let rendered = toml::to_string_pretty(&config)
                .context("failed to render effective configuration")?;
            println!("# source: {}\n{rendered}", loaded.source.display());
            Ok(())
        }
        Commands::Run => {
            init_tracing("gridsecd", &config.logging)?;
            info!(source = %loaded.source.display(), mode = config.mode.as_str(), "configuration loaded");

            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            let profile = if cfg!(debug_assertions) { "debug" } else { "release" };
            daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), config.mode.as_str(), profile);

            run_daemon(config, registry).await
        }
    }
}

fn open_records(config: &AppConfig, registry: &SharedRegistry) -> Result<Arc<dyn RecordStore>> {
    match config.persistence.backend {
        PersistenceBackend::Journal => {
            let metrics = PersistenceMetrics::new(registry.clone())?;
            let store = JournalStore::open(&config.persistence.directory)
                .with_context(|| {
                    format!(
                        "failed to open journals in {}",
                        config.persistence.directory.display()
                    )
                })?
                .with_metrics(metrics);
            info!(directory = %store.directory().display(), "journal persistence enabled");
            Ok(Arc::new(store))
        }
        PersistenceBackend::Memory => {
            warn!("in-memory persistence selected; records are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry.clone(), config.metrics.listen).await?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let records = open_records(&config, &registry)?;
    let builder = EngineBuilder::new(config.engine.clone())
        .records(records)
        .metrics(registry.clone());
    let builder = match config.mode {
        Mode::Simulation => builder.simulation(config.simulator.clone()),
        Mode::Hardware => {
            let (bus, link) = mqtt_transport(&config.mqtt);
            builder.hardware(Box::new(bus), Arc::new(link))
        }
    };
    let engine = builder.start().await?;

    let api_server = if config.api.enabled {
        match ApiServerBuilder::from_config(&config.api, engine.engine())
            .spawn()
            .await
        {
            Ok(server) => Some(server),
            Err(err) => {
                warn!(error = %err, "failed to start api server");
                None
            }
        }
    } else {
        info!("api server disabled by configuration");
        None
    };

    info!(mode = config.mode.as_str(), "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    engine.shutdown().await?;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}
