//! `fathomd`: the Fathom storage daemon.
//!
//! Ties placement, backends, the quorum engine, the repair services and the
//! HTTP API together into one running process.
//!
//! # Usage
//!
//! ```text
//! fathomd start                          # start with defaults
//! fathomd start -c fathom.toml           # start with a config file
//! fathomd start --memory -l 127.0.0.1:4831
//! fathomd status -c fathom.toml          # topology and pending degraded writes
//! ```

mod config;
mod probe;
mod services;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fathom_api::{ApiServer, ApiServerConfig};
use fathom_meta::MetaStore;
use fathom_placement::Topology;
use tracing::{info, warn};

use config::DaemonConfig;
use services::Services;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "fathomd",
    version,
    about = "Fathom fault-domain-aware object storage daemon"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "FATHOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon.
    Start {
        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Override HTTP listen address (e.g. "127.0.0.1:4831").
        #[arg(short = 'l', long)]
        listen_addr: Option<String>,

        /// Keep all objects and metadata in memory.
        #[arg(long)]
        memory: bool,
    },
    /// Show the configured topology and pending degraded writes.
    Status,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = DaemonConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start {
            data_dir,
            listen_addr,
            memory,
        } => {
            // CLI args override config file values.
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if let Some(addr) = listen_addr {
                config.node.listen_addr = addr;
            }
            if memory {
                config.storage.backend = "memory".to_string();
            }
            cmd_start(config).await
        }
        Commands::Status => cmd_status(&config),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// fathomd start
// -----------------------------------------------------------------------

async fn cmd_start(config: DaemonConfig) -> Result<()> {
    info!(
        data_dir = %config.node.data_dir.display(),
        listen_addr = %config.node.listen_addr,
        backend = %config.storage.backend,
        quorum = %config.replication.quorum,
        degraded_writes = config.degraded_write.enabled,
        "starting fathomd"
    );

    if !config.memory_backend() {
        std::fs::create_dir_all(&config.node.data_dir)
            .context("failed to create data directory")?;
    }

    let services = Services::build(&config)?;
    let topology = services.topology.snapshot();
    info!(
        active = ?topology.active_domains(),
        standby = ?topology.standby_domain(),
        factor = services.topology.effective_replication_factor(),
        quorum = services.topology.effective_quorum(),
        "topology loaded"
    );
    match services.tracker.pending_count() {
        Ok(0) => {}
        Ok(pending) => info!(pending, "degraded writes awaiting backfill"),
        Err(e) => warn!(error = %e, "could not count degraded writes"),
    }

    let tasks = services.spawn_background(&config);

    let server = ApiServer::new(ApiServerConfig {
        engine: services.node.clone(),
        max_body_bytes: usize::try_from(config.storage.max_in_memory_bytes).unwrap_or(usize::MAX),
    });
    server
        .serve_with_shutdown(&config.node.listen_addr, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("stopping background services");
    for task in tasks {
        task.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// -----------------------------------------------------------------------
// fathomd status
// -----------------------------------------------------------------------

fn cmd_status(config: &DaemonConfig) -> Result<()> {
    let topology = Topology::new(&config.topology_config(), config.replication)
        .context("invalid topology")?;
    let snapshot = topology.snapshot();

    println!(
        "Replication: factor {} quorum {}",
        topology.effective_replication_factor(),
        topology.effective_quorum()
    );
    for domain in snapshot.active_domains() {
        let nodes = snapshot.nodes_in_domain(domain);
        println!("  active  {domain}: {} node(s)", nodes.len());
        for node in nodes {
            println!("    {node}");
        }
    }
    if let Some(standby) = snapshot.standby_domain() {
        println!(
            "  standby {standby}: {} node(s)",
            snapshot.nodes_in_domain(standby).len()
        );
    }

    if config.memory_backend() {
        println!("Degraded writes: n/a (memory backend)");
        return Ok(());
    }
    let meta_path = config.node.data_dir.join("meta");
    let meta = MetaStore::open(&meta_path).map_err(|e| {
        anyhow::anyhow!(
            "cannot open metadata at {}. Is the daemon running? ({e})",
            meta_path.display(),
        )
    })?;
    println!("Degraded writes pending: {}", meta.degraded_count()?);

    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
