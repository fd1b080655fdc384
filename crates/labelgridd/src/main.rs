//! labelgridd — the LabelGrid daemon.
//!
//! Single binary that assembles all LabelGrid subsystems:
//! - Embedded broker (redb): input/output buckets, task/result queues
//! - Request gateway + result correlator
//! - Autoscaler driving a local worker fleet
//! - HTTP API
//!
//! # Usage
//!
//! ```text
//! labelgridd standalone --port 8000 --data-dir /var/lib/labelgrid --gallery ./faces
//! labelgridd purge --data-dir /var/lib/labelgrid
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use labelgrid_core::PipelineConfig;
use labelgrid_state::StateStore;
use labelgrid_worker::GalleryClassifier;
use labelgridd::{Pipeline, purge};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "labelgridd", about = "LabelGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every component in one process.
    Standalone {
        /// Path to labelgrid.toml.
        #[arg(long, env = "LABELGRID_CONFIG")]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long, env = "LABELGRID_PORT")]
        port: Option<u16>,

        /// Data directory for the broker database.
        #[arg(long, env = "LABELGRID_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Directory of reference images, labelled by file stem.
        #[arg(long, env = "LABELGRID_GALLERY")]
        gallery: Option<PathBuf>,

        /// Upper bound on worker instances.
        #[arg(long, env = "LABELGRID_MAX_INSTANCES")]
        max_instances: Option<u32>,
    },

    /// Empty both buckets and both queues.
    Purge {
        /// Path to labelgrid.toml.
        #[arg(long, env = "LABELGRID_CONFIG")]
        config: Option<PathBuf>,

        /// Data directory for the broker database.
        #[arg(long, env = "LABELGRID_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,labelgridd=debug,labelgrid=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
            gallery,
            max_instances,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            if let Some(gallery) = gallery {
                config.worker.gallery_dir = Some(gallery);
            }
            if let Some(max_instances) = max_instances {
                config.autoscale.max_instances = max_instances;
            }
            run_standalone(config).await
        }
        Command::Purge { config, data_dir } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            let store = open_store(&config)?;
            purge(&config, &store).await?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn open_store(config: &PipelineConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db_path = config.database_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

async fn run_standalone(config: PipelineConfig) -> anyhow::Result<()> {
    info!("LabelGrid daemon starting in standalone mode");

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&config)?;

    let gallery_dir = config
        .worker
        .gallery_dir
        .clone()
        .context("no gallery configured; pass --gallery or set [worker].gallery_dir")?;
    let classifier = GalleryClassifier::from_dir(&gallery_dir)?;

    let port = config.server.port;
    let pipeline = Pipeline::new(config, &store, Arc::new(classifier));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Ctrl-C stops accepting connections; the pipeline winds down once
    // in-flight requests have been answered.
    pipeline
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("LabelGrid daemon stopped");
    Ok(())
}
