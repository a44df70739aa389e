//! Readerpulse - collection endpoint and recommendation server
//!
//! Serves event ingestion, recommendations and feedback over HTTP, backed by
//! in-memory stores and a JSON catalog that is reloaded in the background.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use readerpulse_core::{
    api::{ApiServer, AppState},
    clock::system_clock,
    recommend::{CandidateCache, ContentSource, JsonFileContentSource, StaticContentSource},
    MemoryEventStore, MemoryFeedbackLog, PseudonymizingGuard, PulseConfig, Recommender,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "readerpulse")]
#[command(about = "Reader telemetry collection and content recommendations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Configuration file (TOML)
    #[arg(short, long, env = "READERPULSE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen address (overrides server.addr)
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// JSON catalog file (overrides recommender.catalog_path)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<PulseConfig> {
    match path {
        Some(path) => PulseConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            debug!("No config file given, using defaults");
            Ok(PulseConfig::default())
        }
    }
}

async fn serve(mut config: PulseConfig, addr: Option<SocketAddr>, catalog: Option<PathBuf>) -> Result<()> {
    if let Some(addr) = addr {
        config.server.addr = addr;
    }
    if let Some(catalog) = catalog {
        config.recommender.catalog_path = Some(catalog);
    }
    config.validate()?;

    let clock = system_clock();
    let source: Arc<dyn ContentSource> = match &config.recommender.catalog_path {
        Some(path) => Arc::new(JsonFileContentSource::new(path)),
        None => {
            warn!("No catalog configured; only an empty catalog will be served");
            Arc::new(StaticContentSource::default())
        }
    };
    let catalog = Arc::new(CandidateCache::new(source));
    match catalog.refresh().await {
        Ok(version) => info!(
            "Catalog v{} ready with {} items",
            version,
            catalog.snapshot().len()
        ),
        Err(e) => warn!("Initial catalog load failed: {}", e),
    }

    let events = Arc::new(MemoryEventStore::new(
        clock.clone(),
        config.store.retention,
        config.store.max_history_per_subject,
    ));
    let privacy = Arc::new(PseudonymizingGuard::new(
        config.privacy.salt.clone(),
        config.privacy.pseudonymize_subjects,
    ));
    let recommender = Arc::new(Recommender::new(
        &config,
        catalog.clone(),
        events,
        Arc::new(MemoryFeedbackLog::new()),
        privacy,
        clock,
    ));

    let shutdown = CancellationToken::new();
    let refresh = catalog
        .clone()
        .spawn_refresh(config.recommender.catalog_refresh, shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => warn!("Cannot listen for shutdown signal: {}", e),
        }
    });

    let server = ApiServer::new(config.server.addr, AppState::new(&config, recommender));
    let result = server.serve(shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = refresh.await {
        warn!("Catalog refresh task ended abnormally: {}", e);
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Binary and library log under different targets; keep HTTP tracing quiet
    let level = level.as_str().to_lowercase();
    let filter = EnvFilter::new(format!(
        "readerpulse={level},readerpulse_core={level},tower_http=warn"
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Readerpulse v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { addr, catalog } => {
            let config = load_config(cli.config.as_deref())?;
            serve(config, addr, catalog).await
        }
        Commands::CheckConfig => {
            let config = load_config(cli.config.as_deref())?;
            println!("Configuration OK");
            println!("  listen:   {}", config.server.addr);
            println!(
                "  catalog:  {}",
                config
                    .recommender
                    .catalog_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(none)".to_string())
            );
            println!("  endpoint: {}", config.collector.endpoint);
            Ok(())
        }
        Commands::InitConfig { path } => {
            PulseConfig::default().to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}
