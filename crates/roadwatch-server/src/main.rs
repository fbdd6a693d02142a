mod alerts;
mod auth;
mod config;
mod http;
mod media;
mod metrics;
mod pipeline;
mod state;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{load_catalog, ServeArgs, ServerConfig};
use http::router;
use crate::metrics::init_metrics;
use roadwatch_core::memory::MemoryIncidentStore;
use roadwatch_core::store::IncidentStore;
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "roadwatch")]
#[command(about = "Citizen road incident reporting with moderation, live feeds and traffic alerts")]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true, env = "ROADWATCH_LOG_JSON")]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the incident server
    Serve(ServeArgs),
    /// Print the resolved incident type catalog
    Catalog {
        /// Incident type catalog (JSON). Built-in types when absent
        #[arg(long, env = "ROADWATCH_TYPES")]
        types: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Serve(args) => {
            let config = ServerConfig::from_args(args)?;
            serve(config).await?;
        }
        Commands::Catalog { types } => {
            let catalog = load_catalog(types.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    info!("Starting Roadwatch");
    info!(
        "HTTP: {}, incident types: {}, moderators: {}",
        config.http,
        config.catalog.types.len(),
        config.admins.len()
    );
    if config.admins.is_empty() {
        warn!("No moderators configured, pending incidents can never be approved");
    }

    let store: Arc<dyn IncidentStore> = match &config.journal {
        Some(path) => Arc::new(
            MemoryIncidentStore::open(path.clone())
                .with_context(|| format!("Failed to open journal {:?}", path))?,
        ),
        None => {
            warn!("No journal configured, incidents are lost on restart");
            Arc::new(MemoryIncidentStore::new())
        }
    };

    let prometheus = init_metrics().context("Failed to install Prometheus metrics exporter")?;
    let state = AppState::build(&config, store, Some(prometheus))?;
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.http)
        .await
        .with_context(|| format!("Failed to bind {}", config.http))?;
    info!("HTTP server listening on http://{}", config.http);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    state.pipeline.stop();
    info!("Roadwatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
