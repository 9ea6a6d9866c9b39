//! dynrest server
//!
//! Binary entry point serving the endpoints declared in the registry file.

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dynrest::common::config::DynrestConfig;
use dynrest::DynrestServer;

#[derive(Parser, Debug)]
#[command(name = "dynrest")]
#[command(about = "Declarative SQL-backed REST endpoints", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DYNREST_CONFIG", default_value = "dynrest.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

fn load_config(path: &Path) -> anyhow::Result<Option<DynrestConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(toml::from_str(&content)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let loaded = load_config(&args.config)?;
    let config = loaded.clone().unwrap_or_default();

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    if args.json || config.logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("dynrest v{}", env!("CARGO_PKG_VERSION"));
    if loaded.is_none() {
        info!(path = %args.config.display(), "Using default configuration");
    }

    let server = DynrestServer::from_config(config)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        () = shutdown => {
            server.shutdown().await?;
        }
    }

    Ok(())
}
