//! Plugin Host Server
//!
//! Runs uploaded JavaScript plugins behind a small HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plugin_host::config::{CliOverrides, HostConfig};
use plugin_host::js::spawn_worker;
use plugin_host::plugin::FileModuleLoader;
use plugin_host::server::{create_router, AppState};

/// Plugin execution host
#[derive(Parser, Debug)]
#[command(name = "plugin-host")]
#[command(about = "HTTP host for sandboxed JavaScript plugins", long_about = None)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host address
    #[arg(long)]
    host: Option<String>,

    /// Server port [default: 4243]
    #[arg(long)]
    port: Option<u16>,

    /// Directory relative plugin module paths resolve against
    #[arg(long)]
    plugin_root: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let overrides = CliOverrides {
        host: args.host,
        port: args.port,
        plugin_root: args.plugin_root,
    };
    let config = HostConfig::load(args.config.as_deref(), &overrides).context("Failed to load configuration")?;

    info!("Starting plugin host v{}", env!("CARGO_PKG_VERSION"));
    info!("Plugin root: {}", config.plugin_root.display());

    let policy = config.global_policy();
    info!(
        "Global policy denies {} names: {}",
        policy.denied().count(),
        policy.denied().collect::<Vec<_>>().join(", ")
    );

    let worker = spawn_worker(config.runtime_options(), policy).context("Failed to start JS worker")?;
    let loader = Arc::new(FileModuleLoader::new(config.plugin_root.clone()));
    let state = AppState::new(loader, worker.clone());

    let app = create_router(state);

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping JS worker...");
    worker.shutdown();
    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("JS worker did not stop cleanly: {}", e),
        Err(e) => error!("Failed to join JS worker: {}", e),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("plugin_host=info,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
