use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use proxyglass::commands;
use proxyglass::config::{self, LogFormat};
use proxyglass::error::{ProxyError, Result};
use proxyglass::proxy::ProxyServer;
use proxyglass::state::AppState;
use proxyglass::web;

#[derive(Parser, Debug)]
#[command(name = "proxyglass")]
#[command(about = "Forward HTTP/HTTPS proxy that records traffic for querying and live tailing", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the proxy and management listeners (default)
    Run,
    /// Validate configuration and print the effective settings
    Check,
}

fn init_tracing(format: LogFormat, debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("proxyglass={level}")));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().flatten_event(true).init(),
        LogFormat::Text => builder.init(),
    }
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| ProxyError::Validation(format!("cannot resolve listen address {host}:{port}")))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = config::load(args.config.as_deref());
    let format = loaded.as_ref().map(|c| c.log_format).unwrap_or_default();
    init_tracing(format, args.debug);

    let config = match loaded {
        Ok(cfg) => {
            match &args.config {
                Some(path) => info!("Configuration loaded from {}", path.display()),
                None => info!("Configuration loaded from defaults and environment"),
            }
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    if let Some(Command::Check) = args.command {
        return commands::run_config_check(&config);
    }

    info!("Starting proxyglass");
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let proxy_addr = resolve_addr(&config.proxy_host, config.proxy_port).await?;
    let mgmt_addr = resolve_addr(&config.mgmt_host, config.mgmt_port).await?;

    let (state, _shutdown_rx) = AppState::new(config)?;

    let (_, proxy_handle) = ProxyServer::new(state.clone()).bind(proxy_addr).await?;
    let (_, web_handle) = web::start_server(state.clone(), mgmt_addr).await?;
    let reconciler_handle = state.spawn_dropped_reconciler();

    shutdown_signal().await;

    info!("Shutting down proxyglass");
    let _ = state.shutdown_tx.send(());

    // Tunnels and in-flight exchanges get the grace period; allow a little on top.
    let shutdown_timeout = tokio::time::timeout(grace + Duration::from_secs(1), async {
        let _ = tokio::join!(proxy_handle, web_handle, reconciler_handle);
    })
    .await;

    match shutdown_timeout {
        Ok(_) => info!("Graceful shutdown completed"),
        Err(_) => warn!("Shutdown grace period exceeded, exiting"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
