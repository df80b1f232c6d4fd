use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parlor::config::Config;
use parlor::provider::{OllamaProvider, RetryPolicy};
use parlor::server::{build_app, AppState};
use parlor::session::SessionStore;
use parlor::turn::TurnCoordinator;

// ============================================================================
// CLI Types
// ============================================================================

/// Parlor - a minimal self-hosted server for streaming conversational assistants
#[derive(Parser, Debug)]
#[command(version = parlor::build_info::VERSION, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "parlor.yaml")]
    config: String,

    /// Host to bind to (overrides config file)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config).await?;

    // CLI flags override config
    if let Some(host) = args.host {
        config.server.host = host.to_string();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let provider = Arc::new(OllamaProvider::new(
        reqwest::Client::new(),
        config.provider.base_url.clone(),
        config.provider.model.clone(),
        config.provider.api_mode,
        config.provider.temperature,
        RetryPolicy {
            max_attempts: config.provider.retry.max_attempts,
            base_delay: Duration::from_millis(config.provider.retry.backoff_base_ms),
            max_delay: Duration::from_millis(config.provider.retry.backoff_max_ms),
        },
    ));

    let store = SessionStore::new();
    store.clone().spawn_eviction_task(
        Duration::from_secs(config.sessions.sweep_interval_seconds),
        Duration::from_secs(config.sessions.max_idle_seconds),
    );

    let coordinator = TurnCoordinator::new(store, provider, config.chat.turn_limits());

    let state = AppState {
        coordinator,
        keep_alive_interval_seconds: config.server.keep_alive_interval_seconds,
    };
    let app = build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        addr = %addr,
        model = %config.provider.model,
        "Starting server"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
