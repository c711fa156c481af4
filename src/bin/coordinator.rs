//! Presence Coordinator Binary
//!
//! Stateless admission controller: assigns vnodes to presence nodes and
//! answers client routing queries.

use presenced::config::ComponentFactory;
use presenced::coordinator::{http, Coordinator};

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Presence Coordinator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP API port
    #[arg(long, env = "COORDINATOR_PORT", default_value = "8090")]
    port: u16,

    /// Number of vnodes in the ring (must match the fleet)
    #[arg(long, env = "VNODE_COUNT", default_value = "1024")]
    vnode_count: u32,

    /// Ownership lease TTL in seconds
    #[arg(long, env = "OWNER_TTL_SECS", default_value = "60")]
    owner_ttl_secs: u64,

    /// User routing cache TTL in seconds
    #[arg(long, env = "USER_CACHE_TTL_SECS", default_value = "60")]
    user_cache_ttl_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting presence coordinator");

    // Directory backend from environment; invalid credentials fail startup
    let directory = ComponentFactory::create_directory().await?;

    let coordinator = Arc::new(Coordinator::new(
        directory,
        args.vnode_count,
        Duration::from_secs(args.owner_ttl_secs),
        Duration::from_secs(args.user_cache_ttl_secs),
    ));

    // Warm the local ring replica before answering routing queries
    coordinator.warm().await?;

    let router = http::build_router(coordinator);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        port = args.port,
        vnode_count = args.vnode_count,
        "Coordinator ready"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Coordinator shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
