//! Presence Node Binary
//!
//! Accepts long-lived WebSocket sessions for the users of its assigned
//! vnodes, publishes their online/offline transitions, consumes the fleet's
//! presence stream, and heartbeats its ownership lease into the directory.

use presenced::auth::TokenValidator;
use presenced::config::ComponentFactory;
use presenced::node::{self, NodeConfig, PresenceNode};

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Presence Node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unique instance id
    #[arg(long, env = "NODE_ID")]
    node_id: String,

    /// Comma-separated vnode ids this node owns
    #[arg(long, env = "ASSIGNED_VNODES", value_delimiter = ',', required = true)]
    assigned_vnodes: Vec<u32>,

    /// WebSocket port
    #[arg(long, env = "WS_PORT", default_value = "8091")]
    ws_port: u16,

    /// Number of vnodes in the ring (must match the fleet)
    #[arg(long, env = "VNODE_COUNT", default_value = "1024")]
    vnode_count: u32,

    /// Shared secret for session token validation
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// Heartbeat interval in milliseconds
    #[arg(long, env = "HEARTBEAT_INTERVAL", default_value = "30000")]
    heartbeat_interval_ms: u64,

    /// Per-connection liveness ping interval in seconds
    #[arg(long, env = "PING_INTERVAL_SECS", default_value = "30")]
    ping_interval_secs: u64,

    /// Ownership lease TTL in seconds
    #[arg(long, env = "OWNER_TTL_SECS", default_value = "60")]
    owner_ttl_secs: u64,

    /// Staleness bound for remote presence entries, in seconds
    #[arg(long, env = "STALE_AFTER_SECS", default_value = "300")]
    stale_after_secs: u64,

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

    info!(node_id = %args.node_id, "Starting presence node");

    // Backends from environment; invalid credentials fail startup
    let directory = ComponentFactory::create_directory().await?;
    let bus = ComponentFactory::create_bus().await?;
    let validator = TokenValidator::new(&args.jwt_secret);

    let config = NodeConfig {
        node_id: args.node_id.clone(),
        assigned_vnodes: args.assigned_vnodes.clone(),
        vnode_count: args.vnode_count,
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
        ping_interval: Duration::from_secs(args.ping_interval_secs),
        owner_ttl: Duration::from_secs(args.owner_ttl_secs),
        stale_after: Duration::from_secs(args.stale_after_secs),
    };

    // Fails fast on vnode ids outside the ring
    let node = Arc::new(PresenceNode::new(config, directory, bus, validator)?);

    // Claim ownership before the acceptor opens
    node.heartbeat().await?;

    let consumer = {
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(err) = node.run_consumer().await {
                error!(error = %err, "presence consumer failed");
            }
        })
    };
    let heartbeat = {
        let node = node.clone();
        tokio::spawn(async move { node.run_heartbeat().await })
    };
    let scrub = {
        let node = node.clone();
        tokio::spawn(async move { node.run_scrub().await })
    };

    let router = node::build_router(node.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.ws_port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        node_id = %args.node_id,
        ws_port = args.ws_port,
        vnodes = args.assigned_vnodes.len(),
        "Presence node ready"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    info!("Shutdown signal received, draining sessions");

    // Ordered teardown: lease refresh stops first so ownership can decay,
    // then live sessions get 1001, then the acceptor closes.
    heartbeat.abort();
    node.close_all_sessions();
    let _ = shutdown_tx.send(());

    let mut clean = true;
    match tokio::time::timeout(SHUTDOWN_DEADLINE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => {
            error!(error = %err, "server error during shutdown");
            clean = false;
        }
        Ok(Err(err)) => {
            error!(error = %err, "server task panicked during shutdown");
            clean = false;
        }
        Err(_) => {
            error!("sessions did not drain within the shutdown deadline");
            clean = false;
        }
    }

    consumer.abort();
    scrub.abort();

    if !clean {
        std::process::exit(1);
    }

    info!("Presence node shutting down");

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
