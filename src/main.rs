//! Room Host Server - authoritative multiplayer session host
//!
//! This is the main entry point. It handles:
//! - WebSocket connections, one per player, routed into rooms
//! - Per-room fixed-timestep simulation, heartbeat and state broadcast
//! - HTTP endpoints for health and the room configuration snapshot

mod app;
mod config;
mod http;
mod room;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::room::RoomRegistry;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Room Host Server");
    info!("Server address: {}", config.server_addr);
    info!(
        tick_rate = config.room.fixed_simulation_tick_rate,
        patch_rate = config.room.patch_rate,
        "Room settings loaded"
    );

    // Create application state
    let state = AppState::new(config.clone());
    let rooms = state.rooms.clone();

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws/<room_id>", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(rooms))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler; disposes every room so open
/// sockets close and the server can drain
async fn shutdown_signal(rooms: Arc<RoomRegistry>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }

    info!(active_rooms = rooms.active_rooms(), "Disposing rooms");
    rooms.dispose_all().await;
}
