//! Convoy Server - routing, conflict and merge backend for convoy command

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convoy_server::{api, config::Config, loops, seed, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("convoy_server=debug".parse()?)
            .add_directive("convoy_core=info".parse()?))
        .init();

    tracing::info!("Starting Convoy Server...");

    let config = Config::from_env();
    let port = config.server_port;
    let network = seed::load_network(&config)?;
    let state = Arc::new(AppState::new(network, config));

    if state.config().seed_demo_convoys {
        seed::seed_convoys(&state)?;
    }

    // Start background loops
    tokio::spawn(loops::conflict_loop::run_conflict_loop(state.clone()));

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Convoy Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
