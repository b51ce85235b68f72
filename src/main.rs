use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transit_coordinator::server::{Coordinator, SubscriberRegistry};
use transit_coordinator::sessions::SessionRegistry;
use transit_coordinator::storage::{Store, StorePool};
use transit_coordinator::{config::Config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "transit-coordinator starting"
    );

    // Load configuration
    let config = Config::load()?;
    info!(bind = %config.node.bind_address, "Loaded configuration");

    // Open storage and build the connection pool
    let store = Store::open(&config.node.data_dir)?;
    let pool = StorePool::new(&store, config.node.pool_size);
    info!(
        data_dir = %config.node.data_dir,
        pool_size = config.node.pool_size,
        "Storage opened"
    );

    let state = Arc::new(AppState {
        config,
        pool,
        sessions: SessionRegistry::new(),
        subscribers: SubscriberRegistry::new(),
    });

    // Start the coordinator (TLS listener, background loops, discovery)
    let coordinator = Coordinator::start(Arc::clone(&state)).await?;
    info!(addr = %coordinator.local_addr(), "Coordinator started");

    shutdown_signal().await;

    coordinator.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
