//! Asset Store Server
//!
//! Stores uploaded images and other binary assets as fixed-size chunks and
//! streams them back on request.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use asset_store::assets::OrphanSweeper;
use asset_store::config::{Config, StorageBackend};
use asset_store::state::AppState;
use asset_store::storage::S3Client;
use asset_store::store::ChunkStore;
use asset_store::{db, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asset_store=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::load().context("Invalid configuration")?;

    tracing::info!("Starting Asset Store v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        backend = ?config.storage.backend,
        chunk_size = config.assets.chunk_size.get(),
        max_object_bytes = config.assets.max_object_bytes,
        "Storage configured"
    );

    let store = open_store(&config).await?;

    if let Some(interval) = config.sweep.interval() {
        OrphanSweeper::new(store.clone(), config.sweep.grace()).start(interval);
        tracing::info!(
            interval_secs = config.sweep.interval_secs,
            grace_secs = config.sweep.grace_secs,
            "Orphan sweep scheduled"
        );
    }

    let app = routes::app(AppState::new(&config, store));

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!("Asset Store listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<ChunkStore> {
    let verify = config.assets.verify_finalize;

    let store = match config.storage.backend {
        StorageBackend::Sqlite => {
            let pool = db::create_pool(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to initialize database")?;
            tracing::info!("Database initialized at {}", config.database.url);
            ChunkStore::with_sqlite(pool, verify)
        }
        StorageBackend::S3 => {
            let s3 = config
                .storage
                .s3
                .as_ref()
                .context("S3 backend selected without S3 settings")?;
            tracing::info!("S3 endpoint: {}", s3.endpoint);
            tracing::info!("S3 bucket: {}", s3.bucket);

            let client = S3Client::new(s3)
                .await
                .context("Failed to initialize S3 client")?;
            ChunkStore::with_s3(client, s3.prefix.clone(), verify)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; assets are lost on restart");
            ChunkStore::new(asset_store::store::MemoryChunkStorage::new(), verify)
        }
    };

    Ok(store)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
