//! Chunkline upload server.
//!
//! Serves resumable uploads over WebSocket into a storage directory. Set
//! `RUST_LOG` to adjust log verbosity and `CHUNKLINE_CONFIG` to pick the
//! config file.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use chunkline_server::{StoreHandler, UploadServer};
use chunkline_store::AssemblyStore;

use config::ServerSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (settings, path) = ServerSettings::load()?;
    tracing::info!(
        config = %path.display(),
        storage_dir = %settings.storage_dir.display(),
        temp_dir = %settings.temp_dir.display(),
        size_limit = settings.size_limit,
        overwrite_allowed = settings.overwrite_allowed,
        "configuration loaded"
    );

    let store = Arc::new(AssemblyStore::new(settings.store_config()?).await?);
    let server = UploadServer::new(settings.server_config(), StoreHandler::new(store));

    let server_shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            server_shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
