use std::sync::Arc;

use object_store::{local::LocalFileSystem, memory::InMemory};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use simstudio::{
    AppContext, StudioConfig, router,
    error::SystemError,
    orchestrator::SkyCliBackend,
    storage::{HttpStorageClient, ObjectStoreBlobStore},
};

#[tokio::main]
async fn main() -> simstudio::StudioResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StudioConfig::from_env()?;
    info!(addr = %config.bind_addr, storage = %config.storage_url, "starting simstudio");

    let storage = Arc::new(HttpStorageClient::new(&config.storage_url)?);

    let blob = match &config.blob_store_url {
        Some(path) => {
            let store = LocalFileSystem::new_with_prefix(path)
                .map_err(|e| SystemError::Generic(format!("blob store at '{path}': {e}")))?;
            Arc::new(ObjectStoreBlobStore::new(Arc::new(store)))
        }
        None => {
            warn!("BLOB_STORE_URL not set; models and rollouts will not survive restarts");
            Arc::new(ObjectStoreBlobStore::new(Arc::new(InMemory::new())))
        }
    };

    if config.compute_provider != "sky" {
        return Err(SystemError::Generic(format!(
            "unsupported COMPUTE_PROVIDER '{}'; only 'sky' is wired in",
            config.compute_provider
        ))
        .into());
    }
    let backend = Arc::new(SkyCliBackend::new());

    let ctx = Arc::new(AppContext::new(storage, blob, backend, &config));
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| SystemError::Generic(format!("bind {}: {e}", config.bind_addr)))?;
    info!("listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| SystemError::Generic(format!("server: {e}")))?;
    Ok(())
}
