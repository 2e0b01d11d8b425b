pub mod blob;
pub mod client;
pub mod memory;

use std::time::Duration;

use tracing::warn;

use crate::error::StudioResult;

pub use blob::{BlobStore, ObjectStoreBlobStore, RolloutMetadata, load_rollout, rollout_blob_key, save_rollout};
pub use client::{HttpStorageClient, StorageClient};
pub use memory::MemoryStorageClient;

/// First backoff delay for external-service retries.
pub(crate) const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Backoff multiplier between attempts.
pub(crate) const RETRY_MULTIPLIER: u32 = 2;
/// Attempts per operation, including the first.
pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Runs an external-service call with bounded exponential backoff
/// (1 s, x2, 3 attempts). Non-retryable errors surface immediately.
pub(crate) async fn with_retries<T, F, Fut>(op: &'static str, mut call: F) -> StudioResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StudioResult<T>>,
{
    let mut delay = RETRY_INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < RETRY_MAX_ATTEMPTS => {
                warn!(op, attempt, error = %e, "retryable failure, backing off");
                tokio::time::sleep(delay).await;
                delay *= RETRY_MULTIPLIER;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Same policy, but failures degrade to `None` instead of propagating.
/// Best-effort paths (cache writes, metadata sync) use this.
pub(crate) async fn with_retries_best_effort<T, F, Fut>(op: &'static str, call: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StudioResult<T>>,
{
    match with_retries(op, call).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(op, error = %e, "best-effort operation dropped after retries");
            None
        }
    }
}
