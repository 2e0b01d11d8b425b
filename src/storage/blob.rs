use std::{
    io::{Read, Write},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use object_store::{ObjectStore, path::Path};
use serde::{Deserialize, Serialize};

use crate::{
    error::{StorageError, StudioResult},
    rollout::Rollout,
};

/// Narrow capability over the object store holding models and rollouts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes) -> StudioResult<()>;
    async fn get(&self, key: &str) -> StudioResult<Bytes>;
    async fn delete(&self, key: &str) -> StudioResult<()>;
    async fn size(&self, key: &str) -> StudioResult<u64>;
}

/// [`BlobStore`] backed by any `object_store` implementation (S3, GCS,
/// local filesystem, in-memory).
#[derive(Debug, Clone)]
pub struct ObjectStoreBlobStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn path(key: &str) -> Path {
        Path::from(key)
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn put(&self, key: &str, bytes: Bytes) -> StudioResult<()> {
        self.store
            .put(&Self::path(key), bytes.into())
            .await
            .map_err(|e| StorageError::ObjectStore(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StudioResult<Bytes> {
        let result = self
            .store
            .get(&Self::path(key))
            .await
            .map_err(|e| map_not_found(key, e))?;
        result
            .bytes()
            .await
            .map_err(|e| StorageError::ObjectStore(e.to_string()).into())
    }

    async fn delete(&self, key: &str) -> StudioResult<()> {
        self.store
            .delete(&Self::path(key))
            .await
            .map_err(|e| map_not_found(key, e))?;
        Ok(())
    }

    async fn size(&self, key: &str) -> StudioResult<u64> {
        let meta = self
            .store
            .head(&Self::path(key))
            .await
            .map_err(|e| map_not_found(key, e))?;
        Ok(meta.size as u64)
    }
}

fn map_not_found(key: &str, e: object_store::Error) -> crate::error::StudioError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::not_found("blob", key).into(),
        other => StorageError::ObjectStore(other.to_string()).into(),
    }
}

// ================================================================================================
// Rollout persistence
// ================================================================================================

/// Metadata attached to a persisted rollout blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutMetadata {
    pub env_id: String,
    pub rollout_id: String,
    pub episode_length: u32,
    pub total_reward: f64,
}

/// Key layout for persisted rollouts.
pub fn rollout_blob_key(env_id: &str, rollout_id: &str) -> String {
    format!("rollouts/{env_id}/{rollout_id}.json.gz")
}

/// Persists a rollout as gzip-compressed UTF-8 JSON.
pub async fn save_rollout(
    store: &dyn BlobStore,
    env_id: &str,
    rollout_id: &str,
    rollout: &Rollout,
) -> StudioResult<RolloutMetadata> {
    let json = serde_json::to_vec(rollout).map_err(StorageError::Json)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(StorageError::Io)?;
    let compressed = encoder.finish().map_err(StorageError::Io)?;

    store
        .put(&rollout_blob_key(env_id, rollout_id), Bytes::from(compressed))
        .await?;

    Ok(RolloutMetadata {
        env_id: env_id.to_string(),
        rollout_id: rollout_id.to_string(),
        episode_length: rollout.episode_length,
        total_reward: rollout.total_reward,
    })
}

/// Loads a rollout persisted by [`save_rollout`]. Round-trips exactly.
pub async fn load_rollout(
    store: &dyn BlobStore,
    env_id: &str,
    rollout_id: &str,
) -> StudioResult<Rollout> {
    let compressed = store.get(&rollout_blob_key(env_id, rollout_id)).await?;
    let mut decoder = GzDecoder::new(compressed.as_ref());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).map_err(StorageError::Io)?;
    serde_json::from_slice(&json).map_err(|e| StorageError::Json(e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn memory_store() -> ObjectStoreBlobStore {
        ObjectStoreBlobStore::new(Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn put_get_delete_cycle() {
        let store = memory_store();
        store.put("k/v.bin", Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(store.get("k/v.bin").await.unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(store.size("k/v.bin").await.unwrap(), 3);
        store.delete("k/v.bin").await.unwrap();
        let err = store.get("k/v.bin").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn rollout_round_trips_through_gzip_json() {
        let store = memory_store();
        let rollout = Rollout {
            steps: Vec::new(),
            total_reward: 12.5,
            episode_length: 42,
            success: true,
            termination_reason: Some(crate::sim::TerminationReason::GoalReached),
            error: None,
        };
        let meta = save_rollout(&store, "env-1", "ro-1", &rollout).await.unwrap();
        assert_eq!(meta.episode_length, 42);
        assert_eq!(meta.total_reward, 12.5);

        let loaded = load_rollout(&store, "env-1", "ro-1").await.unwrap();
        assert_eq!(loaded, rollout);
    }

    #[test]
    fn blob_keys_follow_the_layout() {
        assert_eq!(
            rollout_blob_key("env-1", "ro-9"),
            "rollouts/env-1/ro-9.json.gz"
        );
    }
}
