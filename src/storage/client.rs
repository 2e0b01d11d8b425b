use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::{StorageError, StudioResult},
    storage::with_retries,
};

/// Narrow capability over the external document database.
///
/// Paths are namespaced (`runs/get`, `assets/list`, `metrics/append`, ...);
/// the transport behind them is opaque to the core. Implementations must be
/// safe to share across tasks.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Read-only lookup.
    async fn query(&self, path: &str, args: Value) -> StudioResult<Value>;

    /// State-changing call.
    async fn mutation(&self, path: &str, args: Value) -> StudioResult<Value>;
}

/// HTTP JSON implementation of [`StorageClient`].
///
/// Queries and mutations both post `{path, args}` to the backend's action
/// endpoint. 4xx responses are client errors and fail fast; 5xx and
/// transport errors retry with bounded backoff.
#[derive(Debug, Clone)]
pub struct HttpStorageClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpStorageClient {
    pub fn new(base_url: impl Into<String>) -> StudioResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| StorageError::service("storage", format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn call(&self, endpoint: &'static str, path: &str, args: &Value) -> StudioResult<Value> {
        let url = format!("{}/api/{endpoint}", self.base_url);
        let body = serde_json::json!({ "path": path, "args": args });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::service("storage", e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::client_side("storage", format!("{status}: {text}")).into());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::service("storage", format!("{status}: {text}")).into());
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| StorageError::service("storage", format!("decode: {e}")).into())
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn query(&self, path: &str, args: Value) -> StudioResult<Value> {
        with_retries("storage.query", || self.call("query", path, &args)).await
    }

    async fn mutation(&self, path: &str, args: Value) -> StudioResult<Value> {
        with_retries("storage.mutation", || self.call("mutation", path, &args)).await
    }
}
