use std::{net::SocketAddr, time::Duration};

use crate::error::{StudioResult, SystemError};

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// Address the HTTP/WebSocket server binds.
    pub bind_addr: SocketAddr,
    /// Connection URL of the document database backend.
    pub storage_url: String,
    /// Optional object-store URL for models and rollouts.
    pub blob_store_url: Option<String>,
    /// Which compute provider the orchestrator dispatches to.
    pub compute_provider: String,
    /// Origins allowed to call the service; empty allows all.
    pub allowed_origins: Vec<String>,
    /// Partition count for the metrics ingestion queue.
    pub metrics_partitions: usize,
    /// Interval between run status polls.
    pub poll_interval: Duration,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            storage_url: "http://127.0.0.1:3210".to_string(),
            blob_store_url: None,
            compute_provider: "sky".to_string(),
            allowed_origins: Vec::new(),
            metrics_partitions: 4,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl StudioConfig {
    /// Reads configuration from the environment, falling back to defaults
    /// field by field. Malformed values fail startup rather than being
    /// silently replaced.
    pub fn from_env() -> StudioResult<Self> {
        let defaults = Self::default();

        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| SystemError::Generic(format!("BIND_ADDR '{raw}': {e}")))?,
            Err(_) => defaults.bind_addr,
        };

        let storage_url = std::env::var("STORAGE_URL").unwrap_or(defaults.storage_url);
        let blob_store_url = std::env::var("BLOB_STORE_URL").ok();
        let compute_provider =
            std::env::var("COMPUTE_PROVIDER").unwrap_or(defaults.compute_provider);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let metrics_partitions = match std::env::var("METRICS_PARTITIONS") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| SystemError::Generic(format!("METRICS_PARTITIONS '{raw}': {e}")))?,
            Err(_) => defaults.metrics_partitions,
        };

        let poll_interval = match std::env::var("RUN_POLL_INTERVAL") {
            Ok(raw) => humantime::parse_duration(&raw)
                .map_err(|e| SystemError::Generic(format!("RUN_POLL_INTERVAL '{raw}': {e}")))?,
            Err(_) => defaults.poll_interval,
        };

        Ok(Self {
            bind_addr,
            storage_url,
            blob_store_url,
            compute_provider,
            allowed_origins,
            metrics_partitions,
            poll_interval,
        })
    }

    /// Whether a request origin passes the allow-list.
    pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
        if allowed.is_empty() {
            return true;
        }
        match origin {
            Some(origin) => allowed.iter().any(|candidate| candidate == origin),
            None => true,
        }
    }
}
