pub mod config;
pub mod respond;
pub mod routes;
pub mod stream;

use std::sync::Arc;

use crate::{
    cache::StudioCaches,
    error::{PolicyError, StudioResult},
    ingest::IngestService,
    orchestrator::{ComputeBackend, Orchestrator},
    policy::{
        GreedyPolicy, ModelArtifact, ModelLoader, Policy, PolicyKind, RandomPolicy,
        TrainedModelPolicy,
    },
    sim::CompiledEnv,
    spec::{self, EnvSpec},
    storage::{BlobStore, StorageClient},
};

pub use config::StudioConfig;
pub use routes::router;

/// Everything a request handler needs, threaded explicitly instead of
/// living in module-level singletons. One instance per process, owned by
/// the server for its whole lifetime.
pub struct AppContext {
    pub caches: Arc<StudioCaches>,
    pub storage: Arc<dyn StorageClient>,
    pub blob: Arc<dyn BlobStore>,
    pub orchestrator: Orchestrator,
    pub ingest: IngestService,
    pub models: ModelLoader,
    pub allowed_origins: Vec<String>,
}

impl AppContext {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        blob: Arc<dyn BlobStore>,
        backend: Arc<dyn ComputeBackend>,
        config: &StudioConfig,
    ) -> Self {
        let caches = Arc::new(StudioCaches::new());
        let orchestrator = Orchestrator::new(backend, storage.clone(), &config.storage_url)
            .with_poll_interval(config.poll_interval);
        let ingest = IngestService::new(storage.clone(), config.metrics_partitions);
        let models = ModelLoader::new(blob.clone(), storage.clone(), caches.clone());
        Self {
            caches,
            storage,
            blob,
            orchestrator,
            ingest,
            models,
            allowed_origins: config.allowed_origins.clone(),
        }
    }

    /// Compiles a spec through the environment cache: sanitized-hash lookup
    /// first, full validate/sanitize/index on miss.
    pub fn compiled_env(&self, raw: &EnvSpec) -> StudioResult<Arc<CompiledEnv>> {
        let hash = spec::validate::sanitize(raw).hash()?;
        if let Some(env) = self.caches.get_env(&hash) {
            return Ok(env);
        }
        let env = Arc::new(CompiledEnv::compile(raw)?);
        self.caches.set_env(env.clone());
        Ok(env)
    }

    /// Builds the per-seed policy factory for a request. Trained-model
    /// policies share one loaded artifact across all workers.
    pub fn policy_factory(
        &self,
        kind: PolicyKind,
        model: Option<Arc<ModelArtifact>>,
    ) -> impl Fn(u64) -> StudioResult<Box<dyn Policy>> + Send + Sync + use<> {
        move |seed: u64| -> StudioResult<Box<dyn Policy>> {
            match kind {
                PolicyKind::Random => Ok(Box::new(RandomPolicy::seeded(seed))),
                PolicyKind::Greedy => Ok(Box::new(GreedyPolicy::seeded(seed))),
                PolicyKind::TrainedModel => {
                    let artifact = model.clone().ok_or_else(|| {
                        PolicyError::MissingModel(
                            "trained_model policy requires runId or modelUrl".to_string(),
                        )
                    })?;
                    Ok(Box::new(TrainedModelPolicy::new(artifact)))
                }
            }
        }
    }
}
