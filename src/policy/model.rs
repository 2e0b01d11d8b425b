use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use tracing::info;

use crate::{
    cache::StudioCaches,
    error::{PolicyError, StorageError, StudioResult},
    policy::{Policy, PolicyKind},
    sim::{AgentState, CompiledEnv, EpisodeState, Vec2},
    spec::{Action, ActionSpace},
};

/// Feature vector fed to a serialized policy: normalized agent position plus
/// the normalized offset to the nearest goal.
pub const FEATURE_DIM: usize = 4;

/// Algorithm family a model was trained with.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
    Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AlgorithmKind {
    #[default]
    Ppo,
    Dqn,
    A2c,
}

/// Serialized policy artifact: a linear map over [`FEATURE_DIM`] features
/// with embedded metadata. Discrete models argmax their logits into the
/// action vocabulary; continuous models emit the raw output vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<AlgorithmKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_names: Option<Vec<String>>,
    /// One row of `FEATURE_DIM` coefficients per output.
    pub weights: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias: Option<Vec<f64>>,
}

impl ModelArtifact {
    pub fn from_json(bytes: &[u8], source: &str) -> StudioResult<Self> {
        let artifact: Self = serde_json::from_slice(bytes)
            .map_err(|e| PolicyError::ModelDecode(format!("{source}: {e}")))?;
        if artifact.weights.is_empty()
            || artifact.weights.iter().any(|row| row.len() != FEATURE_DIM)
        {
            return Err(PolicyError::ModelDecode(format!(
                "{source}: weights must be rows of {FEATURE_DIM} coefficients"
            ))
            .into());
        }
        Ok(artifact)
    }

    /// Algorithm family: embedded metadata wins, then name heuristics,
    /// then the PPO default.
    pub fn algorithm_family(&self, source: &str) -> AlgorithmKind {
        if let Some(algorithm) = self.algorithm {
            return algorithm;
        }
        let haystack = format!(
            "{} {}",
            self.name.as_deref().unwrap_or_default(),
            source
        )
        .to_lowercase();
        for candidate in [AlgorithmKind::Dqn, AlgorithmKind::A2c, AlgorithmKind::Ppo] {
            if haystack.contains(&candidate.to_string()) {
                return candidate;
            }
        }
        AlgorithmKind::default()
    }

    fn logits(&self, features: &[f64; FEATURE_DIM]) -> Vec<f64> {
        self.weights
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let dot: f64 = row.iter().zip(features).map(|(w, f)| w * f).sum();
                dot + self.bias.as_ref().and_then(|b| b.get(i)).copied().unwrap_or(0.0)
            })
            .collect()
    }
}

// ================================================================================================
// Inference policy
// ================================================================================================

/// Runs a loaded [`ModelArtifact`] as a deterministic inference policy,
/// converting model output into the spec's action space.
#[derive(Debug, Clone)]
pub struct TrainedModelPolicy {
    artifact: Arc<ModelArtifact>,
}

impl TrainedModelPolicy {
    pub fn new(artifact: Arc<ModelArtifact>) -> Self {
        Self { artifact }
    }

    fn infer(&self, agent: &AgentState, env: &CompiledEnv) -> Action {
        let features = observation(agent, env);
        let logits = self.artifact.logits(&features);

        match &env.spec().action_space {
            ActionSpace::Discrete { actions } => {
                let names = self.artifact.action_names.as_ref().unwrap_or(actions);
                let limit = logits.len().min(names.len());
                let index = logits[..limit]
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                Action::Discrete(names[index].clone())
            }
            ActionSpace::Continuous { dims, range } => {
                let values = (0..*dims)
                    .map(|i| logits.get(i).copied().unwrap_or(0.0).clamp(range[0], range[1]))
                    .collect();
                Action::Continuous(values)
            }
        }
    }
}

impl Policy for TrainedModelPolicy {
    fn select(&mut self, state: &EpisodeState, env: &CompiledEnv) -> StudioResult<Action> {
        if state.agents.is_empty() {
            return Err(PolicyError::InvalidInput("no agents in state".to_string()).into());
        }
        if state.agents.len() > 1 {
            let entries: Vec<_> = state
                .agents
                .iter()
                .map(|agent| (agent.id.clone(), self.infer(agent, env)))
                .collect();
            return Ok(Action::multi(entries));
        }
        Ok(self.infer(&state.agents[0], env))
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::TrainedModel
    }
}

fn observation(agent: &AgentState, env: &CompiledEnv) -> [f64; FEATURE_DIM] {
    let world = &env.spec().world;
    let goal = env
        .object_positions(env.goals())
        .min_by(|a, b| {
            agent
                .position
                .distance(*a)
                .total_cmp(&agent.position.distance(*b))
        })
        .unwrap_or(Vec2::ZERO);
    [
        agent.position.x / world.width,
        agent.position.y / world.height,
        (goal.x - agent.position.x) / world.width,
        (goal.y - agent.position.y) / world.height,
    ]
}

// ================================================================================================
// Loading
// ================================================================================================

/// Fetches and caches model artifacts, by direct URL or by run id through
/// the storage client. Cached entries live for an hour.
pub struct ModelLoader {
    blob: Arc<dyn crate::storage::BlobStore>,
    storage: Arc<dyn crate::storage::StorageClient>,
    caches: Arc<StudioCaches>,
    http: reqwest::Client,
}

impl ModelLoader {
    pub fn new(
        blob: Arc<dyn crate::storage::BlobStore>,
        storage: Arc<dyn crate::storage::StorageClient>,
        caches: Arc<StudioCaches>,
    ) -> Self {
        Self {
            blob,
            storage,
            caches,
            http: reqwest::Client::new(),
        }
    }

    /// Loads a model by URL: `http(s)` URLs are fetched directly, anything
    /// else is treated as a blob-store key.
    pub async fn load_by_url(&self, url: &str) -> StudioResult<Arc<ModelArtifact>> {
        if let Some(cached) = self.caches.get_model(url) {
            return Ok(cached);
        }

        let bytes = if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| StorageError::service("blob", e.to_string()))?;
            if !response.status().is_success() {
                return Err(PolicyError::MissingModel(format!(
                    "{url}: {}",
                    response.status()
                ))
                .into());
            }
            response
                .bytes()
                .await
                .map_err(|e| StorageError::service("blob", e.to_string()))?
        } else {
            self.blob.get(url).await?
        };

        let artifact = Arc::new(ModelArtifact::from_json(&bytes, url)?);
        info!(
            url,
            algorithm = %artifact.algorithm_family(url),
            outputs = artifact.weights.len(),
            "model loaded"
        );
        self.caches.set_model(url, artifact.clone());
        Ok(artifact)
    }

    /// Resolves a run's model URL through the storage client, then loads it.
    pub async fn load_for_run(&self, run_id: &str) -> StudioResult<Arc<ModelArtifact>> {
        let record = self
            .storage
            .query("models/get", serde_json::json!({ "runId": run_id }))
            .await?;
        let url = record
            .get("modelUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PolicyError::MissingModel(format!("run '{run_id}' has no model URL")))?;
        self.load_by_url(url).await
    }
}
