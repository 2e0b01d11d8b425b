use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{OrchestratorError, StudioResult},
    orchestrator::{RunConfig, RunId},
};

const DEFAULT_SETUP: &str = "\
# Install RL dependencies
pip install -q stable-baselines3>=2.2.0 gymnasium>=0.29.0 torch>=2.0.0
pip install -q numpy>=1.24.0 scipy>=1.10.0 requests>=2.31.0
";

const DEFAULT_RUN: &str = "\
# Run commands execute under the synced workdir
python train.py
";

/// Provider-agnostic description of one cloud training job, serialized to
/// YAML and handed to the compute backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadManifest {
    pub name: String,
    pub resources: ManifestResources,
    pub workdir: String,
    pub setup: String,
    pub run: String,
    pub envs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_mounts: BTreeMap<String, FileMount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestResources {
    pub accelerators: String,
    pub use_spot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostop: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_recovery: Option<JobRecovery>,
}

/// Automatic restart budget for spot/preemptible capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecovery {
    pub max_restarts_on_errors: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMount {
    pub name: String,
    pub mode: String,
}

impl WorkloadManifest {
    /// Materializes the manifest for one run. Spot requests carry a restart
    /// budget so the backend recovers preemptions on its own.
    pub fn from_run_config(run_id: &RunId, config: &RunConfig, storage_url: &str) -> Self {
        let mut envs = BTreeMap::new();
        envs.insert("RUN_ID".to_string(), run_id.to_string());
        envs.insert("CONVEX_URL".to_string(), storage_url.to_string());
        envs.insert(
            "METRICS_INTERVAL".to_string(),
            config.metrics_interval.to_string(),
        );
        envs.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

        if let Some(spec) = &config.environment_spec {
            let env_name = spec
                .name
                .as_deref()
                .unwrap_or("untitled")
                .to_lowercase()
                .replace(' ', "-");
            envs.insert("ENV_NAME".to_string(), env_name);
            envs.insert("ENV_TYPE".to_string(), spec.world.kind.to_string());
        }

        let mut file_mounts = BTreeMap::new();
        if let Some(bucket) = &config.checkpoint_bucket {
            file_mounts.insert(
                "/checkpoint".to_string(),
                FileMount {
                    name: bucket.clone(),
                    mode: "MOUNT".to_string(),
                },
            );
        }

        Self {
            name: format!("simstudio-{run_id}"),
            resources: ManifestResources {
                accelerators: config.accelerator.clone(),
                use_spot: config.use_spot,
                autostop: config.autostop_minutes,
                job_recovery: config.use_spot.then(|| JobRecovery {
                    max_restarts_on_errors: config.max_restarts,
                }),
            },
            workdir: config.workdir.clone().unwrap_or_else(|| ".".to_string()),
            setup: DEFAULT_SETUP.to_string(),
            run: DEFAULT_RUN.to_string(),
            envs,
            file_mounts,
        }
    }

    pub fn to_yaml(&self) -> StudioResult<String> {
        serde_yaml::to_string(self).map_err(|e| OrchestratorError::Manifest(e.to_string()).into())
    }

    /// Writes the manifest to the job spool directory and returns the path
    /// the backend should read.
    pub async fn write_to_temp(&self, run_id: &RunId) -> StudioResult<PathBuf> {
        let dir = std::env::temp_dir().join("simstudio-jobs");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OrchestratorError::Manifest(format!("spool dir: {e}")))?;
        let path = dir.join(format!("{run_id}.yaml"));
        tokio::fs::write(&path, self.to_yaml()?)
            .await
            .map_err(|e| OrchestratorError::Manifest(format!("write {path:?}: {e}")))?;
        info!(?path, name = %self.name, "workload manifest written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sim::Vec2,
        spec::{
            ActionSpace, AgentSpec, Condition, EnvSpec, ObjectKind, ObjectSpec, RewardRule,
            RuleId, RuleSet, TerminationRule, WorldSpec,
        },
    };

    fn config() -> RunConfig {
        RunConfig {
            accelerator: "A100:2".to_string(),
            use_spot: true,
            autostop_minutes: Some(30),
            checkpoint_bucket: Some("ckpt-bucket".to_string()),
            metrics_interval: 50,
            ..RunConfig::default()
        }
    }

    #[test]
    fn manifest_carries_the_run_identity() {
        let manifest =
            WorkloadManifest::from_run_config(&RunId::from("run-1"), &config(), "https://db");
        assert_eq!(manifest.name, "simstudio-run-1");
        assert_eq!(manifest.envs["RUN_ID"], "run-1");
        assert_eq!(manifest.envs["CONVEX_URL"], "https://db");
        assert_eq!(manifest.envs["METRICS_INTERVAL"], "50");
    }

    #[test]
    fn spot_requests_get_a_restart_budget() {
        let manifest =
            WorkloadManifest::from_run_config(&RunId::from("run-1"), &config(), "https://db");
        assert!(manifest.resources.use_spot);
        assert_eq!(
            manifest.resources.job_recovery,
            Some(JobRecovery {
                max_restarts_on_errors: 3
            })
        );

        let on_demand = RunConfig::default();
        let manifest =
            WorkloadManifest::from_run_config(&RunId::from("run-2"), &on_demand, "https://db");
        assert_eq!(manifest.resources.job_recovery, None);
    }

    #[test]
    fn checkpoint_bucket_becomes_a_mount() {
        let manifest =
            WorkloadManifest::from_run_config(&RunId::from("run-1"), &config(), "https://db");
        assert_eq!(manifest.file_mounts["/checkpoint"].name, "ckpt-bucket");
        assert_eq!(manifest.file_mounts["/checkpoint"].mode, "MOUNT");
    }

    #[test]
    fn environment_metadata_lands_in_envs() {
        let spec = EnvSpec {
            name: Some("Maze World".to_string()),
            world: WorldSpec::grid(3.0, 3.0),
            agents: vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))],
            objects: vec![ObjectSpec::new("g", ObjectKind::Goal, Vec2::new(2.0, 2.0))],
            action_space: ActionSpace::compass(),
            rules: RuleSet {
                rewards: vec![RewardRule {
                    id: RuleId::from("r"),
                    condition: Condition::ReachGoal,
                    reward: 10.0,
                }],
                terminations: vec![TerminationRule {
                    id: RuleId::from("t"),
                    condition: Condition::Timeout { steps: None },
                }],
                events: Vec::new(),
            },
        };
        let run_config = RunConfig {
            environment_spec: Some(spec),
            ..RunConfig::default()
        };
        let manifest =
            WorkloadManifest::from_run_config(&RunId::from("r"), &run_config, "https://db");
        assert_eq!(manifest.envs["ENV_NAME"], "maze-world");
        assert_eq!(manifest.envs["ENV_TYPE"], "grid");
    }

    #[test]
    fn yaml_round_trips() {
        let manifest =
            WorkloadManifest::from_run_config(&RunId::from("run-1"), &config(), "https://db");
        let yaml = manifest.to_yaml().unwrap();
        assert!(yaml.contains("max_restarts_on_errors: 3"));
        let back: WorkloadManifest = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(manifest, back);
    }
}
