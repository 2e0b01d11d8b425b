pub mod engine;
pub mod manifest;
pub mod sky;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    error::StudioResult,
    impl_id_newtype,
    policy::AlgorithmKind,
    spec::EnvSpec,
};

pub use engine::Orchestrator;
pub use manifest::WorkloadManifest;
pub use sky::SkyCliBackend;

// ================================================================================================
// Identifiers
// ================================================================================================

/// Studio-side identifier of a training run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RunId(pub String);
impl_id_newtype!(RunId);

/// Provider-side identifier of a submitted workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct JobId(pub String);
impl_id_newtype!(JobId);

// ================================================================================================
// Run state machine
// ================================================================================================

/// Lifecycle status of a run. Transitions are monotone:
///
/// ```md
/// pending ──launch──▶ running ──success──▶ succeeded
///    │                   │──fail──▶ failed
///    │                   │──cancel──▶ cancelled
///    │──launch-fail──▶ failed
///    └──cancel──▶ cancelled
/// ```
///
/// Terminal statuses are immutable; same-status writes are idempotent
/// no-ops.
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
    EnumIter,
    IntoStaticStr,
    Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether a write moving this status to `next` is admissible under the
    /// state-machine partial order.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::Running => next.is_terminal(),
            Self::Succeeded | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// One run as tracked by the orchestrator and persisted to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: RunId,
    pub job_id: JobId,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_log_update: Option<i64>,
}

// ================================================================================================
// Backend contract
// ================================================================================================

/// Status as reported by the compute provider. `error` and `not_found` are
/// response values, not raised errors, so the poll loop can keep going.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReportedStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    NotFound,
    Error,
}

impl ReportedStatus {
    /// Maps a provider state onto the run state machine, when it has one.
    pub fn as_run_status(&self) -> Option<RunStatus> {
        match self {
            Self::Pending => Some(RunStatus::Pending),
            Self::Running => Some(RunStatus::Running),
            Self::Succeeded => Some(RunStatus::Succeeded),
            Self::Failed => Some(RunStatus::Failed),
            Self::Cancelled => Some(RunStatus::Cancelled),
            Self::NotFound | Self::Error => None,
        }
    }
}

/// Provider view of one job, returned by status polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ReportedStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReportedStatus::Error,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Tail of a job's log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogChunk {
    pub logs: String,
    pub line_count: usize,
    pub truncated: bool,
}

/// Capability over the cloud compute dispatcher. Spot recovery is the
/// backend's responsibility; the orchestrator only requests it in the
/// manifest and observes the resulting status transitions.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Whether credentials and provider tooling are usable.
    async fn is_ready(&self) -> StudioResult<bool>;

    /// One-shot credential/tooling auto-configuration attempt.
    async fn setup(&self) -> StudioResult<()>;

    /// Submits a workload, returning the provider job id.
    async fn submit(&self, manifest: &WorkloadManifest) -> StudioResult<JobId>;

    async fn status(&self, job: &JobId) -> StudioResult<StatusReport>;

    async fn logs(&self, job: &JobId, max_lines: usize) -> StudioResult<LogChunk>;

    async fn cancel(&self, job: &JobId) -> StudioResult<()>;
}

// ================================================================================================
// Run configuration
// ================================================================================================

fn default_accelerator() -> String {
    "A10:1".to_string()
}

fn default_metrics_interval() -> u32 {
    100
}

fn default_max_restarts() -> u32 {
    3
}

/// What to train and on what hardware. Compiles into a
/// [`WorkloadManifest`] at launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub algorithm: AlgorithmKind,
    #[serde(default)]
    pub hyperparams: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_spec: Option<EnvSpec>,
    #[serde(default = "default_accelerator")]
    pub accelerator: String,
    #[serde(default)]
    pub use_spot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostop_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_bucket: Option<String>,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: u32,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::default(),
            hyperparams: serde_json::Value::Null,
            environment_spec: None,
            accelerator: default_accelerator(),
            use_spot: false,
            autostop_minutes: None,
            checkpoint_bucket: None,
            metrics_interval: default_metrics_interval(),
            max_restarts: default_max_restarts(),
            workdir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn statuses_use_exact_wire_names() {
        let names: Vec<String> = RunStatus::iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec!["pending", "running", "succeeded", "failed", "cancelled"]
        );
    }

    #[test]
    fn terminal_statuses_are_immutable() {
        for terminal in [RunStatus::Succeeded, RunStatus::Failed, RunStatus::Cancelled] {
            for next in RunStatus::iter() {
                assert_eq!(terminal.can_transition_to(next), terminal == next);
            }
        }
    }

    #[test]
    fn running_never_goes_backward() {
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Succeeded));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn provider_error_states_map_to_nothing() {
        assert_eq!(ReportedStatus::Error.as_run_status(), None);
        assert_eq!(ReportedStatus::NotFound.as_run_status(), None);
        assert_eq!(
            ReportedStatus::Running.as_run_status(),
            Some(RunStatus::Running)
        );
    }

    #[test]
    fn run_config_defaults_fill_in() {
        let config: RunConfig = serde_json::from_str(r#"{"algorithm": "ppo"}"#).unwrap();
        assert_eq!(config.accelerator, "A10:1");
        assert_eq!(config.metrics_interval, 100);
        assert_eq!(config.max_restarts, 3);
        assert!(!config.use_spot);
    }
}
