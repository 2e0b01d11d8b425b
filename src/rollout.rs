pub mod driver;
pub mod parallel;
pub mod vectorized;

use serde::{Deserialize, Serialize};

use crate::{
    sim::{EpisodeState, TerminationReason},
    spec::Action,
};

pub use driver::{RolloutOptions, run_rollout};
pub use parallel::{BatchOptions, BatchSummary, BenchmarkReport, benchmark, run_parallel};
pub use vectorized::{VectorizedBatch, run_vectorized};

/// One recorded tick of a rollout: the post-step state snapshot, the action
/// that produced it, the reward paid on this step, and the done flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub state: EpisodeState,
    pub action: Action,
    pub reward: f64,
    pub done: bool,
}

/// Finite recorded trajectory plus its summary line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub steps: Vec<StepRecord>,
    pub total_reward: f64,
    pub episode_length: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Rollout {
    /// Zero-length rollout carrying a failure, used when a worker errors
    /// instead of aborting its whole batch.
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            steps: Vec::new(),
            total_reward: 0.0,
            episode_length: 0,
            success: false,
            termination_reason: Some(TerminationReason::Failed(message.clone())),
            error: Some(message),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.termination_reason, Some(TerminationReason::Cancelled))
    }
}
