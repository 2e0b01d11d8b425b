pub mod diagnostics;
pub mod reward;
pub mod stats;
pub mod termination;
pub mod trajectory;

pub use diagnostics::{Diagnostics, DiagnosticsSummary, ValueHeatmap, value_heatmap};
pub use reward::{BatchRewardAnalysis, RewardAnalysis, analyze_rollout, analyze_rollouts};
pub use termination::{TerminationAnalysis, analyze_terminations};
pub use trajectory::{
    BatchTrajectoryAnalysis, TrajectoryAnalysis, analyze_trajectories, analyze_trajectory,
};

/// Warning attached by every routine that receives nothing to analyze.
pub(crate) const EMPTY_INPUT_WARNING: &str = "empty input";
