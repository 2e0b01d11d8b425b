use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::stats;

/// Streaming accumulators for research-level training diagnostics:
/// TD-error, value estimates, policy entropy, KL divergence between policy
/// snapshots, and gradient norms. Summaries roll up on demand.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    td_errors: Vec<f64>,
    value_estimates: Vec<f64>,
    policy_entropy: Vec<f64>,
    kl_divergences: Vec<f64>,
    gradient_norms: Vec<f64>,
}

/// Rolling mean/std/min/max of one diagnostic series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesSummary {
    fn of(xs: &[f64]) -> Self {
        if xs.is_empty() {
            return Self::default();
        }
        Self {
            mean: stats::mean(xs),
            std: stats::std(xs),
            min: xs.iter().copied().fold(f64::INFINITY, f64::min),
            max: xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSummary {
    pub td_error: SeriesSummary,
    pub value_estimate: SeriesSummary,
    pub policy_entropy: SeriesSummary,
    /// Whether entropy rose or fell over the recorded window.
    pub entropy_trend: EntropyTrend,
    pub kl_divergence: SeriesSummary,
    pub gradient_norm: SeriesSummary,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntropyTrend {
    Increasing,
    #[default]
    Decreasing,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-step temporal-difference error against the bootstrapped target.
    pub fn record_td_error(
        &mut self,
        reward: f64,
        value_current: f64,
        value_next: f64,
        gamma: f64,
        done: bool,
    ) -> f64 {
        let target = if done {
            reward
        } else {
            reward + gamma * value_next
        };
        let td_error = target - value_current;
        self.td_errors.push(td_error);
        self.value_estimates.push(value_current);
        td_error
    }

    /// Entropy of an action-probability vector, in nats, normalized first.
    pub fn record_policy_entropy(&mut self, action_probs: &BTreeMap<String, f64>) -> f64 {
        let total: f64 = action_probs.values().sum();
        if total <= 0.0 {
            self.policy_entropy.push(0.0);
            return 0.0;
        }
        let probs: Vec<f64> = action_probs.values().map(|p| p / total).collect();
        let entropy = stats::entropy_nats(&probs);
        self.policy_entropy.push(entropy);
        entropy
    }

    /// KL divergence between old and new action distributions over the
    /// union of their supports.
    pub fn record_kl_divergence(
        &mut self,
        old_probs: &BTreeMap<String, f64>,
        new_probs: &BTreeMap<String, f64>,
    ) -> f64 {
        let actions: std::collections::BTreeSet<&String> =
            old_probs.keys().chain(new_probs.keys()).collect();
        let kl: f64 = actions
            .into_iter()
            .map(|action| {
                let old = old_probs.get(action).copied().unwrap_or(1e-10);
                let new = new_probs.get(action).copied().unwrap_or(1e-10);
                old * ((old + 1e-10) / (new + 1e-10)).ln()
            })
            .sum();
        self.kl_divergences.push(kl);
        kl
    }

    pub fn record_gradient_norm(&mut self, norm: f64) {
        self.gradient_norms.push(norm);
    }

    pub fn summary(&self) -> DiagnosticsSummary {
        let empty = self.td_errors.is_empty()
            && self.policy_entropy.is_empty()
            && self.kl_divergences.is_empty()
            && self.gradient_norms.is_empty();
        let entropy_trend = match (self.policy_entropy.first(), self.policy_entropy.last()) {
            (Some(first), Some(last)) if last > first => EntropyTrend::Increasing,
            _ => EntropyTrend::Decreasing,
        };
        DiagnosticsSummary {
            td_error: SeriesSummary::of(&self.td_errors),
            value_estimate: SeriesSummary::of(&self.value_estimates),
            policy_entropy: SeriesSummary::of(&self.policy_entropy),
            entropy_trend,
            kl_divergence: SeriesSummary::of(&self.kl_divergences),
            gradient_norm: SeriesSummary::of(&self.gradient_norms),
            warnings: if empty {
                vec![crate::analysis::EMPTY_INPUT_WARNING.to_string()]
            } else {
                Vec::new()
            },
        }
    }
}

// ================================================================================================
// Value-function heatmap
// ================================================================================================

/// Per-cell mean of value estimates over a discretized world grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueHeatmap {
    pub heatmap: Vec<Vec<f64>>,
    pub min_value: f64,
    pub max_value: f64,
    pub grid_size: usize,
}

/// Buckets `(position, value)` samples into a `grid_size` x `grid_size`
/// heatmap of mean value per cell.
pub fn value_heatmap(
    positions: &[crate::sim::Vec2],
    values: &[f64],
    world_width: f64,
    world_height: f64,
    grid_size: usize,
) -> ValueHeatmap {
    let grid_size = grid_size.max(1);
    let mut sums = vec![vec![0.0f64; grid_size]; grid_size];
    let mut counts = vec![vec![0usize; grid_size]; grid_size];

    for (pos, value) in positions.iter().zip(values) {
        let x = ((pos.x / world_width) * grid_size as f64) as isize;
        let y = ((pos.y / world_height) * grid_size as f64) as isize;
        let x = x.clamp(0, grid_size as isize - 1) as usize;
        let y = y.clamp(0, grid_size as isize - 1) as usize;
        sums[y][x] += value;
        counts[y][x] += 1;
    }

    let mut min_value = f64::INFINITY;
    let mut max_value = f64::NEG_INFINITY;
    let mut heatmap = vec![vec![0.0f64; grid_size]; grid_size];
    let mut any = false;
    for y in 0..grid_size {
        for x in 0..grid_size {
            if counts[y][x] > 0 {
                let mean = sums[y][x] / counts[y][x] as f64;
                heatmap[y][x] = mean;
                min_value = min_value.min(mean);
                max_value = max_value.max(mean);
                any = true;
            }
        }
    }
    if !any {
        min_value = 0.0;
        max_value = 0.0;
    }

    ValueHeatmap {
        heatmap,
        min_value,
        max_value,
        grid_size,
    }
}
