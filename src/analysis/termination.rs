use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{EMPTY_INPUT_WARNING, stats},
    rollout::Rollout,
};

/// Share of terminations above which a reason participates in a conflict.
const CONFLICT_SHARE: f64 = 0.3;
/// Percentile cut for premature terminations.
const PREMATURE_PERCENTILE: f64 = 10.0;
/// Percentile cut for late terminations.
const LATE_PERCENTILE: f64 = 90.0;

// ================================================================================================
// Report types
// ================================================================================================

/// Distribution of termination steps for one reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonStats {
    pub reason: String,
    pub mean_step: f64,
    pub median_step: f64,
    pub std_step: f64,
    pub min_step: u32,
    pub max_step: u32,
    pub count: usize,
    pub skewness: f64,
    pub kurtosis: f64,
}

/// Two reasons each claiming a large share of terminations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictingRule {
    pub rule: String,
    pub frequency: f64,
    pub conflict_with: Vec<String>,
}

/// Terminations landing in the tail of a reason's step distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierTerminations {
    pub reason: String,
    pub count: usize,
    pub mean_step: f64,
    pub threshold: f64,
}

/// Termination patterns across a batch of rollouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationAnalysis {
    pub termination_counts: BTreeMap<String, usize>,
    pub top_causes: Vec<(String, usize)>,
    pub heatmap_data: Vec<ReasonStats>,
    pub conflicting_rules: Vec<ConflictingRule>,
    pub premature_terminations: Vec<OutlierTerminations>,
    pub late_terminations: Vec<OutlierTerminations>,
    pub warnings: Vec<String>,
}

// ================================================================================================
// Analysis
// ================================================================================================

pub fn analyze_terminations(rollouts: &[Rollout]) -> TerminationAnalysis {
    if rollouts.is_empty() {
        return TerminationAnalysis {
            termination_counts: BTreeMap::new(),
            top_causes: Vec::new(),
            heatmap_data: Vec::new(),
            conflicting_rules: Vec::new(),
            premature_terminations: Vec::new(),
            late_terminations: Vec::new(),
            warnings: vec![EMPTY_INPUT_WARNING.to_string()],
        };
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut distributions: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for rollout in rollouts {
        let Some(reason) = rollout.termination_reason.as_ref() else {
            continue;
        };
        let reason = reason.to_string();
        *counts.entry(reason.clone()).or_default() += 1;
        distributions
            .entry(reason)
            .or_default()
            .push(f64::from(rollout.episode_length));
    }

    let mut top_causes: Vec<(String, usize)> =
        counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    top_causes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_causes.truncate(10);

    let heatmap_data = distributions
        .iter()
        .map(|(reason, steps)| ReasonStats {
            reason: reason.clone(),
            mean_step: stats::mean(steps),
            median_step: stats::median(steps),
            std_step: stats::sample_std(steps),
            min_step: steps.iter().copied().fold(f64::INFINITY, f64::min) as u32,
            max_step: steps.iter().copied().fold(0.0, f64::max) as u32,
            count: steps.len(),
            skewness: stats::skewness(steps),
            kurtosis: stats::kurtosis(steps),
        })
        .collect();

    TerminationAnalysis {
        conflicting_rules: detect_conflicts(&counts),
        premature_terminations: detect_outliers(&distributions, PREMATURE_PERCENTILE, true),
        late_terminations: detect_outliers(&distributions, LATE_PERCENTILE, false),
        termination_counts: counts,
        top_causes,
        heatmap_data,
        warnings: Vec::new(),
    }
}

/// Reasons each holding at least [`CONFLICT_SHARE`] of terminations while
/// another reason also fires.
fn detect_conflicts(counts: &BTreeMap<String, usize>) -> Vec<ConflictingRule> {
    if counts.len() < 2 {
        return Vec::new();
    }
    let total: usize = counts.values().sum();
    if total == 0 {
        return Vec::new();
    }
    counts
        .iter()
        .filter_map(|(reason, count)| {
            let frequency = *count as f64 / total as f64;
            (frequency >= CONFLICT_SHARE).then(|| ConflictingRule {
                rule: reason.clone(),
                frequency,
                conflict_with: counts.keys().filter(|r| *r != reason).cloned().collect(),
            })
        })
        .collect()
}

fn detect_outliers(
    distributions: &BTreeMap<String, Vec<f64>>,
    percentile: f64,
    below: bool,
) -> Vec<OutlierTerminations> {
    let mut outliers = Vec::new();
    for (reason, steps) in distributions {
        if steps.is_empty() {
            continue;
        }
        let threshold = stats::percentile(steps, percentile);
        let tail: Vec<f64> = steps
            .iter()
            .copied()
            .filter(|s| if below { *s < threshold } else { *s > threshold })
            .collect();
        if !tail.is_empty() {
            outliers.push(OutlierTerminations {
                reason: reason.clone(),
                count: tail.len(),
                mean_step: stats::mean(&tail),
                threshold,
            });
        }
    }
    outliers
}
