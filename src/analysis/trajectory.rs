use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{EMPTY_INPUT_WARNING, stats},
    rollout::{Rollout, StepRecord},
    sim::Vec2,
    spec::Action,
};

/// Back-and-forth detection window, in steps.
const OSCILLATION_WINDOW: usize = 5;
/// Autocorrelation score above which an oscillation is reported.
const OSCILLATION_SCORE_THRESHOLD: f64 = 0.3;
/// Density-clustering radius for attractor detection.
const ATTRACTOR_RADIUS: f64 = 1.0;
/// Minimum points for a dense cluster.
const ATTRACTOR_MIN_SAMPLES: usize = 5;

// ================================================================================================
// Report types
// ================================================================================================

/// One sample of the first agent's path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryPoint {
    pub step: u32,
    pub position: Vec2,
    pub action: Action,
    pub reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OscillationReport {
    pub detected: bool,
    pub oscillation_count: usize,
    pub oscillation_rate: f64,
    pub oscillation_score: f64,
}

/// A spatial cluster the agent kept returning to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attractor {
    pub position: Vec2,
    pub visit_count: usize,
    pub visit_duration: usize,
    pub steps: Vec<usize>,
    pub cluster_id: usize,
}

/// Trajectory structure of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryAnalysis {
    pub trajectory_path: Vec<TrajectoryPoint>,
    pub action_distribution: BTreeMap<String, usize>,
    /// Shannon entropy of the action distribution, in bits.
    pub policy_entropy: f64,
    pub trajectory_length: usize,
    pub path_efficiency: f64,
    pub oscillation: OscillationReport,
    pub suboptimal_attractors: Vec<Attractor>,
    pub warnings: Vec<String>,
}

/// Trajectory statistics across a batch of episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTrajectoryAnalysis {
    pub num_rollouts: usize,
    pub mean_entropy: f64,
    pub std_entropy: f64,
    /// Per-step action entropy across aligned trajectories, in nats.
    pub entropy_over_time: Vec<f64>,
    /// Mean pairwise per-step position distance between aligned trajectories.
    pub trajectory_diversity: f64,
    pub warnings: Vec<String>,
}

// ================================================================================================
// Single-episode analysis
// ================================================================================================

pub fn analyze_trajectory(steps: &[StepRecord]) -> TrajectoryAnalysis {
    if steps.is_empty() {
        return TrajectoryAnalysis {
            trajectory_path: Vec::new(),
            action_distribution: BTreeMap::new(),
            policy_entropy: 0.0,
            trajectory_length: 0,
            path_efficiency: 0.0,
            oscillation: OscillationReport::default(),
            suboptimal_attractors: Vec::new(),
            warnings: vec![EMPTY_INPUT_WARNING.to_string()],
        };
    }

    let mut path = Vec::with_capacity(steps.len());
    let mut action_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for step in steps {
        let Some(agent) = step.state.agents.first() else {
            continue;
        };
        path.push(TrajectoryPoint {
            step: step.state.step,
            position: agent.position,
            action: step.action.clone(),
            reward: step.reward,
        });
        *action_distribution.entry(action_key(&step.action)).or_default() += 1;
    }

    let total_actions: usize = action_distribution.values().sum();
    let policy_entropy = if total_actions > 0 {
        let probs: Vec<f64> = action_distribution
            .values()
            .map(|count| *count as f64 / total_actions as f64)
            .collect();
        stats::entropy_bits(&probs)
    } else {
        0.0
    };

    let positions: Vec<Vec2> = path.iter().map(|p| p.position).collect();

    TrajectoryAnalysis {
        policy_entropy,
        trajectory_length: path.len(),
        path_efficiency: path_efficiency(&positions),
        oscillation: detect_oscillations(&positions, path.len()),
        suboptimal_attractors: detect_attractors(&positions),
        action_distribution,
        trajectory_path: path,
        warnings: Vec::new(),
    }
}

fn action_key(action: &Action) -> String {
    match action {
        Action::Discrete(name) => name.clone(),
        Action::Continuous(values) => format!("continuous_{}d", values.len()),
        Action::Multi(map) => format!("multi_{}", map.len()),
    }
}

/// Straight-line distance over path length, clamped to [0, 1].
fn path_efficiency(positions: &[Vec2]) -> f64 {
    if positions.len() < 2 {
        return 1.0;
    }
    let straight = positions[0].distance(positions[positions.len() - 1]);
    let actual: f64 = positions
        .windows(2)
        .map(|pair| pair[0].distance(pair[1]))
        .sum();
    if actual == 0.0 {
        return 1.0;
    }
    (straight / actual).min(1.0)
}

fn detect_oscillations(positions: &[Vec2], trajectory_len: usize) -> OscillationReport {
    if positions.len() < OSCILLATION_WINDOW * 2 {
        return OscillationReport::default();
    }

    let displacements: Vec<f64> = positions
        .windows(2)
        .map(|pair| pair[0].distance(pair[1]))
        .collect();

    // Zero-lag autocorrelation of displacement magnitudes, normalized by
    // the usable sample count.
    let score = if displacements.len() > OSCILLATION_WINDOW {
        let energy: f64 = displacements.iter().map(|d| d * d).sum();
        energy / (displacements.len() - OSCILLATION_WINDOW + 1) as f64
    } else {
        0.0
    };

    // Back-and-forth counting: a step that lands within 0.1 of a recently
    // visited position counts as one oscillation.
    let mut count = 0usize;
    for i in OSCILLATION_WINDOW..positions.len().saturating_sub(OSCILLATION_WINDOW) {
        let current = positions[i];
        let window_start = i.saturating_sub(OSCILLATION_WINDOW);
        if positions[window_start..i]
            .iter()
            .any(|prev| prev.distance(current) < 0.1)
        {
            count += 1;
        }
    }

    OscillationReport {
        detected: score > OSCILLATION_SCORE_THRESHOLD,
        oscillation_count: count,
        oscillation_rate: if trajectory_len > 0 {
            count as f64 / trajectory_len as f64
        } else {
            0.0
        },
        oscillation_score: score,
    }
}

/// Density-based clustering over visited positions (radius 1.0, minimum
/// five samples). Clusters come back sorted by visit count.
fn detect_attractors(positions: &[Vec2]) -> Vec<Attractor> {
    if positions.len() < 10 {
        return Vec::new();
    }

    const UNVISITED: i64 = -2;
    const NOISE: i64 = -1;
    let mut labels = vec![UNVISITED; positions.len()];
    let mut cluster_id: i64 = 0;

    let neighbors = |idx: usize| -> Vec<usize> {
        positions
            .iter()
            .enumerate()
            .filter(|(j, p)| *j != idx && p.distance(positions[idx]) <= ATTRACTOR_RADIUS)
            .map(|(j, _)| j)
            .collect()
    };

    for i in 0..positions.len() {
        if labels[i] != UNVISITED {
            continue;
        }
        let seed = neighbors(i);
        if seed.len() + 1 < ATTRACTOR_MIN_SAMPLES {
            labels[i] = NOISE;
            continue;
        }
        labels[i] = cluster_id;
        let mut queue: Vec<usize> = seed;
        while let Some(j) = queue.pop() {
            if labels[j] == NOISE {
                labels[j] = cluster_id;
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = cluster_id;
            let expansion = neighbors(j);
            if expansion.len() + 1 >= ATTRACTOR_MIN_SAMPLES {
                queue.extend(expansion);
            }
        }
        cluster_id += 1;
    }

    let mut attractors = Vec::new();
    for id in 0..cluster_id {
        let members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == id)
            .map(|(idx, _)| idx)
            .collect();
        if members.is_empty() {
            continue;
        }
        let center_x = stats::mean(&members.iter().map(|&m| positions[m].x).collect::<Vec<_>>());
        let center_y = stats::mean(&members.iter().map(|&m| positions[m].y).collect::<Vec<_>>());
        let first = *members.iter().min().unwrap_or(&0);
        let last = *members.iter().max().unwrap_or(&0);
        attractors.push(Attractor {
            position: Vec2::new(center_x, center_y),
            visit_count: members.len(),
            visit_duration: last - first + 1,
            steps: members,
            cluster_id: id as usize,
        });
    }
    attractors.sort_by(|a, b| b.visit_count.cmp(&a.visit_count));
    attractors
}

// ================================================================================================
// Cross-episode analysis
// ================================================================================================

pub fn analyze_trajectories(rollouts: &[Rollout]) -> BatchTrajectoryAnalysis {
    if rollouts.is_empty() {
        return BatchTrajectoryAnalysis {
            num_rollouts: 0,
            mean_entropy: 0.0,
            std_entropy: 0.0,
            entropy_over_time: Vec::new(),
            trajectory_diversity: 0.0,
            warnings: vec![EMPTY_INPUT_WARNING.to_string()],
        };
    }

    let analyses: Vec<TrajectoryAnalysis> = rollouts
        .iter()
        .map(|r| analyze_trajectory(&r.steps))
        .collect();
    let entropies: Vec<f64> = analyses.iter().map(|a| a.policy_entropy).collect();
    let paths: Vec<&Vec<TrajectoryPoint>> =
        analyses.iter().map(|a| &a.trajectory_path).collect();

    BatchTrajectoryAnalysis {
        num_rollouts: rollouts.len(),
        mean_entropy: stats::mean(&entropies),
        std_entropy: stats::std(&entropies),
        entropy_over_time: entropy_over_time(&paths),
        trajectory_diversity: diversity(&paths),
        warnings: Vec::new(),
    }
}

fn entropy_over_time(paths: &[&Vec<TrajectoryPoint>]) -> Vec<f64> {
    let max_len = paths.iter().map(|p| p.len()).max().unwrap_or(0);
    let mut curve = Vec::with_capacity(max_len);
    for step_idx in 0..max_len {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for path in paths {
            if let Some(point) = path.get(step_idx) {
                *counts.entry(action_key(&point.action)).or_default() += 1;
            }
        }
        let total: usize = counts.values().sum();
        if total == 0 {
            continue;
        }
        let probs: Vec<f64> = counts.values().map(|c| *c as f64 / total as f64).collect();
        curve.push(stats::entropy_nats(&probs));
    }
    curve
}

fn diversity(paths: &[&Vec<TrajectoryPoint>]) -> f64 {
    if paths.len() < 2 {
        return 0.0;
    }
    let mut distances = Vec::new();
    for (left, right) in paths.iter().tuple_combinations() {
        let aligned = left.len().min(right.len());
        if aligned == 0 {
            continue;
        }
        let total: f64 = (0..aligned)
            .map(|k| left[k].position.distance(right[k].position))
            .sum();
        distances.push(total / aligned as f64);
    }
    stats::mean(&distances)
}
