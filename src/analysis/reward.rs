use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    analysis::{EMPTY_INPUT_WARNING, stats},
    rollout::{Rollout, StepRecord},
    spec::EnvSpec,
};

/// Reward density above which shaping counts as suspiciously dense.
const DENSE_SHAPING_THRESHOLD: f64 = 10.0;
/// Fire rate below which a rule is flagged as nearly dead.
const RARE_FIRE_RATE: f64 = 0.01;
/// Conflicting-rules warning threshold on each sign's rule count.
const CONFLICT_RULE_COUNT: usize = 5;

// ================================================================================================
// Report types
// ================================================================================================

/// Per-rule contribution statistics over one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    pub total: f64,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub fire_count: usize,
    pub fire_rate: f64,
}

impl RuleStats {
    fn zeroed() -> Self {
        Self {
            total: 0.0,
            mean: 0.0,
            std: 0.0,
            min: 0.0,
            max: 0.0,
            fire_count: 0,
            fire_rate: 0.0,
        }
    }
}

/// One cell of the rule-activity heatmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub step: usize,
    pub rule: String,
    pub value: f64,
}

/// Reward crediting for one episode: who paid what, when, and the shaping
/// warnings that fall out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardAnalysis {
    pub per_rule_stats: BTreeMap<String, RuleStats>,
    /// Top rules by fire count, at most ten.
    pub most_active_rules: Vec<(String, usize)>,
    pub cumulative_contributions: BTreeMap<String, Vec<f64>>,
    pub heatmap_data: Vec<HeatmapCell>,
    pub episode_total: f64,
    pub episode_length: usize,
    pub reward_density: f64,
    pub warnings: Vec<String>,
}

impl RewardAnalysis {
    fn empty() -> Self {
        Self {
            per_rule_stats: BTreeMap::new(),
            most_active_rules: Vec::new(),
            cumulative_contributions: BTreeMap::new(),
            heatmap_data: Vec::new(),
            episode_total: 0.0,
            episode_length: 0,
            reward_density: 0.0,
            warnings: vec![EMPTY_INPUT_WARNING.to_string()],
        }
    }
}

/// Fire-rate stability of one rule across episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConsistency {
    pub mean_fire_rate: f64,
    pub std_fire_rate: f64,
    pub consistency: ConsistencyLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsistencyLevel {
    High,
    Medium,
    Low,
}

impl ConsistencyLevel {
    fn from_std(std: f64) -> Self {
        if std < 0.1 {
            Self::High
        } else if std < 0.3 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Cross-episode aggregation of reward crediting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRewardAnalysis {
    pub num_episodes: usize,
    pub mean_episode_reward: f64,
    pub std_episode_reward: f64,
    pub rule_consistency: BTreeMap<String, RuleConsistency>,
    pub top_termination_causes: Vec<(String, usize)>,
    pub warnings: Vec<String>,
}

// ================================================================================================
// Single-episode crediting
// ================================================================================================

/// Groups per-step reward records by rule and derives the crediting report.
/// When the spec is supplied, rules that never fired still appear with
/// zeroed stats, which is what the "unreachable?" warning keys on.
pub fn analyze_rollout(steps: &[StepRecord], spec: Option<&EnvSpec>) -> RewardAnalysis {
    if steps.is_empty() {
        return RewardAnalysis::empty();
    }

    let mut contributions: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    if let Some(spec) = spec {
        for rule in &spec.rules.rewards {
            contributions.entry(rule.id.to_string()).or_default();
        }
    }

    let mut step_values: Vec<BTreeMap<String, f64>> = Vec::with_capacity(steps.len());
    for step in steps {
        let mut current = BTreeMap::new();
        for record in &step.state.info.rewards {
            let rule = record.rule_id.to_string();
            contributions.entry(rule.clone()).or_default().push(record.value);
            current.insert(rule, record.value);
        }
        step_values.push(current);
    }

    let num_steps = steps.len();
    let mut per_rule_stats = BTreeMap::new();
    let mut cumulative = BTreeMap::new();
    for (rule, values) in &contributions {
        if values.is_empty() {
            per_rule_stats.insert(rule.clone(), RuleStats::zeroed());
            continue;
        }
        per_rule_stats.insert(
            rule.clone(),
            RuleStats {
                total: values.iter().sum(),
                mean: stats::mean(values),
                std: stats::std(values),
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                fire_count: values.len(),
                fire_rate: values.len() as f64 / num_steps as f64,
            },
        );
        let mut running = 0.0;
        cumulative.insert(
            rule.clone(),
            values
                .iter()
                .map(|v| {
                    running += v;
                    running
                })
                .collect(),
        );
    }

    let mut most_active: Vec<(String, usize)> = per_rule_stats
        .iter()
        .map(|(rule, s)| (rule.clone(), s.fire_count))
        .collect();
    most_active.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    most_active.truncate(10);

    let rules: Vec<&String> = contributions.keys().collect();
    let mut heatmap = Vec::with_capacity(num_steps * rules.len());
    for (step_idx, values) in step_values.iter().enumerate() {
        for rule in &rules {
            heatmap.push(HeatmapCell {
                step: step_idx,
                rule: (*rule).clone(),
                value: values.get(*rule).copied().unwrap_or(0.0),
            });
        }
    }

    let step_rewards: Vec<f64> = steps.iter().map(|s| s.reward).collect();
    let mut analysis = RewardAnalysis {
        per_rule_stats,
        most_active_rules: most_active,
        cumulative_contributions: cumulative,
        heatmap_data: heatmap,
        episode_total: step_rewards.iter().sum(),
        episode_length: num_steps,
        reward_density: stats::mean(&step_rewards),
        warnings: Vec::new(),
    };
    analysis.warnings = detect_issues(&analysis);
    analysis
}

fn detect_issues(analysis: &RewardAnalysis) -> Vec<String> {
    let mut warnings = Vec::new();

    for (rule, stats) in &analysis.per_rule_stats {
        if stats.fire_count == 0 {
            warnings.push(format!("Rule {rule} never fired (unreachable?)"));
        } else if stats.fire_rate < RARE_FIRE_RATE {
            warnings.push(format!(
                "Rule {rule} fires very rarely ({:.1}%)",
                stats.fire_rate * 100.0
            ));
        }
    }

    if analysis.reward_density > DENSE_SHAPING_THRESHOLD {
        warnings.push("Very dense reward shaping (may cause reward hacking)".to_string());
    }

    let positive = analysis
        .per_rule_stats
        .values()
        .filter(|s| s.mean > 0.0)
        .count();
    let negative = analysis
        .per_rule_stats
        .values()
        .filter(|s| s.mean < 0.0)
        .count();
    if positive > CONFLICT_RULE_COUNT && negative > CONFLICT_RULE_COUNT {
        warnings.push("Many conflicting reward rules (may confuse agent)".to_string());
    }

    warnings
}

// ================================================================================================
// Cross-episode aggregation
// ================================================================================================

pub fn analyze_rollouts(rollouts: &[Rollout], spec: Option<&EnvSpec>) -> BatchRewardAnalysis {
    if rollouts.is_empty() {
        return BatchRewardAnalysis {
            num_episodes: 0,
            mean_episode_reward: 0.0,
            std_episode_reward: 0.0,
            rule_consistency: BTreeMap::new(),
            top_termination_causes: Vec::new(),
            warnings: vec![EMPTY_INPUT_WARNING.to_string()],
        };
    }

    let mut episode_totals = Vec::with_capacity(rollouts.len());
    let mut fire_rates: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for rollout in rollouts {
        let analysis = analyze_rollout(&rollout.steps, spec);
        episode_totals.push(analysis.episode_total);
        for (rule, stats) in analysis.per_rule_stats {
            fire_rates.entry(rule).or_default().push(stats.fire_rate);
        }
    }

    let rule_consistency = fire_rates
        .into_iter()
        .map(|(rule, rates)| {
            let std = stats::std(&rates);
            (
                rule,
                RuleConsistency {
                    mean_fire_rate: stats::mean(&rates),
                    std_fire_rate: std,
                    consistency: ConsistencyLevel::from_std(std),
                },
            )
        })
        .collect();

    let mut causes: BTreeMap<String, usize> = BTreeMap::new();
    for rollout in rollouts {
        let reason = rollout
            .termination_reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        *causes.entry(reason).or_default() += 1;
    }
    let mut top_causes: Vec<(String, usize)> = causes.into_iter().collect();
    top_causes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    BatchRewardAnalysis {
        num_episodes: rollouts.len(),
        mean_episode_reward: stats::mean(&episode_totals),
        std_episode_reward: stats::std(&episode_totals),
        rule_consistency,
        top_termination_causes: top_causes,
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sim::{EpisodeState, RewardRecord, TerminationReason},
        spec::{
            ActionSpace, AgentSpec, Condition, ConditionKind, ObjectKind, ObjectSpec, RewardRule,
            RuleId, RuleSet, TerminationRule, WorldSpec,
        },
    };

    fn step_with_rewards(rewards: Vec<(&str, f64)>) -> StepRecord {
        let spec = EnvSpec {
            name: None,
            world: WorldSpec::grid(3.0, 3.0),
            agents: vec![AgentSpec::new("a", crate::sim::Vec2::ZERO)],
            objects: Vec::new(),
            action_space: ActionSpace::compass(),
            rules: RuleSet::default(),
        };
        let mut state = EpisodeState::initial(&spec);
        let total: f64 = rewards.iter().map(|(_, v)| v).sum();
        state.info.rewards = rewards
            .into_iter()
            .map(|(rule, value)| RewardRecord {
                rule_id: RuleId::from(rule),
                value,
                reason: ConditionKind::Step,
            })
            .collect();
        StepRecord {
            state,
            action: crate::spec::Action::discrete("up"),
            reward: total,
            done: false,
        }
    }

    #[test]
    fn empty_input_yields_the_standard_warning() {
        let analysis = analyze_rollout(&[], None);
        assert_eq!(analysis.warnings, vec![EMPTY_INPUT_WARNING.to_string()]);
        assert_eq!(analysis.episode_length, 0);
    }

    #[test]
    fn per_rule_stats_group_by_rule() {
        let steps = vec![
            step_with_rewards(vec![("step", -0.1), ("goal", 10.0)]),
            step_with_rewards(vec![("step", -0.1)]),
        ];
        let analysis = analyze_rollout(&steps, None);
        let step_stats = &analysis.per_rule_stats["step"];
        assert_eq!(step_stats.fire_count, 2);
        assert_eq!(step_stats.fire_rate, 1.0);
        assert!((step_stats.total + 0.2).abs() < 1e-12);
        let goal_stats = &analysis.per_rule_stats["goal"];
        assert_eq!(goal_stats.fire_count, 1);
        assert_eq!(goal_stats.fire_rate, 0.5);
    }

    #[test]
    fn cumulative_curves_accumulate_in_order() {
        let steps = vec![
            step_with_rewards(vec![("step", 1.0)]),
            step_with_rewards(vec![("step", 2.0)]),
            step_with_rewards(vec![("step", 3.0)]),
        ];
        let analysis = analyze_rollout(&steps, None);
        assert_eq!(
            analysis.cumulative_contributions["step"],
            vec![1.0, 3.0, 6.0]
        );
    }

    #[test]
    fn heatmap_covers_every_step_rule_pair() {
        let steps = vec![
            step_with_rewards(vec![("a", 1.0)]),
            step_with_rewards(vec![("b", 2.0)]),
        ];
        let analysis = analyze_rollout(&steps, None);
        assert_eq!(analysis.heatmap_data.len(), 4);
        let missing = analysis
            .heatmap_data
            .iter()
            .find(|c| c.step == 0 && c.rule == "b")
            .unwrap();
        assert_eq!(missing.value, 0.0);
    }

    #[test]
    fn unfired_spec_rules_are_flagged_unreachable() {
        let spec = EnvSpec {
            name: None,
            world: WorldSpec::grid(3.0, 3.0),
            agents: vec![AgentSpec::new("a", crate::sim::Vec2::ZERO)],
            objects: vec![ObjectSpec::new(
                "g",
                ObjectKind::Goal,
                crate::sim::Vec2::new(2.0, 2.0),
            )],
            action_space: ActionSpace::compass(),
            rules: RuleSet {
                rewards: vec![
                    RewardRule {
                        id: RuleId::from("step"),
                        condition: Condition::Step,
                        reward: 1.0,
                    },
                    RewardRule {
                        id: RuleId::from("never"),
                        condition: Condition::ReachGoal,
                        reward: 5.0,
                    },
                ],
                terminations: vec![TerminationRule {
                    id: RuleId::from("t"),
                    condition: Condition::Timeout { steps: None },
                }],
                events: Vec::new(),
            },
        };
        let steps = vec![step_with_rewards(vec![("step", 1.0)])];
        let analysis = analyze_rollout(&steps, Some(&spec));
        assert_eq!(analysis.per_rule_stats["never"].fire_count, 0);
        assert!(analysis
            .warnings
            .iter()
            .any(|w| w.contains("never fired (unreachable?)")));
    }

    #[test]
    fn dense_shaping_is_warned() {
        let steps = vec![step_with_rewards(vec![("big", 100.0)])];
        let analysis = analyze_rollout(&steps, None);
        assert!(analysis.warnings.iter().any(|w| w.contains("dense")));
    }

    #[test]
    fn batch_aggregation_ranks_termination_causes() {
        let mk = |reason: TerminationReason, total: f64| Rollout {
            steps: vec![step_with_rewards(vec![("step", total)])],
            total_reward: total,
            episode_length: 1,
            success: false,
            termination_reason: Some(reason),
            error: None,
        };
        let rollouts = vec![
            mk(TerminationReason::MaxSteps, 1.0),
            mk(TerminationReason::MaxSteps, 2.0),
            mk(TerminationReason::GoalReached, 3.0),
        ];
        let batch = analyze_rollouts(&rollouts, None);
        assert_eq!(batch.num_episodes, 3);
        assert_eq!(batch.mean_episode_reward, 2.0);
        assert_eq!(batch.top_termination_causes[0], ("max_steps".to_string(), 2));
        assert_eq!(
            batch.rule_consistency["step"].consistency,
            ConsistencyLevel::High
        );
    }

    #[test]
    fn empty_batch_warns() {
        let batch = analyze_rollouts(&[], None);
        assert_eq!(batch.warnings, vec![EMPTY_INPUT_WARNING.to_string()]);
    }
}
