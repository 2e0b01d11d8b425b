use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::StudioResult,
    policy::Policy,
    rollout::{Rollout, StepRecord},
    sim::{CompiledEnv, EpisodeState, TerminationReason},
    spec::condition::DEFAULT_TOLERANCE,
};

/// Per-rollout knobs. `max_steps` bounds the episode, `deadline` bounds
/// wall-clock time, and the token is checked at every step boundary.
#[derive(Debug, Clone)]
pub struct RolloutOptions {
    pub max_steps: u32,
    pub deadline: Option<Duration>,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            max_steps: 100,
            deadline: None,
        }
    }
}

impl RolloutOptions {
    pub fn with_max_steps(self, max_steps: u32) -> Self {
        Self { max_steps, ..self }
    }

    pub fn with_deadline(self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..self
        }
    }
}

/// Drives one episode to completion: select, step, record, stream.
///
/// The spec must already be compiled (validated + sanitized). Streaming is
/// best-effort: a failing callback is logged and dropped, never fails the
/// rollout. On cancellation the partial trajectory is returned with
/// `terminationReason = cancelled`.
pub fn run_rollout(
    env: &CompiledEnv,
    policy: &mut dyn Policy,
    opts: &RolloutOptions,
    cancel: &CancellationToken,
    mut on_step: Option<&mut (dyn FnMut(&StepRecord) -> StudioResult<()> + Send)>,
) -> Rollout {
    let started = Instant::now();
    let mut state = env.init();
    let mut steps: Vec<StepRecord> = Vec::new();
    let mut cancelled = false;

    while !state.done && state.step < opts.max_steps {
        if cancel.is_cancelled()
            || opts.deadline.is_some_and(|d| started.elapsed() >= d)
        {
            cancelled = true;
            break;
        }

        let action = match policy.select(&state, env) {
            Ok(action) => action,
            Err(e) => {
                let mut failed = Rollout::failed(e.to_string());
                failed.steps = steps;
                failed.total_reward = state.total_reward;
                failed.episode_length = state.step;
                return failed;
            }
        };

        let prev_reward = state.total_reward;
        state = env.step(&state, &action, opts.max_steps);

        let record = StepRecord {
            state: state.clone(),
            action,
            reward: state.total_reward - prev_reward,
            done: state.done,
        };
        if let Some(callback) = on_step.as_deref_mut()
            && let Err(e) = callback(&record)
        {
            debug!(error = %e, "step stream callback failed; continuing");
        }
        steps.push(record);
    }

    let success = derive_success_for(&state, env);
    let termination_reason = if cancelled {
        Some(TerminationReason::Cancelled)
    } else {
        state.info.termination_reason.clone()
    };

    Rollout {
        total_reward: state.total_reward,
        episode_length: state.step,
        success,
        termination_reason,
        error: None,
        steps,
    }
}

/// An episode counts as a success when some agent finished within 0.5 of a
/// goal object, or the event log mentions a goal.
pub(crate) fn derive_success_for(state: &EpisodeState, env: &CompiledEnv) -> bool {
    let at_goal = state.agents.iter().any(|agent| {
        env.object_positions(env.goals())
            .any(|goal| agent.position.distance(goal) < DEFAULT_TOLERANCE)
    });
    at_goal
        || state
            .info
            .events
            .iter()
            .any(|e| e.to_lowercase().contains("goal"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        policy::GreedyPolicy,
        sim::Vec2,
        spec::{
            ActionSpace, AgentSpec, Condition, EnvSpec, ObjectKind, ObjectSpec, RewardRule,
            RuleId, RuleSet, TerminationRule, WorldSpec,
        },
    };

    fn goal_env() -> CompiledEnv {
        let spec = EnvSpec {
            name: None,
            world: WorldSpec::grid(3.0, 3.0),
            agents: vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))],
            objects: vec![ObjectSpec::new(
                "g",
                ObjectKind::Goal,
                Vec2::new(2.0, 2.0),
            )],
            action_space: ActionSpace::compass(),
            rules: RuleSet {
                rewards: vec![RewardRule {
                    id: RuleId::from("r-goal"),
                    condition: Condition::ReachGoal,
                    reward: 10.0,
                }],
                terminations: vec![TerminationRule {
                    id: RuleId::from("t"),
                    condition: Condition::Timeout { steps: Some(50) },
                }],
                events: Vec::new(),
            },
        };
        CompiledEnv::compile(&spec).unwrap()
    }

    #[test]
    fn greedy_reaches_the_corner_goal() {
        let env = goal_env();
        let mut policy = GreedyPolicy::seeded(0);
        let rollout = run_rollout(
            &env,
            &mut policy,
            &RolloutOptions::default().with_max_steps(50),
            &CancellationToken::new(),
            None,
        );
        assert!(rollout.success);
        assert!(rollout.episode_length <= 5);
        assert_eq!(rollout.total_reward, 10.0);
        assert_eq!(
            rollout.termination_reason,
            Some(TerminationReason::GoalReached)
        );
    }

    #[test]
    fn episode_length_never_exceeds_max_steps() {
        let env = goal_env();
        let mut policy = crate::policy::RandomPolicy::seeded(42);
        let rollout = run_rollout(
            &env,
            &mut policy,
            &RolloutOptions::default().with_max_steps(7),
            &CancellationToken::new(),
            None,
        );
        assert!(rollout.episode_length <= 7);
        assert_eq!(rollout.steps.len() as u32, rollout.episode_length);
    }

    #[test]
    fn pre_tripped_token_returns_a_cancelled_rollout() {
        let env = goal_env();
        let token = CancellationToken::new();
        token.cancel();
        let mut policy = GreedyPolicy::seeded(0);
        let rollout = run_rollout(
            &env,
            &mut policy,
            &RolloutOptions::default().with_max_steps(1_000_000),
            &token,
            None,
        );
        assert!(rollout.is_cancelled());
        assert_eq!(rollout.episode_length, 0);
    }

    #[test]
    fn failing_stream_callback_does_not_fail_the_rollout() {
        let env = goal_env();
        let mut policy = GreedyPolicy::seeded(0);
        let mut calls = 0usize;
        let mut callback = |_record: &StepRecord| -> StudioResult<()> {
            calls += 1;
            Err(crate::error::SystemError::Generic("sink closed".to_string()).into())
        };
        let rollout = run_rollout(
            &env,
            &mut policy,
            &RolloutOptions::default().with_max_steps(50),
            &CancellationToken::new(),
            Some(&mut callback),
        );
        assert!(rollout.success);
        assert_eq!(calls as u32, rollout.episode_length);
    }

    #[test]
    fn matched_seeds_give_identical_step_sequences() {
        let env = goal_env();
        let run = |seed| {
            let mut policy = crate::policy::RandomPolicy::seeded(seed);
            run_rollout(
                &env,
                &mut policy,
                &RolloutOptions::default().with_max_steps(30),
                &CancellationToken::new(),
                None,
            )
        };
        let a = run(9);
        let b = run(9);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }
}
