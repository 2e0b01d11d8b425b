use tokio_util::sync::CancellationToken;

use crate::{
    error::StudioResult,
    policy::Policy,
    rollout::{
        Rollout, StepRecord,
        driver::RolloutOptions,
        parallel::BatchSummary,
    },
    sim::{CompiledEnv, EpisodeState, TerminationReason},
    spec::Action,
};

/// Result of a vectorized batch: the individual rollouts plus the aggregate
/// statistics computed over the whole batch.
#[derive(Debug, Clone)]
pub struct VectorizedBatch {
    pub rollouts: Vec<Rollout>,
    pub summary: BatchSummary,
}

/// Advances `batch` episodes in lockstep on one thread.
///
/// Per tick, actions are collected for every live environment first, then
/// all environments advance together. Each slot owns an isolated policy
/// seeded `base_seed + i`, so the batch is step-for-step identical to
/// running `batch` sequential rollouts with matched seeds — the equivalence
/// the compliance test pins down. The shared tick loop amortizes action
/// selection and lets the batch statistics come out of one pass.
pub fn run_vectorized<F>(
    env: &CompiledEnv,
    policy_factory: F,
    opts: &RolloutOptions,
    batch: usize,
    base_seed: u64,
    cancel: &CancellationToken,
) -> StudioResult<VectorizedBatch>
where
    F: Fn(u64) -> StudioResult<Box<dyn Policy>>,
{
    let mut slots: Vec<Slot> = (0..batch)
        .map(|i| {
            let seed = base_seed + i as u64;
            match policy_factory(seed) {
                Ok(policy) => Slot::live(env.init(), policy),
                Err(e) => Slot::failed(Rollout::failed(e.to_string())),
            }
        })
        .collect();

    // Lockstep tick loop: gather all actions, then apply all steps.
    loop {
        let mut any_live = false;
        let mut actions: Vec<Option<Action>> = Vec::with_capacity(slots.len());
        let cancelled = cancel.is_cancelled();

        for slot in &mut slots {
            // Natural termination outranks cancellation, exactly as the
            // sequential driver's loop condition does.
            let fate = match &*slot {
                Slot::Done(_) => Fate::Skip,
                Slot::Live { state, .. } if state.done || state.step >= opts.max_steps => {
                    Fate::Finish(None)
                }
                Slot::Live { .. } if cancelled => Fate::Finish(Some(TerminationReason::Cancelled)),
                Slot::Live { .. } => Fate::Select,
            };
            match fate {
                Fate::Skip => actions.push(None),
                Fate::Finish(reason) => {
                    slot.finish(env, reason);
                    actions.push(None);
                }
                Fate::Select => {
                    any_live = true;
                    if let Slot::Live { state, policy, .. } = slot {
                        match policy.select(state, env) {
                            Ok(action) => actions.push(Some(action)),
                            Err(e) => {
                                *slot = Slot::failed(Rollout::failed(e.to_string()));
                                actions.push(None);
                            }
                        }
                    }
                }
            }
        }

        if !any_live {
            break;
        }

        for (slot, action) in slots.iter_mut().zip(actions) {
            let (Slot::Live { state, steps, .. }, Some(action)) = (&mut *slot, action) else {
                continue;
            };
            let prev_reward = state.total_reward;
            *state = env.step(state, &action, opts.max_steps);
            steps.push(StepRecord {
                state: state.clone(),
                action,
                reward: state.total_reward - prev_reward,
                done: state.done,
            });
        }
    }

    let rollouts: Vec<Rollout> = slots.into_iter().map(|slot| slot.into_rollout()).collect();
    let summary = BatchSummary::from_rollouts(&rollouts);
    Ok(VectorizedBatch { rollouts, summary })
}

enum Fate {
    Skip,
    Finish(Option<TerminationReason>),
    Select,
}

enum Slot {
    Live {
        state: EpisodeState,
        policy: Box<dyn Policy>,
        steps: Vec<StepRecord>,
    },
    Done(Rollout),
}

impl Slot {
    fn live(state: EpisodeState, policy: Box<dyn Policy>) -> Self {
        Self::Live {
            state,
            policy,
            steps: Vec::new(),
        }
    }

    fn failed(rollout: Rollout) -> Self {
        Self::Done(rollout)
    }

    fn finish(&mut self, env: &CompiledEnv, forced_reason: Option<TerminationReason>) {
        if let Self::Live { state, steps, .. } = self {
            let success = crate::rollout::driver::derive_success_for(state, env);
            let termination_reason = forced_reason.or_else(|| state.info.termination_reason.clone());
            let rollout = Rollout {
                steps: std::mem::take(steps),
                total_reward: state.total_reward,
                episode_length: state.step,
                success,
                termination_reason,
                error: None,
            };
            *self = Self::Done(rollout);
        }
    }

    fn into_rollout(self) -> Rollout {
        match self {
            Self::Done(rollout) => rollout,
            Self::Live { state, steps, .. } => Rollout {
                total_reward: state.total_reward,
                episode_length: state.step,
                success: false,
                termination_reason: state.info.termination_reason.clone(),
                error: None,
                steps,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        policy::RandomPolicy,
        rollout::driver::run_rollout,
        sim::Vec2,
        spec::{
            ActionSpace, AgentSpec, Condition, EnvSpec, ObjectKind, ObjectSpec, RewardRule,
            RuleId, RuleSet, TerminationRule, WorldSpec,
        },
    };

    fn env() -> CompiledEnv {
        let spec = EnvSpec {
            name: None,
            world: WorldSpec::grid(4.0, 4.0),
            agents: vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))],
            objects: vec![ObjectSpec::new(
                "g",
                ObjectKind::Goal,
                Vec2::new(3.0, 3.0),
            )],
            action_space: ActionSpace::compass(),
            rules: RuleSet {
                rewards: vec![RewardRule {
                    id: RuleId::from("r"),
                    condition: Condition::Step,
                    reward: -0.1,
                }],
                terminations: vec![TerminationRule {
                    id: RuleId::from("t"),
                    condition: Condition::Timeout { steps: None },
                }],
                events: Vec::new(),
            },
        };
        CompiledEnv::compile(&spec).unwrap()
    }

    fn factory(seed: u64) -> StudioResult<Box<dyn Policy>> {
        Ok(Box::new(RandomPolicy::seeded(seed)))
    }

    #[test]
    fn vectorized_matches_sequential_with_matched_seeds() {
        let env = env();
        let opts = RolloutOptions::default().with_max_steps(20);
        let batch = run_vectorized(&env, factory, &opts, 5, 70, &CancellationToken::new())
            .unwrap();

        for (i, vec_rollout) in batch.rollouts.iter().enumerate() {
            let mut policy = RandomPolicy::seeded(70 + i as u64);
            let seq = run_rollout(&env, &mut policy, &opts, &CancellationToken::new(), None);
            assert_eq!(vec_rollout, &seq, "slot {i} diverged");
        }
    }

    #[test]
    fn summary_covers_the_whole_batch() {
        let env = env();
        let opts = RolloutOptions::default().with_max_steps(15);
        let batch = run_vectorized(&env, factory, &opts, 8, 0, &CancellationToken::new())
            .unwrap();
        assert_eq!(batch.rollouts.len(), 8);
        assert_eq!(batch.summary.num_rollouts, 8);
        assert!(batch.summary.mean_length <= 15.0);
    }

    #[test]
    fn cancelled_batches_mark_every_live_slot() {
        let env = env();
        let token = CancellationToken::new();
        token.cancel();
        let opts = RolloutOptions::default().with_max_steps(1_000);
        let batch = run_vectorized(&env, factory, &opts, 3, 0, &token).unwrap();
        assert!(batch.rollouts.iter().all(|r| r.is_cancelled()));
    }
}
