use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    time::{Duration, Instant},
};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    error::{RolloutError, StudioResult},
    policy::Policy,
    rollout::{Rollout, driver::{RolloutOptions, run_rollout}},
    sim::CompiledEnv,
};

/// Batch request: how many rollouts, over how many workers, from which base
/// seed. Worker `i` gets seed `base_seed + i`, so a batch is reproducible
/// end to end.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub rollouts: usize,
    pub workers: Option<usize>,
    pub base_seed: u64,
    pub max_steps: u32,
    pub deadline: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            rollouts: 10,
            workers: None,
            base_seed: 0,
            max_steps: 100,
            deadline: None,
        }
    }
}

impl BatchOptions {
    pub fn with_rollouts(self, rollouts: usize) -> Self {
        Self { rollouts, ..self }
    }

    pub fn with_workers(self, workers: usize) -> Self {
        Self {
            workers: Some(workers),
            ..self
        }
    }

    pub fn with_base_seed(self, base_seed: u64) -> Self {
        Self { base_seed, ..self }
    }

    pub fn with_max_steps(self, max_steps: u32) -> Self {
        Self { max_steps, ..self }
    }

    pub fn with_deadline(self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..self
        }
    }

    fn effective_workers(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers.unwrap_or(cpus).min(self.rollouts).max(1)
    }

    fn rollout_options(&self) -> RolloutOptions {
        RolloutOptions {
            max_steps: self.max_steps,
            deadline: self.deadline,
        }
    }
}

/// Runs `opts.rollouts` independent episodes over a bounded worker pool.
///
/// Workers share only the read-only compiled environment; each builds its
/// own policy from `policy_factory(seed)`. Results arrive in completion
/// order, not submission order. A panicking or erroring worker contributes a
/// failed-rollout record instead of aborting the batch.
pub fn run_parallel<F>(
    env: &CompiledEnv,
    policy_factory: F,
    opts: &BatchOptions,
    cancel: &CancellationToken,
) -> StudioResult<Vec<Rollout>>
where
    F: Fn(u64) -> StudioResult<Box<dyn Policy>> + Sync,
{
    if opts.rollouts == 0 {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.effective_workers())
        .build()
        .map_err(|e| RolloutError::InvalidRequest(format!("worker pool: {e}")))?;

    let rollout_opts = opts.rollout_options();
    let (tx, rx) = crossbeam::channel::unbounded::<Rollout>();

    pool.scope(|scope| {
        for i in 0..opts.rollouts {
            let tx = tx.clone();
            let factory = &policy_factory;
            let rollout_opts = &rollout_opts;
            scope.spawn(move |_| {
                let seed = opts.base_seed + i as u64;
                let result = catch_unwind(AssertUnwindSafe(|| match factory(seed) {
                    Ok(mut policy) => {
                        run_rollout(env, policy.as_mut(), rollout_opts, cancel, None)
                    }
                    Err(e) => Rollout::failed(e.to_string()),
                }));
                let rollout = result.unwrap_or_else(|panic| {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "rollout worker panicked".to_string());
                    warn!(%msg, "rollout worker panicked");
                    Rollout::failed(msg)
                });
                // Receiver outlives the scope; a send can only fail if the
                // caller dropped the batch entirely.
                let _ = tx.send(rollout);
            });
        }
    });
    drop(tx);

    Ok(rx.into_iter().collect())
}

// ================================================================================================
// Batch aggregation
// ================================================================================================

/// Aggregate statistics over one batch of rollouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub mean_reward: f64,
    pub std_reward: f64,
    pub mean_length: f64,
    pub std_length: f64,
    pub success_rate: f64,
    pub num_rollouts: usize,
}

impl BatchSummary {
    pub fn from_rollouts(rollouts: &[Rollout]) -> Self {
        if rollouts.is_empty() {
            return Self {
                mean_reward: 0.0,
                std_reward: 0.0,
                mean_length: 0.0,
                std_length: 0.0,
                success_rate: 0.0,
                num_rollouts: 0,
            };
        }
        let rewards = Array1::from_iter(rollouts.iter().map(|r| r.total_reward));
        let lengths = Array1::from_iter(rollouts.iter().map(|r| f64::from(r.episode_length)));
        let successes = rollouts.iter().filter(|r| r.success).count();
        Self {
            mean_reward: rewards.mean().unwrap_or(0.0),
            std_reward: rewards.std(0.0),
            mean_length: lengths.mean().unwrap_or(0.0),
            std_length: lengths.std(0.0),
            success_rate: successes as f64 / rollouts.len() as f64,
            num_rollouts: rollouts.len(),
        }
    }
}

/// Throughput report over a benchmark batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReport {
    pub total_rollouts: usize,
    pub total_steps: u64,
    pub elapsed_seconds: f64,
    pub steps_per_second: f64,
    pub rollouts_per_second: f64,
    pub avg_episode_length: f64,
}

/// Measures rollout throughput over a full parallel batch.
pub fn benchmark<F>(
    env: &CompiledEnv,
    policy_factory: F,
    opts: &BatchOptions,
) -> StudioResult<BenchmarkReport>
where
    F: Fn(u64) -> StudioResult<Box<dyn Policy>> + Sync,
{
    let started = Instant::now();
    let rollouts = run_parallel(env, policy_factory, opts, &CancellationToken::new())?;
    let elapsed = started.elapsed().as_secs_f64();

    let total_steps: u64 = rollouts.iter().map(|r| u64::from(r.episode_length)).sum();
    let per_second = |count: f64| if elapsed > 0.0 { count / elapsed } else { 0.0 };

    Ok(BenchmarkReport {
        total_rollouts: rollouts.len(),
        total_steps,
        elapsed_seconds: elapsed,
        steps_per_second: per_second(total_steps as f64),
        rollouts_per_second: per_second(rollouts.len() as f64),
        avg_episode_length: if rollouts.is_empty() {
            0.0
        } else {
            total_steps as f64 / rollouts.len() as f64
        },
    })
}
