use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    error::StudioResult,
    policy::{Policy, PolicyKind},
    sim::{CompiledEnv, EpisodeState},
    spec::{Action, ActionSpace},
};

/// Uniform policy: a random name from the discrete vocabulary, or a uniform
/// vector in `[-1, 1]^2` for continuous spaces. Multi-agent states get an
/// independent draw per agent, in arena order.
#[derive(Debug)]
pub struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn draw(&mut self, space: &ActionSpace) -> Action {
        match space {
            ActionSpace::Discrete { actions } => {
                let i = self.rng.random_range(0..actions.len());
                Action::Discrete(actions[i].clone())
            }
            ActionSpace::Continuous { .. } => Action::continuous(
                self.rng.random_range(-1.0..=1.0),
                self.rng.random_range(-1.0..=1.0),
            ),
        }
    }
}

impl Policy for RandomPolicy {
    fn select(&mut self, state: &EpisodeState, env: &CompiledEnv) -> StudioResult<Action> {
        let space = &env.spec().action_space;
        if state.agents.len() > 1 {
            let entries: Vec<_> = state
                .agents
                .iter()
                .map(|agent| (agent.id.clone(), self.draw(space)))
                .collect();
            return Ok(Action::multi(entries));
        }
        Ok(self.draw(space))
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Random
    }
}
