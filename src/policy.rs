pub mod greedy;
pub mod model;
pub mod random;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    error::StudioResult,
    sim::{CompiledEnv, EpisodeState},
    spec::Action,
};

pub use greedy::GreedyPolicy;
pub use model::{AlgorithmKind, ModelArtifact, ModelLoader, TrainedModelPolicy};
pub use random::RandomPolicy;

/// Which policy family a request asked for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Random,
    Greedy,
    TrainedModel,
}

/// Maps a state to an action, one agent at a time or as a multi-agent map.
///
/// Policies are deterministic given a seed: randomness comes only from the
/// RNG handle injected at construction. Seed management is the caller's
/// concern.
pub trait Policy: Send {
    /// Decide on an action for the current state.
    fn select(&mut self, state: &EpisodeState, env: &CompiledEnv) -> StudioResult<Action>;

    /// Policy family, for logging and cache keys.
    fn kind(&self) -> PolicyKind;

    /// Reset internal state at the end of an episode. Default is no-op.
    fn reset(&mut self) {}
}

impl Policy for Box<dyn Policy> {
    fn select(&mut self, state: &EpisodeState, env: &CompiledEnv) -> StudioResult<Action> {
        (**self).select(state, env)
    }

    fn kind(&self) -> PolicyKind {
        (**self).kind()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_kind_uses_wire_names() {
        assert_eq!(PolicyKind::TrainedModel.to_string(), "trained_model");
        let parsed: PolicyKind = "greedy".parse().unwrap();
        assert_eq!(parsed, PolicyKind::Greedy);
        assert_eq!(
            serde_json::to_string(&PolicyKind::TrainedModel).unwrap(),
            "\"trained_model\""
        );
    }
}
