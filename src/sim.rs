pub mod compiled;
pub mod conditions;
pub mod kernel;
pub mod state;
pub mod vec2;

pub use compiled::CompiledEnv;
pub use kernel::{AGENT_RADIUS, MAX_SPEED};
pub use state::{AgentState, EpisodeState, ObjectState, RewardRecord, StepInfo, TerminationReason};
pub use vec2::Vec2;
