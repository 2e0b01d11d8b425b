pub mod action;
pub mod condition;
pub mod domain;
pub mod rules;
pub mod validate;
pub mod world;

pub use action::{Action, ActionSpace, Direction};
pub use condition::{Condition, ConditionKind};
pub use domain::{AgentId, AgentSpec, EnvSpec, ObjectId, ObjectKind, ObjectSpec, RuleId, SpecHash};
pub use rules::{EventRule, RewardRule, RuleSet, TerminationRule};
pub use world::{CoordinateSystem, WorldKind, WorldSpec};
