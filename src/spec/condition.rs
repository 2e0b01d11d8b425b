use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    sim::Vec2,
    spec::domain::{AgentId, ObjectId},
};

/// Tolerance applied when a condition does not carry its own.
pub const DEFAULT_TOLERANCE: f64 = 0.5;

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

/// Tagged predicate shared by reward and termination rules.
///
/// Evaluation lives in [`crate::sim::conditions`]; adding a variant here
/// requires a new visitor arm there, enforced by exhaustive matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Condition {
    /// Agent within `tolerance` of a fixed position.
    AgentAtPosition {
        agent_id: AgentId,
        position: Vec2,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },

    /// Agent within 0.5 of a specific object.
    AgentAtObject {
        agent_id: AgentId,
        object_id: ObjectId,
    },

    /// Agent within 1.0 of any wall or obstacle.
    Collision { agent_id: AgentId },

    /// Fires every step.
    Step,

    /// Handled by the rollout driver, not the kernel; `steps` is advisory.
    Timeout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        steps: Option<u32>,
    },

    /// Sugar: first agent within 0.5 of any goal object.
    ReachGoal,

    /// Sugar: first agent within 0.5 of any trap object.
    HitTrap,

    /// Sugar: first agent within 0.5 of any key object.
    CollectKey,

    /// User-defined event raised for an agent.
    Event { name: String, agent_id: AgentId },
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Self::AgentAtPosition { .. } => ConditionKind::AgentAtPosition,
            Self::AgentAtObject { .. } => ConditionKind::AgentAtObject,
            Self::Collision { .. } => ConditionKind::Collision,
            Self::Step => ConditionKind::Step,
            Self::Timeout { .. } => ConditionKind::Timeout,
            Self::ReachGoal => ConditionKind::ReachGoal,
            Self::HitTrap => ConditionKind::HitTrap,
            Self::CollectKey => ConditionKind::CollectKey,
            Self::Event { .. } => ConditionKind::Event,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Discriminant of a [`Condition`], used as the `reason` string of reward
/// records and termination reports.
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
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConditionKind {
    AgentAtPosition,
    AgentAtObject,
    Collision,
    Step,
    Timeout,
    ReachGoal,
    HitTrap,
    CollectKey,
    Event,
}
