use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    sim::Vec2,
    spec::{AgentId, AgentSpec, ConditionKind, EnvSpec, ObjectId, ObjectKind, ObjectSpec, RuleId},
};

// ================================================================================================
// Runtime state
// ================================================================================================

/// Runtime copy of one agent. Index-addressed inside [`EpisodeState`];
/// the id is kept for wire output and rule lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub id: AgentId,
    pub position: Vec2,
    #[serde(default)]
    pub rotation: f64,
}

impl From<&AgentSpec> for AgentState {
    fn from(spec: &AgentSpec) -> Self {
        Self {
            id: spec.id.clone(),
            position: spec.position,
            rotation: spec.rotation.unwrap_or(0.0),
        }
    }
}

/// Runtime copy of one world object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectState {
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub position: Vec2,
    #[serde(default)]
    pub rotation: f64,
}

impl From<&ObjectSpec> for ObjectState {
    fn from(spec: &ObjectSpec) -> Self {
        Self {
            id: spec.id.clone(),
            kind: spec.kind,
            position: spec.position,
            rotation: spec.rotation.unwrap_or(0.0),
        }
    }
}

/// One reward rule firing on one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRecord {
    pub rule_id: RuleId,
    pub value: f64,
    pub reason: ConditionKind,
}

/// Per-step bookkeeping attached to the state: the cumulative event log,
/// the rewards paid on the most recent step, and the first termination
/// reason once the episode ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepInfo {
    pub events: Vec<String>,
    pub rewards: SmallVec<[RewardRecord; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
}

/// Mutable per-rollout state. Created by `CompiledEnv::init`, advanced only
/// by `CompiledEnv::step`, owned by exactly one rollout driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeState {
    pub agents: Vec<AgentState>,
    pub objects: Vec<ObjectState>,
    pub step: u32,
    pub total_reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

impl EpisodeState {
    /// Fresh state positioned from the spec, step 0, with the opening event.
    pub fn initial(spec: &EnvSpec) -> Self {
        Self {
            agents: spec.agents.iter().map(AgentState::from).collect(),
            objects: spec.objects.iter().map(ObjectState::from).collect(),
            step: 0,
            total_reward: 0.0,
            done: false,
            info: StepInfo {
                events: vec!["Episode started".to_string()],
                rewards: SmallVec::new(),
                termination_reason: None,
            },
        }
    }

    pub fn agent_by_id(&self, id: &AgentId) -> Option<&AgentState> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn object_by_id(&self, id: &ObjectId) -> Option<&ObjectState> {
        self.objects.iter().find(|o| &o.id == id)
    }

    /// Reward paid on the most recent step.
    pub fn step_reward(&self) -> f64 {
        self.info.rewards.iter().map(|r| r.value).sum()
    }
}

// ================================================================================================
// Termination reasons
// ================================================================================================

/// Why an episode ended. Serializes as the studio's reason strings
/// (`goal_reached`, `max_steps`, `cancelled`, a condition name, or a
/// free-form failure message).
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    GoalReached,
    MaxSteps,
    Cancelled,
    Rule(ConditionKind),
    Failed(String),
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GoalReached => f.write_str("goal_reached"),
            Self::MaxSteps => f.write_str("max_steps"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Rule(kind) => write!(f, "{kind}"),
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::str::FromStr for TerminationReason {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "goal_reached" => Self::GoalReached,
            "max_steps" => Self::MaxSteps,
            "cancelled" => Self::Cancelled,
            other => other
                .parse::<ConditionKind>()
                .map(Self::Rule)
                .unwrap_or_else(|_| Self::Failed(other.to_string())),
        })
    }
}

impl Serialize for TerminationReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TerminationReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or(Self::Failed(s)))
    }
}
