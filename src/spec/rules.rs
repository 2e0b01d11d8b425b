use serde::{Deserialize, Serialize};

use crate::spec::{condition::Condition, domain::RuleId};

/// Ordered rule lists of a spec. Rewards and terminations are evaluated in
/// declaration order; events are extensible hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default)]
    pub rewards: Vec<RewardRule>,
    #[serde(default)]
    pub terminations: Vec<TerminationRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventRule>,
}

impl RuleSet {
    /// All rule ids across the three lists, in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &RuleId> {
        self.rewards
            .iter()
            .map(|r| &r.id)
            .chain(self.terminations.iter().map(|r| &r.id))
            .chain(self.events.iter().map(|r| &r.id))
    }
}

/// Pays `reward` on every step where `condition` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRule {
    pub id: RuleId,
    pub condition: Condition,
    pub reward: f64,
}

/// Ends the episode on the first step where `condition` holds. Timeout
/// conditions are excluded here and enforced by the rollout driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationRule {
    pub id: RuleId,
    pub condition: Condition,
}

/// Raises a named event on every step where `condition` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRule {
    pub id: RuleId,
    pub name: String,
    pub condition: Condition,
}
