use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    error::{SpecError, StudioResult},
    impl_id_newtype,
    sim::Vec2,
    spec::{action::ActionSpace, rules::RuleSet, world::WorldSpec},
};

// ================================================================================================
// Identifiers
// ================================================================================================

/// Unique agent identifier within a spec.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct AgentId(pub String);
impl_id_newtype!(AgentId);

/// Unique world-object identifier within a spec.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ObjectId(pub String);
impl_id_newtype!(ObjectId);

/// Unique reward/termination/event rule identifier within a spec.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RuleId(pub String);
impl_id_newtype!(RuleId);

// ================================================================================================
// World items
// ================================================================================================

/// Kind of a world object. Walls and obstacles block movement; goals, traps
/// and keys drive the sugar conditions; doors and custom objects are inert
/// until referenced by a rule.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ObjectKind {
    Wall,
    Obstacle,
    Goal,
    Trap,
    Key,
    Door,
    #[default]
    Custom,
}

impl ObjectKind {
    /// Whether this kind participates in collision rejection.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Wall | Self::Obstacle)
    }
}

/// One agent as declared in a spec: starting position plus optional pose and
/// sensors. The runtime copy lives in [`crate::sim::AgentState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub id: AgentId,
    pub position: Vec2,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensors: Vec<String>,
}

impl AgentSpec {
    pub fn new(id: impl Into<String>, position: Vec2) -> Self {
        Self {
            id: AgentId::new(id),
            position,
            rotation: None,
            sensors: Vec::new(),
        }
    }
}

/// One world item as declared in a spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSpec {
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub position: Vec2,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

impl ObjectSpec {
    pub fn new(id: impl Into<String>, kind: ObjectKind, position: Vec2) -> Self {
        Self {
            id: ObjectId::new(id),
            kind,
            position,
            rotation: None,
        }
    }
}

// ================================================================================================
// EnvSpec
// ================================================================================================

/// Declarative environment description: world geometry, agents, objects,
/// action space, and reward/termination/event rules.
///
/// An `EnvSpec` is immutable once loaded. Consumers share it read-only; the
/// simulator compiles it into an index-addressed
/// [`crate::sim::CompiledEnv`] before stepping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub world: WorldSpec,
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
    pub action_space: ActionSpace,
    pub rules: RuleSet,
}

impl EnvSpec {
    pub fn is_multi_agent(&self) -> bool {
        self.agents.len() > 1
    }

    /// Objects of a given kind, with their arena indices.
    pub fn objects_of_kind(
        &self,
        kind: ObjectKind,
    ) -> impl Iterator<Item = (usize, &ObjectSpec)> {
        self.objects
            .iter()
            .enumerate()
            .filter(move |(_, o)| o.kind == kind)
    }

    /// Computes a deterministic hash of this specification.
    ///
    /// Used as the key of the compiled-environment and rollout caches. The
    /// hash is taken over the canonical JSON encoding, so any two specs that
    /// serialize identically share cache entries.
    pub fn hash(&self) -> StudioResult<SpecHash> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| SpecError::validation("envSpec", format!("not encodable: {e}")))?;
        let digest = blake3::hash(&bytes);
        Ok(SpecHash(digest.to_hex().as_str()[..16].to_string()))
    }
}

/// Stable 16-hex-char digest of a sanitized [`EnvSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecHash(pub String);

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
