use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::spec::domain::AgentId;

// ================================================================================================
// Action Space
// ================================================================================================

/// Action space declared by a spec: either a named discrete set or a bounded
/// continuous box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionSpace {
    Discrete { actions: Vec<String> },
    Continuous { dims: usize, range: [f64; 2] },
}

impl ActionSpace {
    /// The four compass moves, the default discrete vocabulary.
    pub fn compass() -> Self {
        Self::Discrete {
            actions: vec![
                "up".to_string(),
                "down".to_string(),
                "left".to_string(),
                "right".to_string(),
            ],
        }
    }

    pub fn planar() -> Self {
        Self::Continuous {
            dims: 2,
            range: [-1.0, 1.0],
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }

    pub fn cardinality(&self) -> usize {
        match self {
            Self::Discrete { actions } => actions.len(),
            Self::Continuous { .. } => 0,
        }
    }
}

// ================================================================================================
// Actions
// ================================================================================================

/// One action as submitted to the simulator.
///
/// The wire shape mirrors the studio's document format: a bare string for a
/// single-agent discrete move, a number array for a single-agent continuous
/// move, and a map from agent id to action for multi-agent control. Dispatch
/// over the three shapes is exhaustive in the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    Discrete(String),
    Continuous(Vec<f64>),
    Multi(BTreeMap<AgentId, Action>),
}

impl Action {
    pub fn discrete(name: impl Into<String>) -> Self {
        Self::Discrete(name.into())
    }

    pub fn continuous(dx: f64, dy: f64) -> Self {
        Self::Continuous(vec![dx, dy])
    }

    pub fn multi(entries: impl IntoIterator<Item = (AgentId, Action)>) -> Self {
        Self::Multi(entries.into_iter().collect())
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }

    /// Compass direction of a discrete action, if it names one.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Discrete(name) => name.parse().ok(),
            _ => None,
        }
    }
}

impl From<Direction> for Action {
    fn from(dir: Direction) -> Self {
        Self::Discrete(dir.to_string())
    }
}

/// Compass moves understood by the movement model. Discrete action names
/// outside this vocabulary degrade to a recorded no-op.
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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Movement delta in grid coordinates, where `up` decreases `y`.
    pub fn grid_delta(&self, cell_size: f64) -> (f64, f64) {
        match self {
            Self::Up => (0.0, -cell_size),
            Self::Down => (0.0, cell_size),
            Self::Left => (-cell_size, 0.0),
            Self::Right => (cell_size, 0.0),
        }
    }

    /// Movement delta in continuous coordinates, where `up` increases `y`.
    pub fn continuous_delta(&self, step_size: f64) -> (f64, f64) {
        match self {
            Self::Up => (0.0, step_size),
            Self::Down => (0.0, -step_size),
            Self::Left => (-step_size, 0.0),
            Self::Right => (step_size, 0.0),
        }
    }

    pub fn perpendicular(&self) -> [Direction; 2] {
        match self {
            Self::Up | Self::Down => [Self::Left, Self::Right],
            Self::Left | Self::Right => [Self::Up, Self::Down],
        }
    }
}
