use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::sim::Vec2;

/// Dynamics family of a world.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
pub enum WorldKind {
    /// Discrete cells; agents move one cell per step and snap to integers.
    #[default]
    #[serde(rename = "grid")]
    Grid,

    /// Continuous plane; agents move by a velocity-limited delta per step.
    #[serde(rename = "continuous2d")]
    #[strum(serialize = "continuous2d")]
    Continuous2d,
}

impl WorldKind {
    pub fn is_grid(&self) -> bool {
        matches!(self, Self::Grid)
    }
}

/// Interpretation of world coordinates, which fixes the clamping box.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CoordinateSystem {
    /// Cells indexed from the origin: `[0, width-1] x [0, height-1]`.
    #[default]
    Grid,

    /// Origin-centered: `[-width/2, width/2] x [-height/2, height/2]`.
    Cartesian,

    /// Corner-anchored continuous box: `[0, width] x [0, height]`.
    Other,
}

/// World geometry shared by every agent and object in a spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSpec {
    #[serde(rename = "worldKind", default)]
    pub kind: WorldKind,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub coordinate_system: CoordinateSystem,
    /// Grid worlds only; defaults to 1.0 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_size: Option<f64>,
}

impl WorldSpec {
    pub fn grid(width: f64, height: f64) -> Self {
        Self {
            kind: WorldKind::Grid,
            width,
            height,
            coordinate_system: CoordinateSystem::Grid,
            cell_size: None,
        }
    }

    pub fn continuous(width: f64, height: f64) -> Self {
        Self {
            kind: WorldKind::Continuous2d,
            width,
            height,
            coordinate_system: CoordinateSystem::Other,
            cell_size: None,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size.unwrap_or(1.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Clamps a candidate position into the world box. Grid coordinates
    /// additionally snap to integer cell centers.
    pub fn clamp(&self, pos: Vec2) -> Vec2 {
        match self.coordinate_system {
            CoordinateSystem::Grid => Vec2::new(
                pos.x.clamp(0.0, self.width - 1.0).round(),
                pos.y.clamp(0.0, self.height - 1.0).round(),
            ),
            CoordinateSystem::Cartesian => Vec2::new(
                pos.x.clamp(-self.width / 2.0, self.width / 2.0),
                pos.y.clamp(-self.height / 2.0, self.height / 2.0),
            ),
            CoordinateSystem::Other => Vec2::new(
                pos.x.clamp(0.0, self.width),
                pos.y.clamp(0.0, self.height),
            ),
        }
    }

    /// Clamps a continuous-motion candidate. Continuous moves never snap;
    /// only cartesian worlds keep the origin-centered box, everything else
    /// uses the corner-anchored `[0, width] x [0, height]` box.
    pub fn clamp_loose(&self, pos: Vec2) -> Vec2 {
        match self.coordinate_system {
            CoordinateSystem::Cartesian => Vec2::new(
                pos.x.clamp(-self.width / 2.0, self.width / 2.0),
                pos.y.clamp(-self.height / 2.0, self.height / 2.0),
            ),
            CoordinateSystem::Grid | CoordinateSystem::Other => Vec2::new(
                pos.x.clamp(0.0, self.width),
                pos.y.clamp(0.0, self.height),
            ),
        }
    }

    /// Whether a position lies inside the world box for this coordinate system.
    pub fn contains(&self, pos: Vec2) -> bool {
        if !pos.is_finite() {
            return false;
        }
        match self.coordinate_system {
            CoordinateSystem::Grid => {
                pos.x >= 0.0 && pos.x < self.width && pos.y >= 0.0 && pos.y < self.height
            }
            CoordinateSystem::Cartesian => {
                pos.x.abs() <= self.width / 2.0 && pos.y.abs() <= self.height / 2.0
            }
            CoordinateSystem::Other => {
                pos.x >= 0.0 && pos.x <= self.width && pos.y >= 0.0 && pos.y <= self.height
            }
        }
    }
}
