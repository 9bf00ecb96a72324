//! Spatial configurations
//!
//! A configuration is the spatial state a robot occupies before, during and
//! after a task: an SE(2) or SE(3) state for sampling-based planning, or a
//! vertex of a roadmap graph. One problem instance uses exactly one variant
//! throughout; the input validator enforces this.
//!
//! Configurations provide total equality and a hash consistent with it
//! (required for the oracle cache keys) plus a euclidean distance that
//! underestimates the true motion-plan length.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Identifier of a vertex in a graph environment
pub type VertexId = u32;

/// A tagged spatial state
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Configuration {
    /// Planar pose (translation and heading)
    Se2 { x: f32, y: f32, yaw: f32 },
    /// Spatial pose (translation and unit-quaternion rotation)
    Se3 {
        x: f32,
        y: f32,
        z: f32,
        qw: f32,
        qx: f32,
        qy: f32,
        qz: f32,
    },
    /// A vertex of a roadmap graph, with its embedding coordinates
    Graph { vertex: VertexId, x: f32, y: f32 },
}

impl Configuration {
    pub const fn se2(x: f32, y: f32, yaw: f32) -> Self {
        Self::Se2 { x, y, yaw }
    }

    pub const fn graph(vertex: VertexId, x: f32, y: f32) -> Self {
        Self::Graph { vertex, x, y }
    }

    /// Straight-line distance between the translation components.
    ///
    /// This is an underestimate of any collision-free path length, which is
    /// what the heuristic transition durations rely on. Distances across
    /// mismatched variants are meaningless and return infinity; validated
    /// problems never mix variants.
    pub fn euclidean_distance(&self, other: &Self) -> f32 {
        match (self, other) {
            (Self::Se2 { x: ax, y: ay, .. }, Self::Se2 { x: bx, y: by, .. })
            | (
                Self::Graph {
                    x: ax, y: ay, ..
                },
                Self::Graph {
                    x: bx, y: by, ..
                },
            ) => ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt(),
            (
                Self::Se3 {
                    x: ax,
                    y: ay,
                    z: az,
                    ..
                },
                Self::Se3 {
                    x: bx,
                    y: by,
                    z: bz,
                    ..
                },
            ) => ((ax - bx).powi(2) + (ay - by).powi(2) + (az - bz).powi(2)).sqrt(),
            _ => f32::INFINITY,
        }
    }

    /// Whether two configurations use the same variant
    pub fn same_kind(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Se2 { .. }, Self::Se2 { .. })
                | (Self::Se3 { .. }, Self::Se3 { .. })
                | (Self::Graph { .. }, Self::Graph { .. })
        )
    }

    fn bit_pattern(&self) -> [u64; 5] {
        fn pack(hi: f32, lo: f32) -> u64 {
            (u64::from(hi.to_bits()) << 32) | u64::from(lo.to_bits())
        }
        match *self {
            Self::Se2 { x, y, yaw } => [0, pack(x, y), u64::from(yaw.to_bits()), 0, 0],
            Self::Se3 {
                x,
                y,
                z,
                qw,
                qx,
                qy,
                qz,
            } => [
                1,
                pack(x, y),
                pack(z, qw),
                pack(qx, qy),
                u64::from(qz.to_bits()),
            ],
            Self::Graph { vertex, x, y } => [2, u64::from(vertex), pack(x, y), 0, 0],
        }
    }
}

// Total equality over the exact bit patterns; geometric proximity is
// deliberately not equality (two configurations a millimetre apart are
// distinct oracle cache keys).
impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.bit_pattern() == other.bit_pattern()
    }
}

impl Eq for Configuration {}

impl Hash for Configuration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bit_pattern().hash(state);
    }
}
