//! Fluid particles.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::constants::PARTICLE_COLOR;

/// A single fluid particle. The particle set is fixed after seeding; no
/// particle is ever emitted or dropped at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Render-only state. Written at seeding, never read by the solver.
    pub color: Vec4,
}

impl Particle {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self {
            position,
            velocity,
            color: Vec4::from_array(PARTICLE_COLOR),
        }
    }
}
