//! Particle advection, domain containment, and the interaction impulse.

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::grid::Grid;
use crate::particle::Particle;

/// A one-step interaction: particles near `position` are pushed toward
/// `velocity`. Passed into `step` per call, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Impulse {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Blend particle velocities toward the impulse with linear radial falloff:
/// full strength at the center, zero at `radius`.
pub fn apply_impulse(particles: &mut [Particle], impulse: Impulse, radius: f32) {
    if radius <= 0.0 {
        return;
    }
    particles.par_iter_mut().for_each(|p| {
        let d = p.position.distance(impulse.position);
        if d < radius {
            let t = 1.0 - d / radius;
            p.velocity += (impulse.velocity - p.velocity) * t;
        }
    });
}

/// Integrate particle positions with explicit Euler.
pub fn advect_particles(particles: &mut [Particle], dt: f32) {
    particles.par_iter_mut().for_each(|p| {
        p.position += p.velocity * dt;
    });
}

/// Clamp every particle into the domain with a half-cell margin, zeroing
/// the velocity component that carried it out. Particles are never
/// dropped; the return value counts wall contacts for diagnostics.
pub fn enforce_particle_bounds(grid: &Grid, particles: &mut [Particle]) -> usize {
    let min = grid.bounds_min + 0.5 * grid.cell_size;
    let max = grid.bounds_max - 0.5 * grid.cell_size;

    let clamped: usize = particles
        .par_iter_mut()
        .map(|p| {
            let mut hit = false;
            if p.position.x < min.x {
                p.position.x = min.x;
                p.velocity.x = 0.0;
                hit = true;
            } else if p.position.x > max.x {
                p.position.x = max.x;
                p.velocity.x = 0.0;
                hit = true;
            }
            if p.position.y < min.y {
                p.position.y = min.y;
                p.velocity.y = 0.0;
                hit = true;
            } else if p.position.y > max.y {
                p.position.y = max.y;
                p.velocity.y = 0.0;
                hit = true;
            }
            if p.position.z < min.z {
                p.position.z = min.z;
                p.velocity.z = 0.0;
                hit = true;
            } else if p.position.z > max.z {
                p.position.z = max.z;
                p.velocity.z = 0.0;
                hit = true;
            }
            usize::from(hit)
        })
        .sum();

    if clamped > 0 {
        log::debug!("clamped {} particles at the domain walls", clamped);
    }
    clamped
}
