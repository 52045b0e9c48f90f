//! Particle/grid velocity transfer.
//!
//! P2G scatters each particle's velocity to the 8 surrounding nodes of each
//! face lattice and normalizes by the accumulated weight. G2P gathers the
//! projected field back with the same weights and blends PIC and FLIP.

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::constants::{MAX_PARTICLE_SPEED, MIN_TRANSFER_WEIGHT};
use crate::grid::{grid_index, Grid, U_OFFSET, V_OFFSET, W_OFFSET};
use crate::kernels::{base_and_frac, trilinear_weight, CORNERS};
use crate::particle::Particle;

/// Per-face weight accumulators, allocated once and reused every step.
#[derive(Debug, Clone)]
pub struct TransferBuffers {
    pub weight_u: Vec<f32>,
    pub weight_v: Vec<f32>,
    pub weight_w: Vec<f32>,
}

impl TransferBuffers {
    pub fn new(grid: &Grid) -> Self {
        Self {
            weight_u: vec![0.0; grid.u.len()],
            weight_v: vec![0.0; grid.v.len()],
            weight_w: vec![0.0; grid.w.len()],
        }
    }

    pub fn clear(&mut self) {
        self.weight_u.fill(0.0);
        self.weight_v.fill(0.0);
        self.weight_w.fill(0.0);
    }
}

/// Scatter one sample into the 8 stencil corners around `coords`.
fn splat(values: &mut [f32], weights: &mut [f32], extent: IVec3, coords: Vec3, sample: f32) {
    let (base, frac) = base_and_frac(coords);
    for &(di, dj, dk) in &CORNERS {
        let w = trilinear_weight(frac, di, dj, dk);
        let idx = grid_index(extent, base.x + di, base.y + dj, base.z + dk);
        values[idx] += w * sample;
        weights[idx] += w;
    }
}

/// Gather a trilinear sample from the stencil corners around `coords`.
fn gather(values: &[f32], extent: IVec3, coords: Vec3) -> f32 {
    let (base, frac) = base_and_frac(coords);
    let mut acc = 0.0;
    for &(di, dj, dk) in &CORNERS {
        let w = trilinear_weight(frac, di, dj, dk);
        acc += w * values[grid_index(extent, base.x + di, base.y + dj, base.z + dk)];
    }
    acc
}

fn normalize(values: &mut [f32], weights: &[f32], known: &mut [bool]) {
    for ((val, &w), flag) in values.iter_mut().zip(weights).zip(known.iter_mut()) {
        if w > MIN_TRANSFER_WEIGHT {
            *val /= w;
            *flag = true;
        } else {
            *val = 0.0;
            *flag = false;
        }
    }
}

/// Transfer particle velocities onto the grid faces.
///
/// The scatter is a serial accumulation; weight sums are associative, so
/// particle order only perturbs results at float rounding level. Faces that
/// receive no weight end the pass at zero velocity and unknown.
pub fn particles_to_grid(grid: &mut Grid, particles: &[Particle], buffers: &mut TransferBuffers) {
    grid.clear_velocities();
    buffers.clear();

    let u_extent = grid.u_extent();
    let v_extent = grid.v_extent();
    let w_extent = grid.w_extent();

    for p in particles {
        let cu = grid.world_to_grid(p.position, U_OFFSET);
        let cv = grid.world_to_grid(p.position, V_OFFSET);
        let cw = grid.world_to_grid(p.position, W_OFFSET);
        splat(&mut grid.u, &mut buffers.weight_u, u_extent, cu, p.velocity.x);
        splat(&mut grid.v, &mut buffers.weight_v, v_extent, cv, p.velocity.y);
        splat(&mut grid.w, &mut buffers.weight_w, w_extent, cw, p.velocity.z);
    }

    normalize(&mut grid.u, &buffers.weight_u, &mut grid.u_known);
    normalize(&mut grid.v, &buffers.weight_v, &mut grid.v_known);
    normalize(&mut grid.w, &buffers.weight_w, &mut grid.w_known);
}

/// Sample the current face field at a world position.
pub fn sample_velocity(grid: &Grid, pos: Vec3) -> Vec3 {
    Vec3::new(
        gather(&grid.u, grid.u_extent(), grid.world_to_grid(pos, U_OFFSET)),
        gather(&grid.v, grid.v_extent(), grid.world_to_grid(pos, V_OFFSET)),
        gather(&grid.w, grid.w_extent(), grid.world_to_grid(pos, W_OFFSET)),
    )
}

/// Sample the pre-force snapshot at a world position.
pub fn sample_old_velocity(grid: &Grid, pos: Vec3) -> Vec3 {
    Vec3::new(
        gather(&grid.u_old, grid.u_extent(), grid.world_to_grid(pos, U_OFFSET)),
        gather(&grid.v_old, grid.v_extent(), grid.world_to_grid(pos, V_OFFSET)),
        gather(&grid.w_old, grid.w_extent(), grid.world_to_grid(pos, W_OFFSET)),
    )
}

/// Transfer grid velocities back to the particles with a PIC/FLIP blend.
///
/// `pic_flip_blend` of 0 copies the grid sample (pure PIC); 1 adds only the
/// grid's change since the pre-force snapshot to the particle velocity
/// (pure FLIP).
pub fn grid_to_particles(grid: &Grid, particles: &mut [Particle], pic_flip_blend: f32) {
    let blend = pic_flip_blend.clamp(0.0, 1.0);
    particles.par_iter_mut().for_each(|p| {
        let grid_vel = sample_velocity(grid, p.position);
        let old_vel = sample_old_velocity(grid, p.position);
        let flip_vel = p.velocity + (grid_vel - old_vel);
        let new_vel = blend * flip_vel + (1.0 - blend) * grid_vel;
        p.velocity = if new_vel.is_finite() {
            new_vel.clamp_length_max(MAX_PARTICLE_SPEED)
        } else {
            Vec3::ZERO
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;

    fn unit_grid() -> Grid {
        Grid::new(Vec3::ZERO, Vec3::splat(4.0), IVec3::splat(4))
    }

    #[test]
    fn test_p2g_particle_on_node_transfers_exactly() {
        let mut grid = unit_grid();
        let mut buffers = TransferBuffers::new(&grid);
        // Sitting exactly on the u node (2,1,1), so all u weight lands there.
        let p = Particle::new(grid.u_position(2, 1, 1), Vec3::new(3.0, 0.0, 0.0));
        particles_to_grid(&mut grid, &[p], &mut buffers);

        let idx = grid.u_index(2, 1, 1);
        assert!((grid.u[idx] - 3.0).abs() < 1e-6, "u was {}", grid.u[idx]);
        assert!(grid.u_known[idx]);
        let far = grid.u_index(0, 3, 3);
        assert_eq!(grid.u[far], 0.0);
        assert!(!grid.u_known[far], "untouched faces stay unknown");
    }

    #[test]
    fn test_p2g_averages_coincident_particles() {
        let mut grid = unit_grid();
        let mut buffers = TransferBuffers::new(&grid);
        let pos = grid.u_position(2, 1, 1);
        let ps = [
            Particle::new(pos, Vec3::new(2.0, 0.0, 0.0)),
            Particle::new(pos, Vec3::new(4.0, 0.0, 0.0)),
        ];
        particles_to_grid(&mut grid, &ps, &mut buffers);
        let idx = grid.u_index(2, 1, 1);
        assert!(
            (grid.u[idx] - 3.0).abs() < 1e-6,
            "weighted average should be 3, got {}",
            grid.u[idx]
        );
    }

    #[test]
    fn test_p2g_empty_particle_set_leaves_grid_unknown() {
        let mut grid = unit_grid();
        let mut buffers = TransferBuffers::new(&grid);
        particles_to_grid(&mut grid, &[], &mut buffers);
        assert!(grid.u.iter().all(|&x| x == 0.0));
        assert!(grid.u_known.iter().all(|&k| !k));
    }

    #[test]
    fn test_g2p_pure_pic_copies_grid_sample() {
        let mut grid = unit_grid();
        grid.u.fill(5.0);
        grid.store_old_velocities();
        let mut ps = [Particle::new(Vec3::splat(2.1), Vec3::new(-9.0, 4.0, 1.0))];
        grid_to_particles(&grid, &mut ps, 0.0);
        assert!(
            (ps[0].velocity - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5,
            "pure PIC should replace the particle velocity, got {:?}",
            ps[0].velocity
        );
    }

    #[test]
    fn test_g2p_pure_flip_keeps_velocity_when_grid_unchanged() {
        let mut grid = unit_grid();
        grid.u.fill(2.0);
        grid.v.fill(-1.0);
        grid.store_old_velocities();
        let mut ps = [Particle::new(Vec3::splat(1.5), Vec3::new(7.0, 0.5, -0.25))];
        grid_to_particles(&grid, &mut ps, 1.0);
        assert!(
            (ps[0].velocity - Vec3::new(7.0, 0.5, -0.25)).length() < 1e-5,
            "zero grid delta should leave a pure FLIP particle untouched, got {:?}",
            ps[0].velocity
        );
    }

    #[test]
    fn test_g2p_blend_interpolates_between_modes() {
        let mut grid = unit_grid();
        grid.u.fill(10.0);
        grid.store_old_velocities();
        // Grid delta is zero, so FLIP keeps 0 and PIC pulls toward 10.
        let mut ps = [Particle::new(Vec3::splat(2.0), Vec3::ZERO)];
        grid_to_particles(&grid, &mut ps, 0.25);
        assert!(
            (ps[0].velocity.x - 7.5).abs() < 1e-5,
            "expected 75% PIC contribution, got {}",
            ps[0].velocity.x
        );
    }

    #[test]
    fn test_transfer_roundtrip_near_node() {
        let mut grid = unit_grid();
        let mut buffers = TransferBuffers::new(&grid);
        let p = Particle::new(grid.u_position(2, 1, 1), Vec3::new(1.5, -2.0, 0.5));
        particles_to_grid(&mut grid, &[p], &mut buffers);
        grid.store_old_velocities();
        let sampled = sample_velocity(&grid, p.position);
        // A lone particle on a u node gets its own velocity back there.
        assert!(
            (sampled.x - 1.5).abs() < 1e-5,
            "sampled u {} at the particle position",
            sampled.x
        );
    }
}
