//! Velocity extrapolation into faces the transfer left unknown.
//!
//! Particle-to-grid transfer only defines faces near particles. Sampling and
//! advection close to the surface need values one or two cells beyond that,
//! so known velocities are spread outward in layers before forces apply.

use glam::IVec3;

use crate::grid::{grid_index, Grid};

const NEIGHBOR_OFFSETS: [(i32, i32, i32); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Spread known face velocities outward, one layer per pass.
///
/// Each pass assigns every unknown face the average of its known lattice
/// neighbors, then commits the new known flags, so the wavefront advances
/// exactly one layer regardless of traversal order. Stops early once a pass
/// changes nothing.
pub fn extrapolate_velocities(grid: &mut Grid, max_passes: usize) {
    let u_extent = grid.u_extent();
    let v_extent = grid.v_extent();
    let w_extent = grid.w_extent();
    extrapolate_field(&mut grid.u, &mut grid.u_known, u_extent, max_passes);
    extrapolate_field(&mut grid.v, &mut grid.v_known, v_extent, max_passes);
    extrapolate_field(&mut grid.w, &mut grid.w_known, w_extent, max_passes);
}

fn extrapolate_field(values: &mut [f32], known: &mut [bool], extent: IVec3, max_passes: usize) {
    let mut new_values = values.to_vec();
    let mut new_known = known.to_vec();

    for _ in 0..max_passes {
        let mut changed = false;
        for k in 0..extent.z {
            for j in 0..extent.y {
                for i in 0..extent.x {
                    let idx = grid_index(extent, i, j, k);
                    if known[idx] {
                        continue;
                    }
                    let mut sum = 0.0;
                    let mut count = 0u32;
                    for &(di, dj, dk) in &NEIGHBOR_OFFSETS {
                        let (ni, nj, nk) = (i + di, j + dj, k + dk);
                        if ni < 0
                            || nj < 0
                            || nk < 0
                            || ni >= extent.x
                            || nj >= extent.y
                            || nk >= extent.z
                        {
                            continue;
                        }
                        let nidx = grid_index(extent, ni, nj, nk);
                        if known[nidx] {
                            sum += values[nidx];
                            count += 1;
                        }
                    }
                    if count > 0 {
                        new_values[idx] = sum / count as f32;
                        new_known[idx] = true;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
        values.copy_from_slice(&new_values);
        known.copy_from_slice(&new_known);
    }
}
