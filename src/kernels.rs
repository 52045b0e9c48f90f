//! Interpolation kernels for particle/grid transfer.
//!
//! Transfer runs per velocity component over that component's face lattice,
//! using the 8 lattice nodes surrounding the sample point with trilinear
//! weights.

use glam::{IVec3, Vec3};

/// Corner offsets of the trilinear stencil, in x-fastest order.
pub const CORNERS: [(i32, i32, i32); 8] = [
    (0, 0, 0),
    (1, 0, 0),
    (0, 1, 0),
    (1, 1, 0),
    (0, 0, 1),
    (1, 0, 1),
    (0, 1, 1),
    (1, 1, 1),
];

/// Split continuous lattice coordinates into the integer base corner and the
/// fractional offset within the cell. Uses floor, so negative coordinates
/// resolve to the corner below them.
#[inline]
pub fn base_and_frac(coords: Vec3) -> (IVec3, Vec3) {
    let base = coords.floor();
    (base.as_ivec3(), coords - base)
}

/// Trilinear weight of the corner at offset `(di, dj, dk)` from the base,
/// for fractional position `frac` inside the cell.
#[inline]
pub fn trilinear_weight(frac: Vec3, di: i32, dj: i32, dk: i32) -> f32 {
    let wx = if di == 0 { 1.0 - frac.x } else { frac.x };
    let wy = if dj == 0 { 1.0 - frac.y } else { frac.y };
    let wz = if dk == 0 { 1.0 - frac.z } else { frac.z };
    wx * wy * wz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_partition_unity() {
        let fracs = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(0.1, 0.7, 0.3),
            Vec3::new(0.99, 0.01, 0.5),
        ];
        for frac in fracs {
            let sum: f32 = CORNERS
                .iter()
                .map(|&(di, dj, dk)| trilinear_weight(frac, di, dj, dk))
                .sum();
            assert!(
                (sum - 1.0).abs() < 1e-6,
                "weights at {:?} sum to {}, expected 1",
                frac,
                sum
            );
        }
    }

    #[test]
    fn test_weight_collapses_at_node() {
        // Sample exactly on the base corner: all weight on (0,0,0).
        let frac = Vec3::ZERO;
        assert_eq!(trilinear_weight(frac, 0, 0, 0), 1.0);
        for &(di, dj, dk) in &CORNERS[1..] {
            assert_eq!(trilinear_weight(frac, di, dj, dk), 0.0);
        }
    }

    #[test]
    fn test_base_and_frac_negative_coords() {
        let (base, frac) = base_and_frac(Vec3::new(-0.25, 1.5, -2.0));
        assert_eq!(base, IVec3::new(-1, 1, -2));
        assert!((frac.x - 0.75).abs() < 1e-6);
        assert!((frac.y - 0.5).abs() < 1e-6);
        assert!(frac.z.abs() < 1e-6);
    }
}
