//! Staggered MAC grid storage and indexing.
//!
//! Velocity lives on cell faces as three independently stored scalar fields.
//! The `u` field has one extra node along x, `v` along y, `w` along z. Cell
//! centered quantities (classification, pressure, the Poisson system) use
//! one entry per cell.

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Cell classification. Recomputed from particle occupancy every step;
/// `Solid` cells are fixed obstacles and survive reclassification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellType {
    Solid,
    Fluid,
    #[default]
    Air,
}

/// Half-offset selecting the `u` face lattice: nodes on x cell boundaries,
/// at y/z cell centers.
pub const U_OFFSET: IVec3 = IVec3::new(0, -1, -1);
/// Half-offset selecting the `v` face lattice.
pub const V_OFFSET: IVec3 = IVec3::new(-1, 0, -1);
/// Half-offset selecting the `w` face lattice.
pub const W_OFFSET: IVec3 = IVec3::new(-1, -1, 0);

/// Clamp `(i, j, k)` into `[0, extent - 1]` per axis and linearize as
/// `k * nx * ny + j * nx + i`.
///
/// Out-of-range coordinates alias the nearest edge node instead of
/// panicking. Trilinear stencils straddling the domain boundary therefore
/// stay in bounds, at the cost of folding the outside corner's contribution
/// onto the edge.
#[inline]
pub fn grid_index(extent: IVec3, i: i32, j: i32, k: i32) -> usize {
    let x = i.clamp(0, extent.x - 1);
    let y = j.clamp(0, extent.y - 1);
    let z = k.clamp(0, extent.z - 1);
    (z * extent.x * extent.y + y * extent.x + x) as usize
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
    pub cell_size: Vec3,

    /// Face-normal velocities, one flat array per component.
    pub u: Vec<f32>,
    pub v: Vec<f32>,
    pub w: Vec<f32>,
    /// Snapshot of the face field taken after extrapolation, before forces
    /// and projection. The FLIP delta in grid-to-particle transfer samples
    /// these with the same weights as the current field.
    pub u_old: Vec<f32>,
    pub v_old: Vec<f32>,
    pub w_old: Vec<f32>,
    /// Whether each face holds a valid velocity this step. Set during
    /// particle-to-grid transfer, spread outward by extrapolation.
    pub u_known: Vec<bool>,
    pub v_known: Vec<bool>,
    pub w_known: Vec<bool>,

    pub cell_type: Vec<CellType>,
    pub pressure: Vec<f32>,
    pub pressure_guess: Vec<f32>,
    pub divergence_rhs: Vec<f32>,
    /// Poisson diagonal and the +x/+y/+z couplings of the symmetric 7-point
    /// stencil. A cell's -axis coupling is the neighbor's own entry.
    pub a_diag: Vec<f32>,
    pub a_x: Vec<f32>,
    pub a_y: Vec<f32>,
    pub a_z: Vec<f32>,
}

impl Grid {
    /// Build an empty grid of `resolution` cells over the given box.
    ///
    /// Panics if any axis has a non-positive cell count or a non-positive
    /// derived cell size.
    pub fn new(bounds_min: Vec3, bounds_max: Vec3, resolution: IVec3) -> Self {
        assert!(
            resolution.x > 0 && resolution.y > 0 && resolution.z > 0,
            "grid resolution must be positive on every axis, got {:?}",
            resolution
        );
        let cell_size = (bounds_max - bounds_min) / resolution.as_vec3();
        assert!(
            cell_size.x > 0.0 && cell_size.y > 0.0 && cell_size.z > 0.0,
            "grid bounds must have positive extent on every axis"
        );

        let (w, h, d) = (
            resolution.x as usize,
            resolution.y as usize,
            resolution.z as usize,
        );
        let cells = w * h * d;
        let u_len = (w + 1) * h * d;
        let v_len = w * (h + 1) * d;
        let w_len = w * h * (d + 1);

        Self {
            width: w,
            height: h,
            depth: d,
            bounds_min,
            bounds_max,
            cell_size,
            u: vec![0.0; u_len],
            v: vec![0.0; v_len],
            w: vec![0.0; w_len],
            u_old: vec![0.0; u_len],
            v_old: vec![0.0; v_len],
            w_old: vec![0.0; w_len],
            u_known: vec![false; u_len],
            v_known: vec![false; v_len],
            w_known: vec![false; w_len],
            cell_type: vec![CellType::Air; cells],
            pressure: vec![0.0; cells],
            pressure_guess: vec![0.0; cells],
            divergence_rhs: vec![0.0; cells],
            a_diag: vec![0.0; cells],
            a_x: vec![0.0; cells],
            a_y: vec![0.0; cells],
            a_z: vec![0.0; cells],
        }
    }

    /// Cell counts per axis.
    #[inline]
    pub fn dims(&self) -> IVec3 {
        IVec3::new(self.width as i32, self.height as i32, self.depth as i32)
    }

    #[inline]
    pub fn cell_extent(&self) -> IVec3 {
        self.dims()
    }

    #[inline]
    pub fn u_extent(&self) -> IVec3 {
        self.dims() + IVec3::X
    }

    #[inline]
    pub fn v_extent(&self) -> IVec3 {
        self.dims() + IVec3::Y
    }

    #[inline]
    pub fn w_extent(&self) -> IVec3 {
        self.dims() + IVec3::Z
    }

    /// Clamped linear index into cell-centered arrays. Never panics.
    #[inline]
    pub fn cell_index(&self, i: i32, j: i32, k: i32) -> usize {
        grid_index(self.cell_extent(), i, j, k)
    }

    /// Clamped linear index into the `u` face array.
    #[inline]
    pub fn u_index(&self, i: i32, j: i32, k: i32) -> usize {
        grid_index(self.u_extent(), i, j, k)
    }

    /// Clamped linear index into the `v` face array.
    #[inline]
    pub fn v_index(&self, i: i32, j: i32, k: i32) -> usize {
        grid_index(self.v_extent(), i, j, k)
    }

    /// Clamped linear index into the `w` face array.
    #[inline]
    pub fn w_index(&self, i: i32, j: i32, k: i32) -> usize {
        grid_index(self.w_extent(), i, j, k)
    }

    /// Continuous lattice coordinates of a world position.
    ///
    /// `half_offset` selects the lattice: each -1 component shifts that axis
    /// by half a cell so nodes sit at cell centers, each 0 leaves nodes on
    /// the cell boundary. `U_OFFSET`/`V_OFFSET`/`W_OFFSET` pick the three
    /// face lattices; `IVec3::ZERO` floors to the containing cell.
    #[inline]
    pub fn world_to_grid(&self, pos: Vec3, half_offset: IVec3) -> Vec3 {
        (pos + 0.5 * half_offset.as_vec3() * self.cell_size - self.bounds_min) / self.cell_size
    }

    /// Cell containing a world position, clamped to the grid.
    #[inline]
    pub fn containing_cell(&self, pos: Vec3) -> IVec3 {
        let coords = self.world_to_grid(pos, IVec3::ZERO).floor().as_ivec3();
        coords.clamp(IVec3::ZERO, self.dims() - IVec3::ONE)
    }

    /// World position of a cell's center.
    #[inline]
    pub fn cell_center(&self, i: i32, j: i32, k: i32) -> Vec3 {
        self.bounds_min + (Vec3::new(i as f32, j as f32, k as f32) + 0.5) * self.cell_size
    }

    /// World position of a cell's minimum corner.
    #[inline]
    pub fn cell_min_corner(&self, i: i32, j: i32, k: i32) -> Vec3 {
        self.bounds_min + Vec3::new(i as f32, j as f32, k as f32) * self.cell_size
    }

    /// World position of the `u` face node `(i, j, k)`.
    #[inline]
    pub fn u_position(&self, i: i32, j: i32, k: i32) -> Vec3 {
        self.bounds_min + Vec3::new(i as f32, j as f32 + 0.5, k as f32 + 0.5) * self.cell_size
    }

    /// World position of the `v` face node `(i, j, k)`.
    #[inline]
    pub fn v_position(&self, i: i32, j: i32, k: i32) -> Vec3 {
        self.bounds_min + Vec3::new(i as f32 + 0.5, j as f32, k as f32 + 0.5) * self.cell_size
    }

    /// World position of the `w` face node `(i, j, k)`.
    #[inline]
    pub fn w_position(&self, i: i32, j: i32, k: i32) -> Vec3 {
        self.bounds_min + Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32) * self.cell_size
    }

    #[inline]
    pub fn cell_type_at(&self, i: i32, j: i32, k: i32) -> CellType {
        self.cell_type[self.cell_index(i, j, k)]
    }

    /// True if `(i, j, k)` lies outside the grid or is a solid cell. Faces
    /// against either block flow identically.
    #[inline]
    pub fn is_solid_or_outside(&self, i: i32, j: i32, k: i32) -> bool {
        if i < 0
            || j < 0
            || k < 0
            || i >= self.width as i32
            || j >= self.height as i32
            || k >= self.depth as i32
        {
            return true;
        }
        self.cell_type[self.cell_index(i, j, k)] == CellType::Solid
    }

    /// Mark a cell as a fixed solid obstacle.
    pub fn set_solid(&mut self, i: i32, j: i32, k: i32) {
        let idx = self.cell_index(i, j, k);
        self.cell_type[idx] = CellType::Solid;
    }

    /// Zero all face velocities and mark every face unknown.
    pub fn clear_velocities(&mut self) {
        self.u.fill(0.0);
        self.v.fill(0.0);
        self.w.fill(0.0);
        self.u_known.fill(false);
        self.v_known.fill(false);
        self.w_known.fill(false);
    }

    /// Snapshot the current face field for the FLIP delta.
    pub fn store_old_velocities(&mut self) {
        self.u_old.copy_from_slice(&self.u);
        self.v_old.copy_from_slice(&self.v);
        self.w_old.copy_from_slice(&self.w);
    }

    /// Reset every non-solid cell to air ahead of reclassification.
    pub fn reset_cell_types(&mut self) {
        for ct in &mut self.cell_type {
            if *ct != CellType::Solid {
                *ct = CellType::Air;
            }
        }
    }

    /// Zero pressure, right-hand side, and stencil coefficients.
    pub fn clear_solver_state(&mut self) {
        self.pressure.fill(0.0);
        self.pressure_guess.fill(0.0);
        self.divergence_rhs.fill(0.0);
        self.a_diag.fill(0.0);
        self.a_x.fill(0.0);
        self.a_y.fill(0.0);
        self.a_z.fill(0.0);
    }

    /// Velocity divergence of cell `(i, j, k)` from its six faces.
    #[inline]
    pub fn divergence(&self, i: i32, j: i32, k: i32) -> f32 {
        let du = self.u[self.u_index(i + 1, j, k)] - self.u[self.u_index(i, j, k)];
        let dv = self.v[self.v_index(i, j + 1, k)] - self.v[self.v_index(i, j, k)];
        let dw = self.w[self.w_index(i, j, k + 1)] - self.w[self.w_index(i, j, k)];
        du / self.cell_size.x + dv / self.cell_size.y + dw / self.cell_size.z
    }
}
