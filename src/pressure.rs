//! Pressure projection.
//!
//! Builds a 7-point Poisson system over fluid cells from the face
//! divergence, solves it with either fixed-budget Jacobi relaxation or a
//! diagonally preconditioned conjugate gradient, then subtracts the
//! pressure gradient from the face velocities. Solid neighbors get Neumann
//! treatment, air neighbors zero-pressure Dirichlet.

use thiserror::Error;

use crate::grid::{CellType, Grid};

/// The conjugate-gradient solve exhausted its iteration budget without
/// reaching the residual tolerance. The step is abandoned but the
/// simulation state stays readable and steppable.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error(
    "pressure solve did not converge: residual {residual:.3e} after {iterations} iterations (tolerance {tolerance:.3e})"
)]
pub struct ConvergenceError {
    pub iterations: usize,
    pub residual: f32,
    pub tolerance: f32,
}

/// Fill `divergence_rhs` with the negated face divergence of every fluid
/// cell. Non-fluid cells get zero. The dt and density constants live in the
/// stencil coefficients so both solver strategies share one system.
pub fn compute_divergence(grid: &mut Grid) {
    let (nx, ny, nz) = (grid.width as i32, grid.height as i32, grid.depth as i32);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = grid.cell_index(i, j, k);
                grid.divergence_rhs[idx] = if grid.cell_type[idx] == CellType::Fluid {
                    -grid.divergence(i, j, k)
                } else {
                    0.0
                };
            }
        }
    }
}

/// Build the 7-point stencil for the current cell classification.
///
/// For each fluid cell, `a_diag` scales the count of non-solid neighbors
/// (the domain outside counts as solid) and `a_x`/`a_y`/`a_z` hold the
/// coupling to the +axis neighbor when it is fluid. Air neighbors thus
/// contribute to the diagonal but not to any coupling. Fluid cells with an
/// empty row are fixed at zero pressure and skipped by both solvers; their
/// count is returned.
pub fn build_coefficients(grid: &mut Grid, dt: f32, fluid_density: f32) -> usize {
    let h = grid.cell_size.x;
    debug_assert!(
        (grid.cell_size.y - h).abs() < 1e-5 * h && (grid.cell_size.z - h).abs() < 1e-5 * h,
        "the pressure stencil assumes cubic cells, got {:?}",
        grid.cell_size
    );
    let scale = dt / (fluid_density * h * h);
    let (nx, ny, nz) = (grid.width as i32, grid.height as i32, grid.depth as i32);
    let mut degenerate = 0usize;

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = grid.cell_index(i, j, k);
                if grid.cell_type[idx] != CellType::Fluid {
                    grid.a_diag[idx] = 0.0;
                    grid.a_x[idx] = 0.0;
                    grid.a_y[idx] = 0.0;
                    grid.a_z[idx] = 0.0;
                    grid.pressure[idx] = 0.0;
                    grid.pressure_guess[idx] = 0.0;
                    continue;
                }

                let mut open = 0;
                for (di, dj, dk) in [
                    (-1, 0, 0),
                    (1, 0, 0),
                    (0, -1, 0),
                    (0, 1, 0),
                    (0, 0, -1),
                    (0, 0, 1),
                ] {
                    if !grid.is_solid_or_outside(i + di, j + dj, k + dk) {
                        open += 1;
                    }
                }
                grid.a_diag[idx] = scale * open as f32;

                let fluid_at = |g: &Grid, ci: i32, cj: i32, ck: i32| {
                    !g.is_solid_or_outside(ci, cj, ck)
                        && g.cell_type[g.cell_index(ci, cj, ck)] == CellType::Fluid
                };
                grid.a_x[idx] = if fluid_at(grid, i + 1, j, k) { -scale } else { 0.0 };
                grid.a_y[idx] = if fluid_at(grid, i, j + 1, k) { -scale } else { 0.0 };
                grid.a_z[idx] = if fluid_at(grid, i, j, k + 1) { -scale } else { 0.0 };

                if open == 0 {
                    // Fully enclosed by solids: the row is empty, pin the
                    // pressure instead of solving for it.
                    grid.pressure[idx] = 0.0;
                    grid.pressure_guess[idx] = 0.0;
                    degenerate += 1;
                }
            }
        }
    }
    degenerate
}

/// Relax the pressure system with a fixed budget of Jacobi iterations.
///
/// Double buffered: each iteration reads `pressure`, writes
/// `pressure_guess`, then the buffers swap, so cell updates within one
/// iteration are order independent. Jacobi never reports failure; it runs
/// whatever budget it is given.
pub fn solve_pressure_jacobi(grid: &mut Grid, iterations: usize) {
    let (nx, ny, nz) = (grid.width as i32, grid.height as i32, grid.depth as i32);
    for _ in 0..iterations {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let idx = grid.cell_index(i, j, k);
                    if grid.cell_type[idx] != CellType::Fluid || grid.a_diag[idx] == 0.0 {
                        grid.pressure_guess[idx] = 0.0;
                        continue;
                    }

                    // +axis couplings live on this cell, -axis couplings on
                    // the neighbor (symmetric stencil).
                    let mut off = 0.0;
                    if grid.a_x[idx] != 0.0 {
                        off += grid.a_x[idx] * grid.pressure[grid.cell_index(i + 1, j, k)];
                    }
                    if grid.a_y[idx] != 0.0 {
                        off += grid.a_y[idx] * grid.pressure[grid.cell_index(i, j + 1, k)];
                    }
                    if grid.a_z[idx] != 0.0 {
                        off += grid.a_z[idx] * grid.pressure[grid.cell_index(i, j, k + 1)];
                    }
                    if i > 0 {
                        let n = grid.cell_index(i - 1, j, k);
                        if grid.a_x[n] != 0.0 {
                            off += grid.a_x[n] * grid.pressure[n];
                        }
                    }
                    if j > 0 {
                        let n = grid.cell_index(i, j - 1, k);
                        if grid.a_y[n] != 0.0 {
                            off += grid.a_y[n] * grid.pressure[n];
                        }
                    }
                    if k > 0 {
                        let n = grid.cell_index(i, j, k - 1);
                        if grid.a_z[n] != 0.0 {
                            off += grid.a_z[n] * grid.pressure[n];
                        }
                    }

                    grid.pressure_guess[idx] =
                        (grid.divergence_rhs[idx] - off) / grid.a_diag[idx];
                }
            }
        }
        std::mem::swap(&mut grid.pressure, &mut grid.pressure_guess);
    }
}

/// Solve the pressure system with a diagonally preconditioned conjugate
/// gradient over the compacted fluid cells.
///
/// The stencil coefficients are assembled into a sparse symmetric matrix
/// (diagonal plus compressed off-diagonal rows) and iterated until the
/// residual max norm drops to `tolerance`. Returns the iteration count on
/// success; exhausting `max_iterations` fails the step.
pub fn solve_pressure_pcg(
    grid: &mut Grid,
    max_iterations: usize,
    tolerance: f32,
) -> Result<usize, ConvergenceError> {
    let (nx, ny, nz) = (grid.width as i32, grid.height as i32, grid.depth as i32);

    // Compact active cells. Couplings only ever connect two fluid cells,
    // and any fluid cell with a fluid neighbor has a nonzero diagonal, so
    // every coupling endpoint is active.
    let mut map = vec![u32::MAX; grid.cell_type.len()];
    let mut active: Vec<usize> = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = grid.cell_index(i, j, k);
                if grid.cell_type[idx] == CellType::Fluid && grid.a_diag[idx] != 0.0 {
                    map[idx] = active.len() as u32;
                    active.push(idx);
                }
            }
        }
    }

    let n = active.len();
    grid.pressure.fill(0.0);
    if n == 0 {
        return Ok(0);
    }

    let diag: Vec<f32> = active.iter().map(|&idx| grid.a_diag[idx]).collect();
    let b: Vec<f32> = active.iter().map(|&idx| grid.divergence_rhs[idx]).collect();

    // Compressed off-diagonal rows.
    let mut row_ptr = Vec::with_capacity(n + 1);
    let mut col = Vec::new();
    let mut val = Vec::new();
    row_ptr.push(0usize);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = grid.cell_index(i, j, k);
                if map[idx] == u32::MAX {
                    continue;
                }
                let mut push = |coef: f32, nidx: usize| {
                    if coef != 0.0 {
                        col.push(map[nidx]);
                        val.push(coef);
                    }
                };
                push(grid.a_x[idx], grid.cell_index(i + 1, j, k));
                push(grid.a_y[idx], grid.cell_index(i, j + 1, k));
                push(grid.a_z[idx], grid.cell_index(i, j, k + 1));
                if i > 0 {
                    let nb = grid.cell_index(i - 1, j, k);
                    push(grid.a_x[nb], nb);
                }
                if j > 0 {
                    let nb = grid.cell_index(i, j - 1, k);
                    push(grid.a_y[nb], nb);
                }
                if k > 0 {
                    let nb = grid.cell_index(i, j, k - 1);
                    push(grid.a_z[nb], nb);
                }
                row_ptr.push(col.len());
            }
        }
    }

    let matvec = |out: &mut [f32], x: &[f32]| {
        for a in 0..n {
            let mut acc = diag[a] * x[a];
            for e in row_ptr[a]..row_ptr[a + 1] {
                acc += val[e] * x[col[e] as usize];
            }
            out[a] = acc;
        }
    };
    let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
    let inf_norm = |v: &[f32]| -> f32 { v.iter().fold(0.0f32, |m, x| m.max(x.abs())) };

    // Start from zero pressure: r = b.
    let mut x = vec![0.0f32; n];
    let mut r = b;
    let mut residual = inf_norm(&r);
    let mut iterations = 0usize;

    if residual > tolerance {
        let mut z: Vec<f32> = r.iter().zip(&diag).map(|(ri, di)| ri / di).collect();
        let mut p = z.clone();
        let mut ap = vec![0.0f32; n];
        let mut rz = dot(&r, &z);

        for iter in 1..=max_iterations {
            iterations = iter;
            matvec(&mut ap, &p);
            let pap = dot(&p, &ap);
            if pap.abs() < 1e-20 {
                break;
            }
            let alpha = rz / pap;
            for a in 0..n {
                x[a] += alpha * p[a];
                r[a] -= alpha * ap[a];
            }
            residual = inf_norm(&r);
            if residual <= tolerance {
                break;
            }
            for a in 0..n {
                z[a] = r[a] / diag[a];
            }
            let rz_new = dot(&r, &z);
            let beta = rz_new / rz;
            rz = rz_new;
            for a in 0..n {
                p[a] = z[a] + beta * p[a];
            }
        }
    }

    if residual > tolerance {
        log::warn!(
            "pressure pcg stalled: residual {:.3e} > {:.3e} after {} iterations over {} cells",
            residual,
            tolerance,
            iterations,
            n
        );
        return Err(ConvergenceError {
            iterations,
            residual,
            tolerance,
        });
    }

    for (a, &idx) in active.iter().enumerate() {
        grid.pressure[idx] = x[a];
    }
    log::debug!(
        "pressure pcg converged in {} iterations, residual {:.3e}",
        iterations,
        residual
    );
    Ok(iterations)
}

/// Subtract the pressure gradient from every face with a fluid side.
///
/// Faces touching a solid cell or the domain outside are zeroed instead
/// (no-penetration). Faces between two air cells keep their extrapolated
/// value, and air-side pressure reads as the stored zero.
pub fn apply_pressure_gradient(grid: &mut Grid, dt: f32, fluid_density: f32) {
    let (nx, ny, nz) = (grid.width as i32, grid.height as i32, grid.depth as i32);

    let scale = dt / (fluid_density * grid.cell_size.x);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..=nx {
                let f = grid.u_index(i, j, k);
                if grid.is_solid_or_outside(i - 1, j, k) || grid.is_solid_or_outside(i, j, k) {
                    grid.u[f] = 0.0;
                    continue;
                }
                let left = grid.cell_index(i - 1, j, k);
                let right = grid.cell_index(i, j, k);
                if grid.cell_type[left] == CellType::Fluid
                    || grid.cell_type[right] == CellType::Fluid
                {
                    grid.u[f] -= scale * (grid.pressure[right] - grid.pressure[left]);
                }
            }
        }
    }

    let scale = dt / (fluid_density * grid.cell_size.y);
    for k in 0..nz {
        for j in 0..=ny {
            for i in 0..nx {
                let f = grid.v_index(i, j, k);
                if grid.is_solid_or_outside(i, j - 1, k) || grid.is_solid_or_outside(i, j, k) {
                    grid.v[f] = 0.0;
                    continue;
                }
                let bottom = grid.cell_index(i, j - 1, k);
                let top = grid.cell_index(i, j, k);
                if grid.cell_type[bottom] == CellType::Fluid
                    || grid.cell_type[top] == CellType::Fluid
                {
                    grid.v[f] -= scale * (grid.pressure[top] - grid.pressure[bottom]);
                }
            }
        }
    }

    let scale = dt / (fluid_density * grid.cell_size.z);
    for k in 0..=nz {
        for j in 0..ny {
            for i in 0..nx {
                let f = grid.w_index(i, j, k);
                if grid.is_solid_or_outside(i, j, k - 1) || grid.is_solid_or_outside(i, j, k) {
                    grid.w[f] = 0.0;
                    continue;
                }
                let back = grid.cell_index(i, j, k - 1);
                let front = grid.cell_index(i, j, k);
                if grid.cell_type[back] == CellType::Fluid
                    || grid.cell_type[front] == CellType::Fluid
                {
                    grid.w[f] -= scale * (grid.pressure[front] - grid.pressure[back]);
                }
            }
        }
    }
}

/// Zero the normal velocity of every face that touches a solid cell or the
/// domain boundary.
pub fn enforce_boundary_conditions(grid: &mut Grid) {
    let (nx, ny, nz) = (grid.width as i32, grid.height as i32, grid.depth as i32);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..=nx {
                if grid.is_solid_or_outside(i - 1, j, k) || grid.is_solid_or_outside(i, j, k) {
                    let f = grid.u_index(i, j, k);
                    grid.u[f] = 0.0;
                }
            }
        }
    }
    for k in 0..nz {
        for j in 0..=ny {
            for i in 0..nx {
                if grid.is_solid_or_outside(i, j - 1, k) || grid.is_solid_or_outside(i, j, k) {
                    let f = grid.v_index(i, j, k);
                    grid.v[f] = 0.0;
                }
            }
        }
    }
    for k in 0..=nz {
        for j in 0..ny {
            for i in 0..nx {
                if grid.is_solid_or_outside(i, j, k - 1) || grid.is_solid_or_outside(i, j, k) {
                    let f = grid.w_index(i, j, k);
                    grid.w[f] = 0.0;
                }
            }
        }
    }
}

/// Largest absolute face divergence over fluid cells.
pub fn max_fluid_divergence(grid: &Grid) -> f32 {
    let (nx, ny, nz) = (grid.width as i32, grid.height as i32, grid.depth as i32);
    let mut max_div = 0.0f32;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if grid.cell_type[grid.cell_index(i, j, k)] == CellType::Fluid {
                    max_div = max_div.max(grid.divergence(i, j, k).abs());
                }
            }
        }
    }
    max_div
}
