//! Interactive PIC/FLIP incompressible-fluid core on a staggered MAC grid.
//!
//! Fluid is carried by particles. Every step splats particle velocities onto
//! the grid faces, extrapolates the field outward, applies body forces and
//! no-penetration boundaries, projects the field to divergence free with a
//! pressure solve, blends the result back onto the particles (PIC/FLIP),
//! and advects them. The solver owns two fixed-size buffers, the particle
//! array and the grid, which a renderer reads between steps through
//! [`FlipSimulation::particles`] and [`FlipSimulation::grid`].
//!
//! ```no_run
//! use macflip::{FlipSimulation, SimConfig, StepParams};
//!
//! let mut sim = FlipSimulation::new(SimConfig::default());
//! let params = StepParams::default();
//! for _ in 0..120 {
//!     sim.step(1.0 / 60.0, None, &params).expect("pressure solve");
//! }
//! ```

pub mod advection;
pub mod constants;
pub mod extrapolate;
pub mod grid;
pub mod kernels;
pub mod particle;
pub mod pressure;
pub mod transfer;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub use glam::{IVec3, Vec3, Vec4};

pub use crate::advection::Impulse;
pub use crate::grid::{CellType, Grid};
pub use crate::particle::Particle;
pub use crate::pressure::ConvergenceError;
use crate::transfer::TransferBuffers;

use crate::constants::{
    DEFAULT_FLUID_DENSITY, DEFAULT_IMPULSE_RADIUS, DEFAULT_JACOBI_ITERATIONS,
    DEFAULT_PARTICLES_PER_CELL, DEFAULT_PCG_MAX_ITERATIONS, DEFAULT_PCG_TOLERANCE,
    DEFAULT_PIC_FLIP_BLEND, DEFAULT_RESOLUTION, GRAVITY, SEED_VELOCITY_JITTER,
};

/// Static scene description: domain, grid resolution, and the seeded fluid
/// region. Fixed for the lifetime of a simulation; `reset` rebuilds from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
    /// Cell counts per axis.
    pub resolution: IVec3,
    /// World-space box of seeded fluid. Cells whose center falls inside
    /// (half open, min inclusive) are filled with particles.
    pub seed_min: Vec3,
    pub seed_max: Vec3,
    pub particles_per_cell: usize,
    /// RNG seed for particle placement. Equal seeds give bit-identical
    /// initial states.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        let bounds_min = Vec3::splat(-1.0);
        let bounds_max = Vec3::splat(1.0);
        let size = bounds_max - bounds_min;
        Self {
            bounds_min,
            bounds_max,
            resolution: IVec3::splat(DEFAULT_RESOLUTION),
            // A fluid column against the low-x wall, two thirds of the
            // domain tall, spanning the full depth.
            seed_min: bounds_min,
            seed_max: bounds_min + size * Vec3::new(1.0 / 3.0, 2.0 / 3.0, 1.0),
            particles_per_cell: DEFAULT_PARTICLES_PER_CELL,
            seed: 0,
        }
    }
}

/// Choice of pressure solver for a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PressureSolver {
    /// Fixed-budget Jacobi relaxation. Never fails.
    Jacobi { iterations: usize },
    /// Diagonally preconditioned conjugate gradient. Fails the step with
    /// [`ConvergenceError`] if the residual tolerance is not reached.
    Pcg { max_iterations: usize, tolerance: f32 },
}

impl Default for PressureSolver {
    fn default() -> Self {
        Self::Jacobi {
            iterations: DEFAULT_JACOBI_ITERATIONS,
        }
    }
}

impl PressureSolver {
    pub fn pcg() -> Self {
        Self::Pcg {
            max_iterations: DEFAULT_PCG_MAX_ITERATIONS,
            tolerance: DEFAULT_PCG_TOLERANCE,
        }
    }
}

/// Tunable per-step parameters. Passed into `step` so a caller can vary
/// them between frames without touching simulation state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepParams {
    pub gravity: Vec3,
    /// 0 is pure PIC, 1 is pure FLIP.
    pub pic_flip_blend: f32,
    pub fluid_density: f32,
    pub pressure_solver: PressureSolver,
    /// World-space falloff radius of the interaction impulse.
    pub impulse_radius: f32,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            gravity: GRAVITY,
            pic_flip_blend: DEFAULT_PIC_FLIP_BLEND,
            fluid_density: DEFAULT_FLUID_DENSITY,
            pressure_solver: PressureSolver::default(),
            impulse_radius: DEFAULT_IMPULSE_RADIUS,
        }
    }
}

/// Pipeline stages in execution order. A `step` call walks every variant
/// and ends back at `Idle`; between steps `phase` always reads `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Idle,
    Classify,
    TransferP2G,
    Extrapolate,
    ForcesAndBoundary,
    PressureSetup,
    PressureSolve,
    PressureUpdate,
    TransferG2P,
    Advect,
}

/// Per-step diagnostics, also emitted at debug log level.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepStats {
    /// Max fluid-cell divergence entering the pressure solve.
    pub divergence_before: f32,
    /// Max fluid-cell divergence after the pressure update.
    pub divergence_after: f32,
    /// Iterations spent by the pressure solver.
    pub solver_iterations: usize,
    /// Fluid cells whose Poisson row was empty (fully enclosed by solids).
    pub degenerate_cells: usize,
    /// Particles clamped back inside the walls during advection.
    pub wall_contacts: usize,
}

/// The simulation: grid, particles, and scratch buffers.
pub struct FlipSimulation {
    grid: Grid,
    particles: Vec<Particle>,
    buffers: TransferBuffers,
    config: SimConfig,
    phase: StepPhase,
    frame: u32,
}

impl FlipSimulation {
    /// Build the grid and seed the configured fluid region.
    pub fn new(config: SimConfig) -> Self {
        let grid = Grid::new(config.bounds_min, config.bounds_max, config.resolution);
        let buffers = TransferBuffers::new(&grid);
        let mut sim = Self {
            grid,
            particles: Vec::new(),
            buffers,
            config,
            phase: StepPhase::Idle,
            frame: 0,
        };
        sim.seed_particles();
        sim
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// `impulse` is applied for this step only. A failed pressure solve
    /// aborts the remaining stages and leaves the state readable; the next
    /// `step` or a `reset` may both be called afterwards.
    pub fn step(
        &mut self,
        dt: f32,
        impulse: Option<Impulse>,
        params: &StepParams,
    ) -> Result<StepStats, ConvergenceError> {
        let mut stats = StepStats::default();

        self.phase = StepPhase::Classify;
        self.classify_cells();

        self.phase = StepPhase::TransferP2G;
        transfer::particles_to_grid(&mut self.grid, &self.particles, &mut self.buffers);

        self.phase = StepPhase::Extrapolate;
        let passes = 2 * self.grid.dims().max_element() as usize;
        extrapolate::extrapolate_velocities(&mut self.grid, passes);
        // Snapshot here: the FLIP delta measures exactly what forces and
        // projection change below.
        self.grid.store_old_velocities();

        self.phase = StepPhase::ForcesAndBoundary;
        self.apply_body_force(params.gravity, dt);
        pressure::enforce_boundary_conditions(&mut self.grid);

        self.phase = StepPhase::PressureSetup;
        pressure::compute_divergence(&mut self.grid);
        stats.degenerate_cells =
            pressure::build_coefficients(&mut self.grid, dt, params.fluid_density);
        stats.divergence_before = pressure::max_fluid_divergence(&self.grid);

        self.phase = StepPhase::PressureSolve;
        stats.solver_iterations = match params.pressure_solver {
            PressureSolver::Jacobi { iterations } => {
                pressure::solve_pressure_jacobi(&mut self.grid, iterations);
                iterations
            }
            PressureSolver::Pcg {
                max_iterations,
                tolerance,
            } => match pressure::solve_pressure_pcg(&mut self.grid, max_iterations, tolerance) {
                Ok(iterations) => iterations,
                Err(err) => {
                    self.phase = StepPhase::Idle;
                    return Err(err);
                }
            },
        };

        self.phase = StepPhase::PressureUpdate;
        pressure::apply_pressure_gradient(&mut self.grid, dt, params.fluid_density);
        pressure::enforce_boundary_conditions(&mut self.grid);
        stats.divergence_after = pressure::max_fluid_divergence(&self.grid);

        self.phase = StepPhase::TransferG2P;
        transfer::grid_to_particles(&self.grid, &mut self.particles, params.pic_flip_blend);

        self.phase = StepPhase::Advect;
        if let Some(impulse) = impulse {
            advection::apply_impulse(&mut self.particles, impulse, params.impulse_radius);
        }
        advection::advect_particles(&mut self.particles, dt);
        stats.wall_contacts = advection::enforce_particle_bounds(&self.grid, &mut self.particles);

        self.phase = StepPhase::Idle;
        self.frame += 1;
        log::debug!(
            "frame {}: divergence {:.3e} -> {:.3e}, {} solver iterations, {} degenerate cells, {} wall contacts",
            self.frame,
            stats.divergence_before,
            stats.divergence_after,
            stats.solver_iterations,
            stats.degenerate_cells,
            stats.wall_contacts
        );
        Ok(stats)
    }

    /// Rebuild the initial state from the stored config. With an unchanged
    /// config this reproduces the post-construction state bit for bit;
    /// obstacles marked after construction are cleared as well.
    pub fn reset(&mut self) {
        self.grid.clear_velocities();
        self.grid.u_old.fill(0.0);
        self.grid.v_old.fill(0.0);
        self.grid.w_old.fill(0.0);
        self.grid.clear_solver_state();
        self.grid.cell_type.fill(CellType::Air);
        self.seed_particles();
        self.phase = StepPhase::Idle;
        self.frame = 0;
    }

    /// Read-only view of the particle buffer.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Read-only view of the grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current pipeline stage. Always `Idle` between steps.
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Steps completed since construction or the last `reset`.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Mark a cell as a fixed solid obstacle. Intended for scene setup
    /// before stepping begins.
    pub fn set_solid(&mut self, i: i32, j: i32, k: i32) {
        self.grid.set_solid(i, j, k);
    }

    /// Rebuild the cell classification from particle occupancy: non-solid
    /// cells reset to air, any cell holding a particle becomes fluid.
    fn classify_cells(&mut self) {
        self.grid.reset_cell_types();
        for p in &self.particles {
            let c = self.grid.containing_cell(p.position);
            let idx = self.grid.cell_index(c.x, c.y, c.z);
            if self.grid.cell_type[idx] != CellType::Solid {
                self.grid.cell_type[idx] = CellType::Fluid;
            }
        }
    }

    /// Accelerate every known face by the body force over `dt`.
    fn apply_body_force(&mut self, gravity: Vec3, dt: f32) {
        if gravity.x != 0.0 {
            for (vel, &known) in self.grid.u.iter_mut().zip(&self.grid.u_known) {
                if known {
                    *vel += gravity.x * dt;
                }
            }
        }
        if gravity.y != 0.0 {
            for (vel, &known) in self.grid.v.iter_mut().zip(&self.grid.v_known) {
                if known {
                    *vel += gravity.y * dt;
                }
            }
        }
        if gravity.z != 0.0 {
            for (vel, &known) in self.grid.w.iter_mut().zip(&self.grid.w_known) {
                if known {
                    *vel += gravity.z * dt;
                }
            }
        }
    }

    /// Fill the seed region, `particles_per_cell` per selected cell, with
    /// deterministic placement for a fixed seed.
    fn seed_particles(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let dims = self.grid.dims();
        self.particles.clear();

        for k in 0..dims.z {
            for j in 0..dims.y {
                for i in 0..dims.x {
                    let center = self.grid.cell_center(i, j, k);
                    if !inside_box(center, self.config.seed_min, self.config.seed_max) {
                        continue;
                    }
                    let corner = self.grid.cell_min_corner(i, j, k);
                    for _ in 0..self.config.particles_per_cell {
                        let jitter =
                            Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
                        let position = corner + jitter * self.grid.cell_size;
                        let velocity = SEED_VELOCITY_JITTER * random_in_unit_ball(&mut rng);
                        self.particles.push(Particle::new(position, velocity));
                    }
                }
            }
        }

        self.classify_cells();
        log::debug!("seeded {} particles", self.particles.len());
    }
}

#[inline]
fn inside_box(p: Vec3, min: Vec3, max: Vec3) -> bool {
    p.x >= min.x && p.x < max.x && p.y >= min.y && p.y < max.y && p.z >= min.z && p.z < max.z
}

fn random_in_unit_ball(rng: &mut StdRng) -> Vec3 {
    loop {
        let v = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()) * 2.0 - 1.0;
        if v.length_squared() <= 1.0 {
            return v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SimConfig {
        SimConfig {
            resolution: IVec3::splat(6),
            ..SimConfig::default()
        }
    }

    /// Config that seeds nothing: the seed box sits outside the domain.
    fn empty_config(resolution: i32) -> SimConfig {
        SimConfig {
            bounds_min: Vec3::ZERO,
            bounds_max: Vec3::splat(4.0),
            resolution: IVec3::splat(resolution),
            seed_min: Vec3::splat(100.0),
            seed_max: Vec3::splat(100.0),
            particles_per_cell: 1,
            seed: 0,
        }
    }

    #[test]
    fn test_default_config_seed_counts() {
        let sim = FlipSimulation::new(SimConfig::default());
        // A third of x, two thirds of y, full depth, 8 per cell.
        let fluid_cells = 8 * 16 * 24;
        assert_eq!(sim.particles().len(), fluid_cells * 8);
        let fluid = sim
            .grid()
            .cell_type
            .iter()
            .filter(|&&ct| ct == CellType::Fluid)
            .count();
        assert_eq!(fluid, fluid_cells);
    }

    #[test]
    fn test_seeding_is_deterministic() {
        let a = FlipSimulation::new(small_config());
        let b = FlipSimulation::new(small_config());
        assert_eq!(a.particles().len(), b.particles().len());
        for (pa, pb) in a.particles().iter().zip(b.particles()) {
            assert_eq!(pa.position, pb.position);
            assert_eq!(pa.velocity, pb.velocity);
        }
    }

    #[test]
    fn test_step_returns_to_idle() {
        let mut sim = FlipSimulation::new(small_config());
        assert_eq!(sim.phase(), StepPhase::Idle);
        assert_eq!(sim.frame(), 0);
        sim.step(0.02, None, &StepParams::default()).unwrap();
        assert_eq!(sim.phase(), StepPhase::Idle);
        assert_eq!(sim.frame(), 1);
    }

    #[test]
    fn test_reset_restores_initial_state_bit_for_bit() {
        let mut sim = FlipSimulation::new(small_config());
        let initial: Vec<Particle> = sim.particles().to_vec();

        let params = StepParams::default();
        for _ in 0..3 {
            sim.step(0.02, None, &params).unwrap();
        }
        assert_ne!(
            sim.particles()[0].position,
            initial[0].position,
            "particles should have moved before the reset"
        );

        sim.reset();
        assert_eq!(sim.frame(), 0);
        assert_eq!(sim.particles().len(), initial.len());
        for (p, q) in sim.particles().iter().zip(&initial) {
            assert_eq!(p.position, q.position);
            assert_eq!(p.velocity, q.velocity);
        }
        assert!(sim.grid().u.iter().all(|&x| x == 0.0));
        assert!(sim.grid().pressure.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_pure_pic_freefall_step_copies_grid_sample() {
        let mut sim = FlipSimulation::new(empty_config(4));
        sim.particles
            .push(Particle::new(sim.grid.cell_center(2, 2, 2), Vec3::ZERO));

        let params = StepParams {
            pic_flip_blend: 0.0,
            ..StepParams::default()
        };
        let dt = 0.02;
        let stats = sim.step(dt, None, &params).unwrap();

        // An isolated particle makes a zero-divergence cell: projection is
        // a no-op and the sampled velocity is exactly one gravity step.
        assert!(stats.divergence_before.abs() < 1e-6);
        let vel = sim.particles()[0].velocity;
        assert!(
            (vel.y - GRAVITY.y * dt).abs() < 1e-6,
            "expected {} got {}",
            GRAVITY.y * dt,
            vel.y
        );
        assert!(vel.x.abs() < 1e-6 && vel.z.abs() < 1e-6);
    }

    #[test]
    fn test_impulse_reaches_particles_in_radius() {
        let mut sim = FlipSimulation::new(small_config());
        let target = sim.particles()[0].position;
        let impulse = Impulse {
            position: target,
            velocity: Vec3::new(25.0, 0.0, 0.0),
        };
        let params = StepParams::default();
        sim.step(0.02, Some(impulse), &params).unwrap();
        let max_vx = sim
            .particles()
            .iter()
            .map(|p| p.velocity.x)
            .fold(f32::MIN, f32::max);
        assert!(
            max_vx > 1.0,
            "an impulse of 25 m/s should leave nearby particles moving, max vx {}",
            max_vx
        );
    }

    #[test]
    fn test_solid_obstacle_survives_reclassification() {
        let mut sim = FlipSimulation::new(empty_config(4));
        sim.set_solid(1, 1, 1);
        sim.step(0.02, None, &StepParams::default()).unwrap();
        assert_eq!(sim.grid().cell_type_at(1, 1, 1), CellType::Solid);
    }
}
