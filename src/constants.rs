//! Simulation defaults shared across modules.

use glam::Vec3;

/// Gravitational acceleration (m/s^2).
pub const GRAVITY: Vec3 = Vec3::new(0.0, -9.8, 0.0);

/// Default PIC/FLIP blend. 0 is pure PIC, 1 is pure FLIP.
pub const DEFAULT_PIC_FLIP_BLEND: f32 = 0.95;

/// Default Jacobi relaxation budget per step.
pub const DEFAULT_JACOBI_ITERATIONS: usize = 40;

/// Default conjugate-gradient iteration cap.
pub const DEFAULT_PCG_MAX_ITERATIONS: usize = 200;

/// Default conjugate-gradient residual tolerance (max norm).
pub const DEFAULT_PCG_TOLERANCE: f32 = 1e-4;

/// Default fluid density (kg/m^3, water normalized to 1).
pub const DEFAULT_FLUID_DENSITY: f32 = 1.0;

/// Default radius of the interaction impulse, in world units.
pub const DEFAULT_IMPULSE_RADIUS: f32 = 0.25;

/// Default grid resolution per axis.
pub const DEFAULT_RESOLUTION: i32 = 24;

/// Default particle count seeded per fluid cell.
pub const DEFAULT_PARTICLES_PER_CELL: usize = 8;

/// RGBA color assigned to seeded particles. Render-only state.
pub const PARTICLE_COLOR: [f32; 4] = [0.32, 0.57, 0.79, 1.0];

/// Radius of the random velocity jitter applied at seeding.
pub const SEED_VELOCITY_JITTER: f32 = 1e-3;

/// Velocity magnitude cap applied after grid-to-particle transfer.
pub const MAX_PARTICLE_SPEED: f32 = 100.0;

/// Weights below this are treated as zero during transfer normalization.
pub const MIN_TRANSFER_WEIGHT: f32 = 1e-10;
