//! Numeric constants shared by the host and the emitted shaders.

// Expression lowering
/// Largest integer exponent expanded into repeated multiplication.
pub const MAX_EXPANDED_POWER: u32 = 4;

// Dimensions
pub const MAX_DIMENSIONS: usize = 6;
/// Implicit integrators need a symbolic matrix inverse, which is capped at 4x4.
pub const MAX_IMPLICIT_DIMENSIONS: usize = 4;

// Particle lifecycle
/// Particles further than this fraction of the viewport outside it respawn.
pub const ESCAPE_MARGIN: f32 = 0.2;
/// Respawned particles land up to this fraction outside the viewport.
pub const SPAWN_MARGIN: f32 = 0.02;
/// World range of dimensions 2 and above.
pub const HIGHER_DIM_MIN: f32 = -10.0;
pub const HIGHER_DIM_MAX: f32 = 10.0;
/// Respawn range of dimensions 2 and above.
pub const RESPAWN_HIGHER_DIM_MIN: f32 = -10.4;
pub const RESPAWN_HIGHER_DIM_MAX: f32 = 10.8;
pub const AGE_INCREMENT: f32 = 0.5;

// Implicit integration
pub const NEWTON_MAX_ITERATIONS: u32 = 8;
pub const NEWTON_TOLERANCE: f64 = 1e-5;
/// Newton steps used to invert the sine domain warp.
pub const SINE_INVERSE_ITERATIONS: u32 = 5;
/// Total node count of a symbolic inverse above which the shader inverts numerically.
pub const INVERSION_NODE_THRESHOLD: usize = 2000;
/// Central-difference step for Jacobians of wrapped velocity functions.
pub const JACOBIAN_FD_STEP: f64 = 1e-3;

// Packed encoding
/// Bits of precision kept by the packed RGB encoding.
pub const PACKED_BITS: u32 = 24;

// Velocity probe
pub const VELOCITY_PROBE_SAMPLES: usize = 24;

// Self-consistency fixture for the CAS warm-up check.
pub const SELF_CHECK_FIXTURE: &str = "x^3*sin(y) + atan2(y, x)*exp(x*y)";

// Persistence
pub const NOTEBOOK_RECORD_VERSION: u32 = 1;

// Defaults
pub const DEFAULT_PARTICLE_COUNT: usize = 10_000;
pub const DEFAULT_STEP: f32 = 0.01;
pub const DEFAULT_DROP_RATE: f32 = 0.003;
pub const DEFAULT_VELOCITY_THRESHOLD: f32 = 1e-4;
