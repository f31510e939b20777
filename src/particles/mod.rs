//! Particle state
//!
//! Particles live in `R × R` textures, one pair per dimension, with
//! `R = ⌈√P⌉`. Every slot is a live particle. The read and write sets swap
//! after each update. The functions below mirror the respawn rules of the
//! update shader for the CPU reference simulation.

use rand::Rng;

use crate::config::{
    AGE_INCREMENT, ESCAPE_MARGIN, RESPAWN_HIGHER_DIM_MAX, RESPAWN_HIGHER_DIM_MIN, SPAWN_MARGIN,
    Viewport,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    requested: usize,
    resolution: u32,
    dimensions: usize,
    read: usize,
    epoch: u64,
}

/// Smallest square side holding `count` particles.
pub fn resolution_for(count: usize) -> u32 {
    let mut side = (count as f64).sqrt().ceil() as u32;
    while (side as usize) * (side as usize) < count {
        side += 1;
    }
    side.max(1)
}

impl ParticleState {
    pub fn new(count: usize, dimensions: usize) -> Self {
        Self {
            requested: count,
            resolution: resolution_for(count),
            dimensions,
            read: 0,
            epoch: 0,
        }
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Number of live particles, `R²`.
    pub fn capacity(&self) -> usize {
        (self.resolution as usize).pow(2)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn read_slot(&self) -> usize {
        self.read
    }

    pub fn write_slot(&self) -> usize {
        1 - self.read
    }

    /// Frame epoch, advanced once per completed update.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Swap read and write sets after a full update.
    pub fn swap(&mut self) {
        self.read = self.write_slot();
        self.epoch += 1;
    }

    /// Initial world positions, uniformly inside the viewport grown by the
    /// spawn margin. Ages start at zero.
    pub fn seed(&self, viewport: &Viewport, rng: &mut impl Rng) -> Vec<Vec<f64>> {
        (0..self.capacity())
            .map(|_| respawn_position(self.dimensions, viewport, rng))
            .collect()
    }
}

/// World value of a normalized texel value in dimension `dim`.
pub fn denormalize(value: f32, dim: usize, viewport: &Viewport) -> f64 {
    let (lo, hi) = viewport.range(dim);
    lo as f64 + (hi as f64 - lo as f64) * value as f64
}

pub fn normalize(value: f64, dim: usize, viewport: &Viewport) -> f32 {
    let (lo, hi) = viewport.range(dim);
    ((value - lo as f64) / (hi as f64 - lo as f64)) as f32
}

/// Outside the viewport grown by the escape margin, or not finite.
pub fn escaped(point: &[f64], viewport: &Viewport) -> bool {
    if point.iter().any(|v| !v.is_finite()) {
        return true;
    }
    let size = viewport.size();
    point.iter().take(2).enumerate().any(|(axis, value)| {
        let pad = (size[axis] * ESCAPE_MARGIN) as f64;
        *value < viewport.min[axis] as f64 - pad || *value > viewport.max[axis] as f64 + pad
    })
}

/// Velocity below the threshold while low-activity dropping is on.
pub fn stuck(speed: f64, drop_low_velocity: bool, threshold: f32) -> bool {
    drop_low_velocity && speed < threshold as f64
}

pub fn lottery(rng: &mut impl Rng, drop_rate: f32) -> bool {
    rng.random::<f32>() < drop_rate
}

/// A fresh position: in the viewport with the spawn margin for the first two
/// dimensions, the respawn range for the rest.
pub fn respawn_position(dimensions: usize, viewport: &Viewport, rng: &mut impl Rng) -> Vec<f64> {
    let size = viewport.size();
    (0..dimensions)
        .map(|dim| {
            let (lo, hi) = if dim < 2 {
                let pad = size[dim] * SPAWN_MARGIN;
                (viewport.min[dim] - pad, viewport.max[dim] + pad)
            } else {
                (RESPAWN_HIGHER_DIM_MIN, RESPAWN_HIGHER_DIM_MAX)
            };
            rng.random_range(lo as f64..hi as f64)
        })
        .collect()
}

pub fn next_age(age: f32) -> f32 {
    (age + AGE_INCREMENT).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_resolution_is_smallest_square() {
        assert_eq!(resolution_for(1), 1);
        assert_eq!(resolution_for(10_000), 100);
        assert_eq!(resolution_for(10_001), 101);
        assert_eq!(ParticleState::new(5, 2).capacity(), 9);
    }

    #[test]
    fn test_ping_pong() {
        let mut state = ParticleState::new(4, 2);
        assert_eq!((state.read_slot(), state.write_slot()), (0, 1));
        state.swap();
        assert_eq!((state.read_slot(), state.write_slot()), (1, 0));
        state.swap();
        assert_eq!(state.read_slot(), 0);
        assert_eq!(state.epoch(), 2);
    }

    #[test]
    fn test_seeding_respects_margins() {
        let viewport = Viewport::centered(1.0);
        let state = ParticleState::new(400, 3);
        let mut rng = StdRng::seed_from_u64(7);
        for p in state.seed(&viewport, &mut rng) {
            assert!(p[0] >= -1.04 && p[0] <= 1.04);
            assert!(p[2] >= -10.4 && p[2] <= 10.8);
            assert!(!escaped(&p, &viewport));
        }
    }

    #[test]
    fn test_predicates() {
        let viewport = Viewport::centered(1.0);
        assert!(!escaped(&[1.3, 0.0], &viewport));
        assert!(escaped(&[1.5, 0.0], &viewport));
        assert!(escaped(&[f64::NAN, 0.0], &viewport));
        assert!(!escaped(&[0.0, 0.0, 50.0], &viewport));
        assert!(stuck(1e-6, true, 1e-4));
        assert!(!stuck(1e-6, false, 1e-4));
        assert_eq!(next_age(0.0), 0.5);
        assert_eq!(next_age(0.75), 1.0);
        let value = normalize(2.5, 0, &viewport);
        assert!((denormalize(value, 0, &viewport) - 2.5).abs() < 1e-6);
    }
}
