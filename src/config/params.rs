use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::constants::*;

/// Visible rectangle of world space for dimensions 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            min: [-5.0, -5.0],
            max: [5.0, 5.0],
        }
    }
}

impl Viewport {
    pub fn new(min: [f32; 2], max: [f32; 2]) -> Self {
        Self { min, max }
    }

    /// Square viewport of half-width `extent` around the origin.
    pub fn centered(extent: f32) -> Self {
        Self::new([-extent, -extent], [extent, extent])
    }

    pub fn size(&self) -> [f32; 2] {
        [self.max[0] - self.min[0], self.max[1] - self.min[1]]
    }

    /// World range of dimension `dim`.
    pub fn range(&self, dim: usize) -> (f32, f32) {
        match dim {
            0 | 1 => (self.min[dim], self.max[dim]),
            _ => (HIGHER_DIM_MIN, HIGHER_DIM_MAX),
        }
    }

    /// Whether `point` lies inside the viewport grown by `margin` of its size.
    pub fn contains_with_margin(&self, point: [f32; 2], margin: f32) -> bool {
        let size = self.size();
        (0..2).all(|axis| {
            let pad = size[axis] * margin;
            point[axis] >= self.min[axis] - pad && point[axis] <= self.max[axis] + pad
        })
    }
}

/// Per-frame simulation parameters bound as uniforms.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Integration step `h`.
    pub step: f32,
    /// Probability per tick that a particle respawns.
    pub drop_rate: f32,
    pub particle_count: usize,
    pub viewport: Viewport,
    /// Speed below which a particle counts as stuck.
    pub velocity_threshold: f32,
    pub drop_low_velocity: bool,
    pub render_scale: f32,
    pub point_size: f32,
    pub alpha: f32,
    /// Free parameters of the active domain transform.
    pub transform_params: [f32; 4],
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            drop_rate: DEFAULT_DROP_RATE,
            particle_count: DEFAULT_PARTICLE_COUNT,
            viewport: Viewport::default(),
            velocity_threshold: DEFAULT_VELOCITY_THRESHOLD,
            drop_low_velocity: false,
            render_scale: 1.0,
            point_size: 1.0,
            alpha: 1.0,
            transform_params: [1.0, 1.0, 0.0, 0.0],
        }
    }
}

impl SimulationParams {
    pub fn with_step(mut self, step: f32) -> Self {
        self.step = step;
        self
    }

    pub fn with_drop_rate(mut self, drop_rate: f32) -> Self {
        self.drop_rate = drop_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_particle_count(mut self, count: usize) -> Self {
        self.particle_count = count.max(1);
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Enable low-activity respawn below `threshold`.
    pub fn with_low_velocity_drop(mut self, threshold: f32) -> Self {
        self.drop_low_velocity = true;
        self.velocity_threshold = threshold;
        self
    }

    pub fn with_transform_params(mut self, params: [f32; 4]) -> Self {
        self.transform_params = params;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }
}

/// Which symbolic backend the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CasBackend {
    /// Cache clears keep user definitions installed.
    #[default]
    Separating,
    /// Cache clears wipe user definitions; the notebook replays them.
    Volatile,
}

/// How particle coordinates are stored in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncodingStrategy {
    /// One float in the red channel.
    #[default]
    Float,
    /// Normalized value packed across the RGB bytes.
    Packed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrawMode {
    #[default]
    Points,
    /// Segments from the previous position to the current one.
    Trails,
}

/// Engine-wide settings chosen at construction.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub cas_backend: CasBackend,
    pub encoding: EncodingStrategy,
    pub draw_mode: DrawMode,
    /// Upper bound on program compile + link time, in milliseconds.
    pub link_budget_ms: Option<u64>,
    pub inversion_node_threshold: usize,
    /// Run the differentiation self-consistency check on construction.
    pub warm_up_check: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cas_backend: CasBackend::default(),
            encoding: EncodingStrategy::default(),
            draw_mode: DrawMode::default(),
            link_budget_ms: None,
            inversion_node_threshold: INVERSION_NODE_THRESHOLD,
            warm_up_check: true,
        }
    }
}

impl EngineConfig {
    pub fn with_cas_backend(mut self, backend: CasBackend) -> Self {
        self.cas_backend = backend;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingStrategy) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_draw_mode(mut self, draw_mode: DrawMode) -> Self {
        self.draw_mode = draw_mode;
        self
    }

    pub fn with_link_budget_ms(mut self, budget: u64) -> Self {
        self.link_budget_ms = Some(budget);
        self
    }

    pub fn with_inversion_threshold(mut self, threshold: usize) -> Self {
        self.inversion_node_threshold = threshold;
        self
    }

    pub fn without_warm_up_check(mut self) -> Self {
        self.warm_up_check = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_ranges_and_margin() {
        let viewport = Viewport::centered(2.0);
        assert_eq!(viewport.range(1), (-2.0, 2.0));
        assert_eq!(viewport.range(3), (HIGHER_DIM_MIN, HIGHER_DIM_MAX));
        assert!(viewport.contains_with_margin([2.7, 0.0], ESCAPE_MARGIN));
        assert!(!viewport.contains_with_margin([2.9, 0.0], ESCAPE_MARGIN));
    }

    #[test]
    fn test_params_serialize() {
        let params = SimulationParams::default().with_step(0.05).with_drop_rate(3.0);
        assert_eq!(params.drop_rate, 1.0);
        let json = serde_json::to_string(&params).unwrap();
        let back: SimulationParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
