use bevy::log::warn;
use bevy::prelude::*;

pub mod cas;
pub mod config;
pub mod coords;
pub mod domain;
pub mod engine;
pub mod error;
pub mod expr;
pub mod field;
pub mod gpu;
pub mod integrators;
pub mod jacobian;
pub mod math;
pub mod notebook;
pub mod particles;
pub mod presets;
pub mod probe;
pub mod shader;

// Public re-exports for clean API
pub use config::{DrawMode, EncodingStrategy, EngineConfig, SimulationParams, Viewport};
pub use coords::CoordinateSystem;
pub use domain::DomainTransform;
pub use engine::Engine;
pub use error::{FlowError, IndexedError, Result};
pub use field::{ColorMode, FieldRequest};
pub use gpu::{GpuDevice, HeadlessDevice};
pub use integrators::Integrator;
pub use notebook::{CellId, CellKind, Notebook};

/// Runs an [`Engine`] on a [`HeadlessDevice`], ticking on the fixed timestep.
#[derive(Default)]
pub struct FlowFieldPlugin {
    pub config: EngineConfig,
    pub params: SimulationParams,
    /// Name of a built-in scene to load at startup.
    pub preset: Option<&'static str>,
}

impl FlowFieldPlugin {
    pub fn with_preset(preset: &'static str) -> Self {
        Self {
            preset: Some(preset),
            ..Default::default()
        }
    }
}

impl Plugin for FlowFieldPlugin {
    fn build(&self, app: &mut App) {
        let mut engine = Engine::new(HeadlessDevice::new(), self.config.clone(), self.params.clone());
        if let Some(name) = self.preset {
            if let Err(error) = presets::by_name(name).and_then(|preset| engine.load_preset(&preset)) {
                warn!("Preset {} failed to load: {}", name, error);
            }
        }
        app.insert_resource(engine)
            .add_systems(FixedUpdate, (advance_particles, draw_particles).chain());
    }
}

fn advance_particles(mut engine: ResMut<Engine<HeadlessDevice>>) {
    let seed = rand::random::<f32>();
    let step = engine.params().step;
    let viewport = engine.params().viewport;
    engine.tick(step, seed, viewport, None);
}

fn draw_particles(mut engine: ResMut<Engine<HeadlessDevice>>) {
    engine.draw();
    // The headless device only records; keep the log from growing.
    engine.device_mut().clear_commands();
}
