//! Ping-pong particle driver over a [`GpuDevice`].
//!
//! Owns the live program pair and the position textures. A tick runs one
//! update pass per dimension into the write set, then swaps.

use std::time::{Duration, Instant};

use bevy::log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{DrawMode, EncodingStrategy, SimulationParams};
use crate::error::{FlowError, Result, ShaderStage};
use crate::particles::{ParticleState, normalize};
use crate::shader::{ProgramSet, ProgramSource};

use super::{GpuDevice, ProgramId, TextureId, UniformValue};

/// A linked update/draw pair, not yet live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledSet {
    pub update: ProgramId,
    pub draw: ProgramId,
    pub dimensions: usize,
}

pub struct ParticleDriver<D: GpuDevice> {
    device: D,
    encoding: EncodingStrategy,
    state: Option<ParticleState>,
    /// Read/write pair per dimension, indexed by slot.
    textures: Vec<[TextureId; 2]>,
    live: Option<CompiledSet>,
    rng: StdRng,
}

impl<D: GpuDevice> ParticleDriver<D> {
    pub fn new(device: D, encoding: EncodingStrategy) -> Self {
        Self {
            device,
            encoding,
            state: None,
            textures: Vec::new(),
            live: None,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic seeding, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn encoding(&self) -> EncodingStrategy {
        self.encoding
    }

    pub fn live(&self) -> Option<CompiledSet> {
        self.live
    }

    pub fn state(&self) -> Option<&ParticleState> {
        self.state.as_ref()
    }

    pub fn textures(&self) -> &[[TextureId; 2]] {
        &self.textures
    }

    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId> {
        let vertex = self.device.compile_shader(ShaderStage::Vertex, &source.vertex)?;
        let fragment = match self.device.compile_shader(ShaderStage::Fragment, &source.fragment) {
            Ok(fragment) => fragment,
            Err(err) => {
                self.device.delete_shader(vertex);
                return Err(err);
            }
        };
        let linked = self.device.link_program(vertex, fragment);
        self.device.delete_shader(vertex);
        self.device.delete_shader(fragment);
        linked
    }

    /// Compile and link both programs. Nothing live changes; on failure every
    /// partial object is released.
    pub fn compile_set(&mut self, set: &ProgramSet, budget: Option<Duration>) -> Result<CompiledSet> {
        let started = Instant::now();
        let update = self.compile_program(&set.update)?;
        let draw = match self.compile_program(&set.draw) {
            Ok(draw) => draw,
            Err(err) => {
                self.device.delete_program(update);
                return Err(err);
            }
        };
        let compiled = CompiledSet {
            update,
            draw,
            dimensions: set.dimensions,
        };
        if let Some(budget) = budget {
            let elapsed = started.elapsed();
            if elapsed > budget {
                self.discard(compiled);
                return Err(FlowError::ShaderLink {
                    log: format!(
                        "compile and link took {}ms, over the {}ms budget",
                        elapsed.as_millis(),
                        budget.as_millis()
                    ),
                });
            }
        }
        Ok(compiled)
    }

    pub fn discard(&mut self, compiled: CompiledSet) {
        self.device.delete_program(compiled.update);
        self.device.delete_program(compiled.draw);
    }

    /// Make `compiled` live, releasing the previous pair. Textures are
    /// reallocated and reseeded when the dimension or particle count changed.
    pub fn swap_in(&mut self, compiled: CompiledSet, params: &SimulationParams) -> Result<()> {
        let reallocate = match &self.state {
            Some(state) => {
                state.dimensions() != compiled.dimensions
                    || state.requested() != params.particle_count
            }
            None => true,
        };
        if reallocate {
            self.allocate(compiled.dimensions, params)?;
        }
        if let Some(previous) = self.live.replace(compiled) {
            self.discard(previous);
        }
        Ok(())
    }

    /// Fresh textures for `dimensions` with a new seeding.
    pub fn allocate(&mut self, dimensions: usize, params: &SimulationParams) -> Result<()> {
        let state = ParticleState::new(params.particle_count, dimensions);
        let positions = state.seed(&params.viewport, &mut self.rng);
        let ages = vec![0.0_f32; state.capacity()];
        let format = self.encoding.texture_format();
        let mut created = Vec::with_capacity(dimensions * 2);
        for dim in 0..dimensions {
            let values: Vec<f32> = positions
                .iter()
                .map(|p| normalize(p[dim], dim, &params.viewport))
                .collect();
            let data = self
                .encoding
                .encode(&values, (dim == 0).then_some(ages.as_slice()));
            for _ in 0..2 {
                match self.device.create_texture(state.resolution(), format, &data) {
                    Ok(texture) => created.push(texture),
                    Err(err) => {
                        for texture in created {
                            self.device.delete_texture(texture);
                        }
                        return Err(err);
                    }
                }
            }
        }
        let textures: Vec<[TextureId; 2]> = created
            .chunks_exact(2)
            .map(|pair| [pair[0], pair[1]])
            .collect();
        debug!(
            "allocated {} particle texture pair(s) at {}x{}",
            dimensions,
            state.resolution(),
            state.resolution()
        );
        self.release_textures();
        self.textures = textures;
        self.state = Some(state);
        Ok(())
    }

    fn release_textures(&mut self) {
        for pair in std::mem::take(&mut self.textures) {
            for texture in pair {
                self.device.delete_texture(texture);
            }
        }
    }

    fn bind_common(&mut self, program: ProgramId, params: &SimulationParams, max_velocity: f32) {
        let resolution = self.state.as_ref().map_or(1, ParticleState::resolution);
        let t = params.transform_params;
        let uniforms = [
            ("u_min", UniformValue::Vec2(params.viewport.min)),
            ("u_max", UniformValue::Vec2(params.viewport.max)),
            ("u_particles_res", UniformValue::Float(resolution as f32)),
            ("u_max_velocity", UniformValue::Float(max_velocity)),
            ("u_alpha", UniformValue::Float(params.alpha)),
            ("u_transform_params", UniformValue::Vec4(t)),
        ];
        for (name, value) in uniforms {
            self.device.set_uniform(program, name, value);
        }
    }

    /// One update: a pass per dimension into the write set, then swap.
    /// Returns false when nothing is live yet.
    pub fn tick(&mut self, params: &SimulationParams, seed: f32, max_velocity: f32) -> bool {
        let (Some(live), Some(state)) = (self.live, self.state.as_ref()) else {
            return false;
        };
        let read = state.read_slot();
        let write = state.write_slot();
        self.bind_common(live.update, params, max_velocity);
        let scalars = [
            ("u_h", UniformValue::Float(params.step)),
            ("u_rand_seed", UniformValue::Float(seed)),
            ("u_drop_rate", UniformValue::Float(params.drop_rate)),
            ("u_drop_low_velocity", UniformValue::Bool(params.drop_low_velocity)),
            ("u_velocity_threshold", UniformValue::Float(params.velocity_threshold)),
        ];
        for (name, value) in scalars {
            self.device.set_uniform(live.update, name, value);
        }
        for (dim, pair) in self.textures.iter().enumerate() {
            self.device.set_uniform(
                live.update,
                &format!("u_pos_{dim}"),
                UniformValue::Sampler(pair[read]),
            );
        }
        for dim in 0..self.textures.len() {
            self.device
                .set_uniform(live.update, "u_out_coordinate", UniformValue::Int(dim as i32));
            self.device.run_update(live.update, self.textures[dim][write]);
        }
        if let Some(state) = self.state.as_mut() {
            state.swap();
        }
        true
    }

    /// Draw the live particles. Trails read the previous set from the write slot.
    pub fn draw(&mut self, params: &SimulationParams, mode: DrawMode, max_velocity: f32) -> bool {
        let (Some(live), Some(state)) = (self.live, self.state.as_ref()) else {
            return false;
        };
        let read = state.read_slot();
        let write = state.write_slot();
        let vertices = match mode {
            DrawMode::Points => state.capacity(),
            DrawMode::Trails => state.capacity() * 2,
        };
        self.bind_common(live.draw, params, max_velocity);
        self.device
            .set_uniform(live.draw, "u_point_size", UniformValue::Float(params.point_size));
        self.device
            .set_uniform(live.draw, "u_render_scale", UniformValue::Float(params.render_scale));
        for (dim, pair) in self.textures.iter().enumerate() {
            self.device
                .set_uniform(live.draw, &format!("u_pos_{dim}"), UniformValue::Sampler(pair[read]));
            if mode == DrawMode::Trails {
                self.device.set_uniform(
                    live.draw,
                    &format!("u_prev_pos_{dim}"),
                    UniformValue::Sampler(pair[write]),
                );
            }
        }
        self.device.draw_particles(live.draw, vertices, mode);
        true
    }
}

impl<D: GpuDevice> Drop for ParticleDriver<D> {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            self.discard(live);
        }
        self.release_textures();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{DeviceCommand, HeadlessDevice};

    const VERTEX: &str = "#version 300 es\nin vec2 a_position;\nvoid main() {\n    gl_Position = vec4(a_position, 0.0, 1.0);\n}\n";
    const FRAGMENT: &str = "#version 300 es\nprecision highp float;\nuniform sampler2D u_pos_0;\nuniform int u_out_coordinate;\nuniform float u_h;\nout vec4 out_value;\nvoid main() {\n    out_value = texelFetch(u_pos_0, ivec2(0), 0) * u_h;\n}\n";

    fn program_set() -> ProgramSet {
        let source = ProgramSource {
            vertex: VERTEX.to_string(),
            fragment: FRAGMENT.to_string(),
        };
        ProgramSet {
            update: source.clone(),
            draw: source,
            dimensions: 2,
        }
    }

    #[test]
    fn test_tick_writes_every_dimension_then_swaps() {
        let mut driver = ParticleDriver::new(HeadlessDevice::new(), EncodingStrategy::Float).with_seed(1);
        let params = SimulationParams::default().with_particle_count(10);
        assert!(!driver.tick(&params, 0.0, 1.0));

        let compiled = driver.compile_set(&program_set(), None).unwrap();
        driver.swap_in(compiled, &params).unwrap();
        assert_eq!(driver.device().texture_count(), 4);
        assert_eq!(driver.state().unwrap().resolution(), 4);

        let write = driver.textures()[1][1];
        assert!(driver.tick(&params, 0.5, 1.0));
        let commands = driver.device().commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[1],
            DeviceCommand::Update {
                program: compiled.update,
                target: write
            }
        );
        assert_eq!(
            driver.device().uniform(compiled.update, "u_out_coordinate"),
            Some(UniformValue::Int(1))
        );
        assert_eq!(driver.state().unwrap().read_slot(), 1);
    }

    #[test]
    fn test_swap_releases_previous_programs() {
        let mut driver = ParticleDriver::new(HeadlessDevice::new(), EncodingStrategy::Packed).with_seed(2);
        let params = SimulationParams::default().with_particle_count(4);
        let first = driver.compile_set(&program_set(), None).unwrap();
        driver.swap_in(first, &params).unwrap();
        let second = driver.compile_set(&program_set(), None).unwrap();
        driver.swap_in(second, &params).unwrap();
        assert_eq!(driver.device().program_count(), 2);
        assert_eq!(driver.live(), Some(second));
        assert_eq!(driver.device().shader_count(), 0);
    }

    #[test]
    fn test_budget_overrun_aborts() {
        let device = HeadlessDevice::new().with_link_delay(Duration::from_millis(5));
        let mut driver = ParticleDriver::new(device, EncodingStrategy::Float);
        let err = driver
            .compile_set(&program_set(), Some(Duration::from_millis(1)))
            .unwrap_err();
        assert_eq!(err.kind(), "shader-link-failure");
        assert_eq!(driver.device().program_count(), 0);
    }

    #[test]
    fn test_draw_counts_trail_vertices() {
        let mut driver = ParticleDriver::new(HeadlessDevice::new(), EncodingStrategy::Float).with_seed(3);
        let params = SimulationParams::default().with_particle_count(9);
        let compiled = driver.compile_set(&program_set(), None).unwrap();
        driver.swap_in(compiled, &params).unwrap();
        assert!(driver.draw(&params, DrawMode::Trails, 1.0));
        assert_eq!(
            driver.device().commands().last(),
            Some(&DeviceCommand::Draw {
                program: compiled.draw,
                vertices: 18,
                mode: DrawMode::Trails
            })
        );
    }
}
