//! Thin device layer: shader compilation, textures, uniforms and passes.

pub mod driver;
pub mod headless;

use crate::config::DrawMode;
use crate::error::{Result, ShaderStage};
use crate::shader::{TexelData, TextureFormat};

pub use driver::{CompiledSet, ParticleDriver};
pub use headless::{DeviceCommand, HeadlessDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Sampler(TextureId),
}

/// What the driver needs from a graphics backend.
pub trait GpuDevice: Send + Sync + 'static {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId>;

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId>;

    fn delete_shader(&mut self, shader: ShaderId);

    fn delete_program(&mut self, program: ProgramId);

    fn create_texture(
        &mut self,
        resolution: u32,
        format: TextureFormat,
        data: &TexelData,
    ) -> Result<TextureId>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Names not declared by the program are ignored, as GL does.
    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue);

    /// Render a full-screen pass of `program` into `target`.
    fn run_update(&mut self, program: ProgramId, target: TextureId);

    fn draw_particles(&mut self, program: ProgramId, vertices: usize, mode: DrawMode);
}
