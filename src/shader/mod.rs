//! GLSL ES 3.00 program assembly for the update and draw passes.

pub mod assembly;
pub mod draw;
pub mod encoding;

pub use assembly::{ProgramSource, SCALAR_UNIFORMS, ShaderInputs, update_program, velocity_block};
pub use draw::{ColorStop, DrawOptions, Gradient, ScreenMapper, draw_program};
pub use encoding::{TexelData, TextureFormat};

/// The update and draw programs produced by one recompile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSet {
    pub update: ProgramSource,
    pub draw: ProgramSource,
    pub dimensions: usize,
}
