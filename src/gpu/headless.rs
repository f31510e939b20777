//! A device that validates and records instead of rendering.
//!
//! Compilation checks what the emitted programs must get right: the version
//! line, balanced delimiters, a `main`, declared uniforms, defined user
//! functions and, at link time, matching varyings. Passes are recorded so
//! tests can assert on what was dispatched.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::thread;
use std::time::Duration;

use crate::config::DrawMode;
use crate::error::{FlowError, Result, ShaderStage, numbered_source};
use crate::shader::{TexelData, TextureFormat};

use super::{GpuDevice, ProgramId, ShaderId, TextureId, UniformValue};

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Update { program: ProgramId, target: TextureId },
    Draw { program: ProgramId, vertices: usize, mode: DrawMode },
}

#[derive(Debug, Clone)]
struct CompiledShader {
    stage: ShaderStage,
    uniforms: BTreeMap<String, String>,
    inputs: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct LinkedProgram {
    uniforms: BTreeMap<String, String>,
    values: HashMap<String, UniformValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub resolution: u32,
    pub format: TextureFormat,
}

#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_id: u32,
    shaders: HashMap<ShaderId, CompiledShader>,
    programs: HashMap<ProgramId, LinkedProgram>,
    textures: HashMap<TextureId, TextureInfo>,
    commands: Vec<DeviceCommand>,
    ignored_uniforms: BTreeSet<String>,
    fail_next_compile: Option<String>,
    link_delay: Option<Duration>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every link sleeps for `delay`, to exercise link budgets.
    pub fn with_link_delay(mut self, delay: Duration) -> Self {
        self.link_delay = Some(delay);
        self
    }

    /// Make the next compile fail with `log`.
    pub fn fail_next_compile(&mut self, log: impl Into<String>) {
        self.fail_next_compile = Some(log.into());
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn texture(&self, id: TextureId) -> Option<TextureInfo> {
        self.textures.get(&id).copied()
    }

    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        self.programs.get(&program)?.values.get(name).copied()
    }

    /// Uniform names that were set but not declared by the target program.
    pub fn ignored_uniforms(&self) -> &BTreeSet<String> {
        &self.ignored_uniforms
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

fn compile_error(stage: ShaderStage, source: &str, log: String) -> FlowError {
    FlowError::ShaderCompile {
        stage,
        log,
        listing: numbered_source(source),
    }
}

/// `<keyword> <type> <name>;` declarations at the start of a line.
fn declarations(source: &str, keyword: &str) -> BTreeMap<String, String> {
    source
        .lines()
        .filter_map(|line| {
            let mut words = line.trim().split_whitespace();
            if words.next()? != keyword {
                return None;
            }
            let ty = words.next()?;
            let name = words.next()?.trim_end_matches(';');
            Some((name.to_string(), ty.to_string()))
        })
        .collect()
}

fn identifiers(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source.lines().enumerate().flat_map(|(line, text)| {
        text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|token| !token.is_empty())
            .map(move |token| (line + 1, token))
    })
}

fn check_balanced(source: &str) -> std::result::Result<(), String> {
    for (open, close) in [('(', ')'), ('{', '}'), ('[', ']')] {
        let mut depth: i64 = 0;
        for (line, text) in source.lines().enumerate() {
            for c in text.chars() {
                if c == open {
                    depth += 1;
                } else if c == close {
                    depth -= 1;
                }
                if depth < 0 {
                    return Err(format!("ERROR: 0:{}: unexpected '{}'", line + 1, close));
                }
            }
        }
        if depth != 0 {
            return Err(format!("ERROR: unbalanced '{open}{close}'"));
        }
    }
    Ok(())
}

fn validate(stage: ShaderStage, source: &str) -> std::result::Result<CompiledShader, String> {
    if source.lines().next().map(str::trim) != Some("#version 300 es") {
        return Err("ERROR: 0:1: '#version 300 es' must be the first line".to_string());
    }
    check_balanced(source)?;
    if !source.contains("void main()") {
        return Err("ERROR: missing 'void main()'".to_string());
    }

    let uniforms = declarations(source, "uniform");
    let inputs = declarations(source, "in");
    let outputs = declarations(source, "out");
    if stage == ShaderStage::Fragment && !outputs.values().any(|ty| ty == "vec4") {
        return Err("ERROR: fragment shader declares no vec4 output".to_string());
    }

    for (line, token) in identifiers(source) {
        if token.starts_with("u_") && !uniforms.contains_key(token) {
            return Err(format!("ERROR: 0:{line}: '{token}' : undeclared identifier"));
        }
        if token.starts_with("uf_") && !source.contains(&format!("float {token}(")) {
            return Err(format!("ERROR: 0:{line}: '{token}' : no matching function"));
        }
    }
    Ok(CompiledShader {
        stage,
        uniforms,
        inputs,
        outputs,
    })
}

impl GpuDevice for HeadlessDevice {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId> {
        if let Some(log) = self.fail_next_compile.take() {
            return Err(compile_error(stage, source, log));
        }
        let shader = validate(stage, source).map_err(|log| compile_error(stage, source, log))?;
        let id = ShaderId(self.next());
        self.shaders.insert(id, shader);
        Ok(id)
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId> {
        if let Some(delay) = self.link_delay {
            thread::sleep(delay);
        }
        let (Some(vs), Some(fs)) = (self.shaders.get(&vertex), self.shaders.get(&fragment)) else {
            return Err(FlowError::ShaderLink {
                log: "unknown shader handle".to_string(),
            });
        };
        if vs.stage != ShaderStage::Vertex || fs.stage != ShaderStage::Fragment {
            return Err(FlowError::ShaderLink {
                log: "expected a vertex and a fragment shader".to_string(),
            });
        }
        for (name, ty) in &fs.inputs {
            match vs.outputs.get(name) {
                Some(out_ty) if out_ty == ty => {}
                Some(out_ty) => {
                    return Err(FlowError::ShaderLink {
                        log: format!("varying '{name}' is {out_ty} in the vertex stage and {ty} in the fragment stage"),
                    });
                }
                None => {
                    return Err(FlowError::ShaderLink {
                        log: format!("fragment input '{name}' is not written by the vertex stage"),
                    });
                }
            }
        }
        let mut uniforms = vs.uniforms.clone();
        for (name, ty) in &fs.uniforms {
            if let Some(existing) = uniforms.get(name) {
                if existing != ty {
                    return Err(FlowError::ShaderLink {
                        log: format!("uniform '{name}' declared as {existing} and {ty}"),
                    });
                }
            }
            uniforms.insert(name.clone(), ty.clone());
        }
        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            LinkedProgram {
                uniforms,
                values: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_texture(
        &mut self,
        resolution: u32,
        format: TextureFormat,
        data: &TexelData,
    ) -> Result<TextureId> {
        let expected = (resolution as usize).pow(2);
        let matches_format = matches!(
            (format, data),
            (TextureFormat::Rgba32F, TexelData::Float(_)) | (TextureFormat::Rgba8, TexelData::Bytes(_))
        );
        if data.len() != expected || !matches_format {
            return Err(FlowError::application(format!(
                "texture data does not match a {resolution}x{resolution} {format:?} texture"
            )));
        }
        let id = TextureId(self.next());
        self.textures.insert(id, TextureInfo { resolution, format });
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue) {
        match self.programs.get_mut(&program) {
            Some(linked) if linked.uniforms.contains_key(name) => {
                linked.values.insert(name.to_string(), value);
            }
            _ => {
                self.ignored_uniforms.insert(name.to_string());
            }
        }
    }

    fn run_update(&mut self, program: ProgramId, target: TextureId) {
        self.commands.push(DeviceCommand::Update { program, target });
    }

    fn draw_particles(&mut self, program: ProgramId, vertices: usize, mode: DrawMode) {
        self.commands.push(DeviceCommand::Draw {
            program,
            vertices,
            mode,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "#version 300 es\nuniform float u_scale;\nout vec4 v_color;\nvoid main() {\n    v_color = vec4(u_scale);\n}\n";
    const FRAGMENT: &str = "#version 300 es\nprecision highp float;\nin vec4 v_color;\nout vec4 frag_color;\nvoid main() {\n    frag_color = v_color;\n}\n";

    #[test]
    fn test_compile_and_link() {
        let mut device = HeadlessDevice::new();
        let vs = device.compile_shader(ShaderStage::Vertex, VERTEX).unwrap();
        let fs = device.compile_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        let program = device.link_program(vs, fs).unwrap();
        device.set_uniform(program, "u_scale", UniformValue::Float(2.0));
        device.set_uniform(program, "u_missing", UniformValue::Float(1.0));
        assert_eq!(device.uniform(program, "u_scale"), Some(UniformValue::Float(2.0)));
        assert!(device.ignored_uniforms().contains("u_missing"));
    }

    #[test]
    fn test_compile_errors() {
        let mut device = HeadlessDevice::new();
        let undeclared = VERTEX.replace("uniform float u_scale;\n", "");
        let err = device.compile_shader(ShaderStage::Vertex, &undeclared).unwrap_err();
        match err {
            FlowError::ShaderCompile { stage, log, listing } => {
                assert_eq!(stage, ShaderStage::Vertex);
                assert!(log.contains("'u_scale' : undeclared identifier"));
                assert!(listing.starts_with("   1: #version 300 es"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let unbalanced = FRAGMENT.replace("frag_color = v_color;\n}", "frag_color = v_color;\n");
        assert!(device.compile_shader(ShaderStage::Fragment, &unbalanced).is_err());
        let missing_fn = FRAGMENT.replace("frag_color = v_color;", "frag_color = vec4(uf_g(1.0));");
        assert!(device.compile_shader(ShaderStage::Fragment, &missing_fn).is_err());
        device.fail_next_compile("driver says no");
        assert!(device.compile_shader(ShaderStage::Vertex, VERTEX).is_err());
        assert!(device.compile_shader(ShaderStage::Vertex, VERTEX).is_ok());
    }

    #[test]
    fn test_link_checks_varyings() {
        let mut device = HeadlessDevice::new();
        let vs = device
            .compile_shader(ShaderStage::Vertex, &VERTEX.replace("v_color", "v_other"))
            .unwrap();
        let fs = device.compile_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        let err = device.link_program(vs, fs).unwrap_err();
        assert_eq!(err.kind(), "shader-link-failure");
    }
}
