//! Draw program: places particles on screen and colors them.

use serde::{Deserialize, Serialize};

use crate::config::DrawMode;
use crate::error::{FlowError, Result};

use super::assembly::{
    GLSL_HEADER, ProgramSource, ShaderInputs, glsl_float32, position_samplers, previous_samplers,
    velocity_block,
};

const DRAW_FRAGMENT: &str = "#version 300 es
precision highp float;

in vec4 v_color;
in float v_speed;
out vec4 frag_color;

void main() {
    frag_color = v_color;
}
";

pub const DRAW_UNIFORMS: [(&str, &str); 8] = [
    ("vec2", "u_min"),
    ("vec2", "u_max"),
    ("float", "u_particles_res"),
    ("float", "u_max_velocity"),
    ("float", "u_alpha"),
    ("vec4", "u_transform_params"),
    ("float", "u_point_size"),
    ("float", "u_render_scale"),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub position: f32,
    pub color: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GradientRecord")]
pub struct Gradient {
    stops: Vec<ColorStop>,
}

/// Unchecked serialized form; deserialization goes through [`Gradient::new`].
#[derive(Deserialize)]
struct GradientRecord {
    stops: Vec<ColorStop>,
}

impl TryFrom<GradientRecord> for Gradient {
    type Error = FlowError;

    fn try_from(record: GradientRecord) -> Result<Self> {
        Gradient::new(record.stops)
    }
}

impl Default for Gradient {
    fn default() -> Self {
        Self {
            stops: vec![
                ColorStop { position: 0.0, color: [0.27, 0.00, 0.33] },
                ColorStop { position: 0.33, color: [0.19, 0.41, 0.56] },
                ColorStop { position: 0.66, color: [0.21, 0.72, 0.47] },
                ColorStop { position: 1.0, color: [0.99, 0.91, 0.15] },
            ],
        }
    }
}

impl Gradient {
    /// Stops are sorted by position. At least one is required.
    pub fn new(mut stops: Vec<ColorStop>) -> Result<Self> {
        if stops.is_empty() {
            return Err(FlowError::application("a gradient needs at least one color stop"));
        }
        stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        Ok(Self { stops })
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// CPU evaluation, matching the emitted `gradient`.
    pub fn sample(&self, t: f32) -> [f32; 3] {
        let t = t.clamp(0.0, 1.0);
        let mut color = self.stops[0].color;
        for pair in self.stops.windows(2) {
            let span = pair[1].position - pair[0].position;
            let weight = if span > 0.0 {
                ((t - pair[0].position) / span).clamp(0.0, 1.0)
            } else if t >= pair[1].position {
                1.0
            } else {
                0.0
            };
            for channel in 0..3 {
                color[channel] += (pair[1].color[channel] - color[channel]) * weight;
            }
        }
        color
    }

    pub fn glsl(&self) -> Result<String> {
        let vec3 = |c: [f32; 3]| -> Result<String> {
            Ok(format!(
                "vec3({}, {}, {})",
                glsl_float32(c[0])?,
                glsl_float32(c[1])?,
                glsl_float32(c[2])?
            ))
        };
        let mut out = format!(
            "vec3 gradient(float t) {{\n    t = clamp(t, 0.0, 1.0);\n    vec3 c = {};\n",
            vec3(self.stops[0].color)?
        );
        for pair in self.stops.windows(2) {
            let lo = glsl_float32(pair[0].position)?;
            let span = glsl_float32((pair[1].position - pair[0].position).max(1e-6))?;
            out.push_str(&format!(
                "    c = mix(c, {}, clamp((t - {lo}) / {span}, 0.0, 1.0));\n",
                vec3(pair[1].color)?
            ));
        }
        out.push_str("    return c;\n}\n");
        Ok(out)
    }
}

/// Projection of a particle state onto the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenMapper {
    /// Two chosen dimensions against the viewport.
    Planar { horizontal: usize, vertical: usize },
    /// Isometric view of the first three dimensions.
    Isometric,
}

impl Default for ScreenMapper {
    fn default() -> Self {
        ScreenMapper::Planar {
            horizontal: 0,
            vertical: 1,
        }
    }
}

impl ScreenMapper {
    pub fn glsl(&self, vars: &[String]) -> String {
        let component = |dim: usize| {
            vars.get(dim)
                .map(|var| format!("p.{var}"))
                .unwrap_or_else(|| "0.0".to_string())
        };
        match self {
            ScreenMapper::Planar { horizontal, vertical } => format!(
                "vec2 map_to_screen(State p) {{\n    vec2 w = vec2({}, {});\n    \
                 return (w - u_min) / (u_max - u_min) * 2.0 - 1.0;\n}}\n",
                component(*horizontal),
                component(*vertical)
            ),
            ScreenMapper::Isometric => format!(
                "vec2 map_to_screen(State p) {{\n    vec3 w = vec3({}, {}, {});\n    \
                 vec2 iso = vec2((w.x - w.y) * 0.8660254, (w.x + w.y) * 0.5 + w.z);\n    \
                 vec2 center = (u_min + u_max) * 0.5;\n    \
                 return (iso - center) / ((u_max - u_min) * 0.5);\n}}\n",
                component(0),
                component(1),
                component(2)
            ),
        }
    }

    /// CPU mirror: normalized device coordinates of a world position.
    pub fn project(&self, point: &[f32], min: [f32; 2], max: [f32; 2]) -> [f32; 2] {
        let at = |dim: usize| point.get(dim).copied().unwrap_or(0.0);
        let (w, center_based) = match self {
            ScreenMapper::Planar { horizontal, vertical } => ([at(*horizontal), at(*vertical)], false),
            ScreenMapper::Isometric => (
                [
                    (at(0) - at(1)) * 0.866_025_4,
                    (at(0) + at(1)) * 0.5 + at(2),
                ],
                true,
            ),
        };
        let mut out = [0.0; 2];
        for axis in 0..2 {
            let size = max[axis] - min[axis];
            out[axis] = if center_based {
                (w[axis] - (min[axis] + max[axis]) * 0.5) / (size * 0.5)
            } else {
                (w[axis] - min[axis]) / size * 2.0 - 1.0
            };
        }
        out
    }
}

/// How the draw program is put together beyond the shared velocity block.
pub struct DrawOptions<'a> {
    /// GLSL float in `p.<field>`, `vel` and `speed`, mapped through the gradient.
    pub color: &'a str,
    pub gradient: &'a Gradient,
    pub mapper: ScreenMapper,
    pub mode: DrawMode,
}

pub fn draw_program(inputs: &ShaderInputs, options: &DrawOptions) -> Result<ProgramSource> {
    let vars = inputs.vars;
    let dims = vars.len();
    let trails = options.mode == DrawMode::Trails;

    let mut out = String::from(GLSL_HEADER);
    out.push('\n');
    out.push_str(&inputs.encoding.glsl());
    out.push('\n');
    for sampler in position_samplers(dims) {
        out.push_str(&format!("uniform sampler2D {sampler};\n"));
    }
    if trails {
        for sampler in previous_samplers(dims) {
            out.push_str(&format!("uniform sampler2D {sampler};\n"));
        }
    }
    for (ty, name) in DRAW_UNIFORMS {
        out.push_str(&format!("uniform {ty} {name};\n"));
    }
    out.push_str("\nout vec4 v_color;\nout float v_speed;\n\n");
    out.push_str(&velocity_block(inputs)?);
    out.push('\n');
    out.push_str(&options.gradient.glsl()?);
    out.push('\n');
    out.push_str(&options.mapper.glsl(vars));
    out.push('\n');

    out.push_str("void main() {\n");
    if trails {
        out.push_str("    int index = gl_VertexID / 2;\n    bool head = (gl_VertexID % 2) == 1;\n");
    } else {
        out.push_str("    int index = gl_VertexID;\n");
    }
    out.push_str(
        "    int res = int(u_particles_res);\n    ivec2 texel = ivec2(index % res, index / res);\n",
    );
    for (dim, var) in vars.iter().enumerate() {
        let fetch = if trails {
            format!(
                "head ? texelFetch(u_pos_{dim}, texel, 0) : texelFetch(u_prev_pos_{dim}, texel, 0)"
            )
        } else {
            format!("texelFetch(u_pos_{dim}, texel, 0)")
        };
        out.push_str(&format!("    vec4 t{dim} = {fetch};\n"));
        let (lo, hi) = match dim {
            0 => ("u_min.x".to_string(), "u_max.x".to_string()),
            1 => ("u_min.y".to_string(), "u_max.y".to_string()),
            _ => ("-10.0".to_string(), "10.0".to_string()),
        };
        if dim == 0 {
            out.push_str("    float age = t0.a;\n    State p;\n");
        }
        out.push_str(&format!("    p.{var} = mix({lo}, {hi}, decode_value(t{dim}));\n"));
    }
    out.push_str(&format!(
        "    State vel = cartesian_velocity(p);\n    float speed = state_length(vel);\n    \
         v_speed = speed;\n    v_color = vec4(gradient({}), u_alpha);\n    \
         gl_Position = vec4(map_to_screen(p), 0.0, 1.0);\n    \
         if (age < 1.0) {{\n        gl_Position = vec4(2.0, 2.0, 2.0, 1.0);\n    }}\n    \
         gl_PointSize = u_point_size * u_render_scale;\n}}\n",
        options.color
    ));

    Ok(ProgramSource {
        vertex: out,
        fragment: DRAW_FRAGMENT.to_string(),
    })
}
