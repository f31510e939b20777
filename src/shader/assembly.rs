//! Update program assembly.
//!
//! The update fragment program advances every particle by one step and
//! writes a single coordinate per pass, selected by `u_out_coordinate`.

use crate::config::{
    AGE_INCREMENT, ESCAPE_MARGIN, EncodingStrategy, RESPAWN_HIGHER_DIM_MAX, RESPAWN_HIGHER_DIM_MIN,
    SPAWN_MARGIN, Viewport,
};
use crate::coords::ResolvedChart;
use crate::domain::DomainTransform;
use crate::error::{FlowError, Result};
use crate::expr::{FunctionTable, glsl_float, lower_function};
use crate::integrators::Integrator;
use crate::jacobian::NewtonSolve;

pub const GLSL_HEADER: &str = "#version 300 es\nprecision highp float;\nprecision highp int;\n";

pub const UPDATE_VERTEX: &str = "#version 300 es
in vec2 a_position;

void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

const RANDOM_GLSL: &str = "float rand_a(vec2 co) {
    return fract(sin(dot(co, vec2(12.9898, 78.233))) * 43758.5453);
}

float rand_b(vec2 co) {
    vec3 p3 = fract(vec3(co.xyx) * 0.1031);
    p3 += dot(p3, p3.yzx + 33.33);
    return fract((p3.x + p3.y) * p3.z);
}
";

/// Vertex and fragment text of one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub vertex: String,
    pub fragment: String,
}

/// Everything the velocity block needs.
pub struct ShaderInputs<'a> {
    /// State field names, one per dimension.
    pub vars: &'a [String],
    /// Native field components, lowered in terms of `p.<field>`.
    pub field: &'a [String],
    pub functions: &'a FunctionTable,
    pub chart: &'a ResolvedChart,
    pub transform: &'a DomainTransform,
    pub integrator: Integrator,
    pub newton: Option<&'a NewtonSolve>,
    pub encoding: EncodingStrategy,
}

/// Sampler names for the current positions.
pub fn position_samplers(dims: usize) -> Vec<String> {
    (0..dims).map(|i| format!("u_pos_{i}")).collect()
}

/// Sampler names for the previous positions, used by trails.
pub fn previous_samplers(dims: usize) -> Vec<String> {
    (0..dims).map(|i| format!("u_prev_pos_{i}")).collect()
}

pub const SCALAR_UNIFORMS: [(&str, &str); 12] = [
    ("vec2", "u_min"),
    ("vec2", "u_max"),
    ("float", "u_h"),
    ("float", "u_rand_seed"),
    ("float", "u_drop_rate"),
    ("int", "u_out_coordinate"),
    ("float", "u_particles_res"),
    ("float", "u_max_velocity"),
    ("bool", "u_drop_low_velocity"),
    ("float", "u_velocity_threshold"),
    ("float", "u_alpha"),
    ("vec4", "u_transform_params"),
];

/// `State`, user functions, field, chart and domain helpers, and `velocity`.
/// Shared by the update and draw programs.
pub fn velocity_block(inputs: &ShaderInputs) -> Result<String> {
    let vars = inputs.vars;
    if inputs.field.len() != vars.len() {
        return Err(FlowError::application(format!(
            "{} field component(s) for {} dimension(s)",
            inputs.field.len(),
            vars.len()
        )));
    }
    let mut out = String::from("struct State {\n");
    for var in vars {
        out.push_str(&format!("    float {var};\n"));
    }
    out.push_str("};\n\n");

    out.push_str(&state_length(vars));

    for def in inputs.functions.dependency_order()? {
        out.push_str(&lower_function(def, inputs.functions)?);
        out.push('\n');
    }

    out.push_str("State field_velocity(State p) {\n    State r;\n");
    for (var, component) in vars.iter().zip(inputs.field) {
        out.push_str(&format!("    r.{var} = {component};\n"));
    }
    out.push_str("    return r;\n}\n\n");

    out.push_str(&inputs.chart.emit_glsl()?);
    out.push('\n');
    out.push_str(&inputs.transform.emit_glsl(vars)?);
    out.push('\n');

    if inputs.transform.is_identity() {
        out.push_str("State velocity(State y) {\n    return cartesian_velocity(y);\n}\n");
    } else {
        out.push_str(
            "State velocity(State y) {\n    State x = domain_inverse(y);\n    \
             return jt_apply(x, cartesian_velocity(x));\n}\n",
        );
    }
    Ok(out)
}

fn state_length(vars: &[String]) -> String {
    let sum = vars
        .iter()
        .map(|var| format!("s.{var}*s.{var}"))
        .collect::<Vec<_>>()
        .join(" + ");
    format!("float state_length(State s) {{\n    return sqrt({sum});\n}}\n\n")
}

/// World range expressions `(lo, hi)` for dimension `dim`.
fn range_glsl(dim: usize) -> Result<(String, String)> {
    let axis = ["x", "y"];
    match dim {
        0 | 1 => Ok((format!("u_min.{}", axis[dim]), format!("u_max.{}", axis[dim]))),
        _ => {
            let (lo, hi) = Viewport::default().range(dim);
            Ok((glsl_float32(lo)?, glsl_float32(hi)?))
        }
    }
}

/// The full update program.
pub fn update_program(inputs: &ShaderInputs) -> Result<ProgramSource> {
    let vars = inputs.vars;
    let dims = vars.len();
    let mut out = String::from(GLSL_HEADER);
    out.push('\n');
    out.push_str(&inputs.encoding.glsl());
    out.push('\n');

    for sampler in position_samplers(dims) {
        out.push_str(&format!("uniform sampler2D {sampler};\n"));
    }
    for (ty, name) in SCALAR_UNIFORMS {
        out.push_str(&format!("uniform {ty} {name};\n"));
    }
    out.push_str("\nout vec4 out_value;\n\n");

    out.push_str(&velocity_block(inputs)?);
    out.push('\n');
    if let Some(newton) = inputs.newton {
        out.push_str(&newton.emit_glsl(vars)?);
        out.push('\n');
    } else if inputs.integrator.is_implicit() {
        return Err(FlowError::application(format!(
            "{} needs a Newton solve",
            inputs.integrator
        )));
    }
    out.push_str(&inputs.integrator.emit_glsl(vars)?);
    out.push('\n');
    out.push_str(RANDOM_GLSL);
    out.push('\n');
    out.push_str(&update_main(vars)?);

    Ok(ProgramSource {
        vertex: UPDATE_VERTEX.to_string(),
        fragment: out,
    })
}

/// GLSL literal for an `f32` constant, printed at `f32` precision.
pub fn glsl_float32(value: f32) -> Result<String> {
    glsl_float(format!("{value}").parse().unwrap_or(value as f64))
}

fn update_main(vars: &[String]) -> Result<String> {
    let escape = glsl_float32(ESCAPE_MARGIN)?;
    let spawn = glsl_float32(SPAWN_MARGIN)?;
    let age_step = glsl_float32(AGE_INCREMENT)?;
    let respawn_lo = glsl_float32(RESPAWN_HIGHER_DIM_MIN)?;
    let respawn_hi = glsl_float32(RESPAWN_HIGHER_DIM_MAX)?;

    let mut out = String::from(
        "void main() {\n    ivec2 texel = ivec2(gl_FragCoord.xy);\n    \
         vec2 seed = gl_FragCoord.xy / u_particles_res + vec2(u_rand_seed, u_rand_seed * 1.618);\n",
    );
    out.push_str("    vec4 t0 = texelFetch(u_pos_0, texel, 0);\n    float age = t0.a;\n    State p;\n");
    for (dim, var) in vars.iter().enumerate() {
        let (lo, hi) = range_glsl(dim)?;
        let texel = if dim == 0 {
            "t0".to_string()
        } else {
            format!("texelFetch(u_pos_{dim}, texel, 0)")
        };
        out.push_str(&format!("    p.{var} = mix({lo}, {hi}, decode_value({texel}));\n"));
    }

    out.push_str(
        "\n    State next = domain_inverse(integrate(domain_forward(p), u_h));\n    \
         float speed = state_length(cartesian_velocity(next));\n\n    \
         vec2 size = u_max - u_min;\n    bool drop = rand_a(seed) < u_drop_rate;\n    bool escaped = false;\n",
    );
    for (dim, var) in vars.iter().enumerate().take(2) {
        let axis = ["x", "y"][dim];
        out.push_str(&format!(
            "    escaped = escaped || next.{var} < u_min.{axis} - {escape}*size.{axis} || next.{var} > u_max.{axis} + {escape}*size.{axis};\n"
        ));
    }
    for var in vars {
        out.push_str(&format!(
            "    escaped = escaped || isnan(next.{var}) || isinf(next.{var});\n"
        ));
    }
    out.push_str("    bool stuck = u_drop_low_velocity && speed < u_velocity_threshold;\n\n");

    out.push_str("    if (drop || escaped || stuck) {\n");
    for (dim, var) in vars.iter().enumerate() {
        let offset = format!("vec2({}.3, {}.7)", dim + 1, dim + 1);
        if dim < 2 {
            let axis = ["x", "y"][dim];
            let rand = if dim == 0 { "rand_a" } else { "rand_b" };
            out.push_str(&format!(
                "        next.{var} = mix(u_min.{axis} - {spawn}*size.{axis}, u_max.{axis} + {spawn}*size.{axis}, {rand}(seed + {offset}));\n"
            ));
        } else {
            out.push_str(&format!(
                "        next.{var} = mix({respawn_lo}, {respawn_hi}, rand_b(seed + {offset}));\n"
            ));
        }
    }
    out.push_str(&format!(
        "        age = 0.0;\n    }} else {{\n        age = min(age + {age_step}, 1.0);\n    }}\n\n    float value = 0.0;\n"
    ));
    for (dim, var) in vars.iter().enumerate() {
        let (lo, hi) = range_glsl(dim)?;
        let keyword = if dim == 0 { "if" } else { "} else if" };
        out.push_str(&format!(
            "    {keyword} (u_out_coordinate == {dim}) {{\n        value = (next.{var} - {lo}) / ({hi} - {lo});\n"
        ));
    }
    out.push_str("    }\n    out_value = encode_value(value);\n");
    out.push_str("    if (u_out_coordinate == 0) {\n        out_value.a = age;\n    }\n}\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::SymbolicCas;
    use crate::coords::{CoordinateSystem, cartesian_variables};
    use crate::notebook::Notebook;

    fn compile_inputs(transform: DomainTransform) -> String {
        let mut nb = Notebook::new(Box::new(SymbolicCas::separating()));
        let chart = CoordinateSystem::cartesian(3).resolve(&mut nb).unwrap();
        let vars = cartesian_variables(3);
        let field = vec!["10.0*(p.y - p.x)".to_string(), "p.x".to_string(), "-p.z".to_string()];
        let functions = FunctionTable::new();
        let inputs = ShaderInputs {
            vars: &vars,
            field: &field,
            functions: &functions,
            chart: &chart,
            transform: &transform,
            integrator: Integrator::Rk4,
            newton: None,
            encoding: EncodingStrategy::Float,
        };
        update_program(&inputs).unwrap().fragment
    }

    #[test]
    fn test_update_program_layout() {
        let glsl = compile_inputs(DomainTransform::Identity);
        assert!(glsl.starts_with("#version 300 es"));
        let order = [
            "float decode_value",
            "uniform sampler2D u_pos_2;",
            "uniform vec4 u_transform_params;",
            "struct State",
            "State field_velocity(State p)",
            "State cartesian_velocity(State p)",
            "State domain_forward(State p)",
            "State velocity(State y)",
            "State integrate(State y, float h)",
            "float rand_a(vec2 co)",
            "void main()",
        ];
        let mut last = 0;
        for marker in order {
            let at = glsl.find(marker).unwrap_or_else(|| panic!("missing {marker}"));
            assert!(at >= last, "{marker} out of order");
            last = at;
        }
        assert!(glsl.contains("p.z = mix(-10.0, 10.0, decode_value(texelFetch(u_pos_2, texel, 0)));"));
        assert!(glsl.contains("next.z = mix(-10.4, 10.8, rand_b(seed"));
        assert!(glsl.contains("age = min(age + 0.5, 1.0);"));
        assert!(glsl.contains("0.2*size.x"));
        assert!(glsl.contains("u_min.y - 0.02*size.y"));
        assert!(glsl.contains("out_value.a = age;"));
    }

    #[test]
    fn test_domain_transform_wraps_velocity() {
        let glsl = compile_inputs(DomainTransform::Tanh);
        assert!(glsl.contains("return jt_apply(x, cartesian_velocity(x));"));
        assert!(glsl.contains("float dt_inv(float s)"));
    }

    #[test]
    fn test_implicit_without_newton_is_rejected() {
        let mut nb = Notebook::new(Box::new(SymbolicCas::separating()));
        let chart = CoordinateSystem::cartesian(1).resolve(&mut nb).unwrap();
        let vars = cartesian_variables(1);
        let field = vec!["-p.x".to_string()];
        let functions = FunctionTable::new();
        let inputs = ShaderInputs {
            vars: &vars,
            field: &field,
            functions: &functions,
            chart: &chart,
            transform: &DomainTransform::Identity,
            integrator: Integrator::BackwardEuler,
            newton: None,
            encoding: EncodingStrategy::Packed,
        };
        assert_eq!(
            update_program(&inputs).unwrap_err().kind(),
            "workflow-application-failure"
        );
    }
}
