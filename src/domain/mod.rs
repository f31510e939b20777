//! Domain transforms
//!
//! A warp `y = T(x)` applied before integration. The integrator runs in
//! y-space on `J_T(x)·v(x)` and the result is mapped back with `T⁻¹`.
//! Component-wise warps are written once in the expression language with the
//! variable `s` and parameters `a`..`d` (bound to `u_transform_params`); the
//! same source is lowered to GLSL and evaluated for the CPU mirror.

use serde::{Deserialize, Serialize};

use crate::cas::diff::differentiate;
use crate::config::SINE_INVERSE_ITERATIONS;
use crate::error::{FlowError, Result};
use crate::expr::{Evaluator, Expr, Lowerer, free_identifiers, parse};

const PARAMETERS: [&str; 4] = ["a", "b", "c", "d"];
const PARAMETER_FIELDS: [&str; 4] = ["x", "y", "z", "w"];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainTransform {
    #[default]
    Identity,
    /// `sign(x)|x|^a`
    Power,
    /// `sign(x) log(1 + |x|)`
    Log,
    /// `sign(x) (e^|x| - 1)`
    Exp,
    /// `x / (1 + a|x|)`
    Softsign,
    /// `tanh(x / a)`
    Tanh,
    /// `1 / (1 + e^(-x/a))`
    Sigmoid,
    /// `x / sqrt(1 + (x/a)^2)`
    Rational,
    /// `x + a sin(b x)`, inverted numerically
    Sine,
    /// `x |x|^(a-1)` on the whole position vector
    RadialPower,
    /// User-supplied component-wise pair in `s` and `a`..`d`.
    Custom { forward: String, inverse: String },
}

/// How a scalar warp is inverted.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarInverse {
    Closed(Expr),
    /// Newton iteration on `x + a sin(b x) = s`.
    SineNewton,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarWarp {
    pub forward: Expr,
    pub inverse: ScalarInverse,
    pub derivative: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Identity,
    Componentwise(ScalarWarp),
    Radial,
}

impl DomainTransform {
    pub const MENU: [&'static str; 11] = [
        "identity",
        "power",
        "log",
        "exp",
        "softsign",
        "tanh",
        "sigmoid",
        "rational",
        "sine",
        "radial-power",
        "custom",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DomainTransform::Identity => "identity",
            DomainTransform::Power => "power",
            DomainTransform::Log => "log",
            DomainTransform::Exp => "exp",
            DomainTransform::Softsign => "softsign",
            DomainTransform::Tanh => "tanh",
            DomainTransform::Sigmoid => "sigmoid",
            DomainTransform::Rational => "rational",
            DomainTransform::Sine => "sine",
            DomainTransform::RadialPower => "radial-power",
            DomainTransform::Custom { .. } => "custom",
        }
    }

    /// Menu entry by name. `custom` needs [`DomainTransform::custom`].
    pub fn from_name(name: &str) -> Option<Self> {
        let transform = match name {
            "identity" => DomainTransform::Identity,
            "power" => DomainTransform::Power,
            "log" => DomainTransform::Log,
            "exp" => DomainTransform::Exp,
            "softsign" => DomainTransform::Softsign,
            "tanh" => DomainTransform::Tanh,
            "sigmoid" => DomainTransform::Sigmoid,
            "rational" => DomainTransform::Rational,
            "sine" => DomainTransform::Sine,
            "radial-power" => DomainTransform::RadialPower,
            _ => return None,
        };
        Some(transform)
    }

    pub fn custom(forward: &str, inverse: &str) -> Result<Self> {
        let transform = DomainTransform::Custom {
            forward: forward.to_string(),
            inverse: inverse.to_string(),
        };
        transform.shape()?;
        Ok(transform)
    }

    pub fn is_identity(&self) -> bool {
        *self == DomainTransform::Identity
    }

    pub fn shape(&self) -> Result<Shape> {
        let warp = |forward: &str, inverse: &str, derivative: &str| -> Result<Shape> {
            Ok(Shape::Componentwise(ScalarWarp {
                forward: parse(forward)?,
                inverse: ScalarInverse::Closed(parse(inverse)?),
                derivative: parse(derivative)?,
            }))
        };
        match self {
            DomainTransform::Identity => Ok(Shape::Identity),
            DomainTransform::Power => warp(
                "sign(s)*abs(s)^a",
                "sign(s)*abs(s)^(1/a)",
                "a*abs(s)^(a - 1)",
            ),
            DomainTransform::Log => warp(
                "sign(s)*log(1 + abs(s))",
                "sign(s)*(exp(abs(s)) - 1)",
                "1/(1 + abs(s))",
            ),
            DomainTransform::Exp => warp(
                "sign(s)*(exp(abs(s)) - 1)",
                "sign(s)*log(1 + abs(s))",
                "exp(abs(s))",
            ),
            DomainTransform::Softsign => warp(
                "s/(1 + a*abs(s))",
                "s/(1 - a*abs(s))",
                "1/(1 + a*abs(s))^2",
            ),
            DomainTransform::Tanh => warp(
                "tanh(s/a)",
                "a*log((1 + s)/(1 - s))/2",
                "(1 - tanh(s/a)^2)/a",
            ),
            DomainTransform::Sigmoid => warp(
                "1/(1 + exp(-s/a))",
                "-a*log(1/s - 1)",
                "exp(-s/a)/(a*(1 + exp(-s/a))^2)",
            ),
            DomainTransform::Rational => warp(
                "s/sqrt(1 + (s/a)^2)",
                "s/sqrt(1 - (s/a)^2)",
                "1/(1 + (s/a)^2)^1.5",
            ),
            DomainTransform::Sine => Ok(Shape::Componentwise(ScalarWarp {
                forward: parse("s + a*sin(b*s)")?,
                inverse: ScalarInverse::SineNewton,
                derivative: parse("1 + a*b*cos(b*s)")?,
            })),
            DomainTransform::RadialPower => Ok(Shape::Radial),
            DomainTransform::Custom { forward, inverse } => {
                let forward = parse(forward)?;
                let inverse = parse(inverse)?;
                for expr in [&forward, &inverse] {
                    if let Some(name) = free_identifiers(expr)
                        .into_iter()
                        .find(|name| name != "s" && !PARAMETERS.contains(&name.as_str()))
                    {
                        return Err(FlowError::application(format!(
                            "custom transform may only use `s` and a..d, found `{name}`"
                        )));
                    }
                }
                let derivative = differentiate(&forward, "s")?;
                Ok(Shape::Componentwise(ScalarWarp {
                    forward,
                    inverse: ScalarInverse::Closed(inverse),
                    derivative,
                }))
            }
        }
    }

    /// GLSL for `domain_forward`, `domain_inverse` and `jt_apply` over the
    /// `State` fields `vars`. Expects `u_transform_params` to be declared.
    pub fn emit_glsl(&self, vars: &[String]) -> Result<String> {
        let mut out = String::new();
        match self.shape()? {
            Shape::Identity => {
                out.push_str("State domain_forward(State p) {\n    return p;\n}\n\n");
                out.push_str("State domain_inverse(State p) {\n    return p;\n}\n\n");
                out.push_str("State jt_apply(State p, State v) {\n    return v;\n}\n");
            }
            Shape::Componentwise(warp) => {
                let lowerer = Lowerer::new()
                    .bind("s", "s")
                    .bind("a", "a")
                    .bind("b", "b")
                    .bind("c", "c")
                    .bind("d", "d");
                let params: String = PARAMETERS
                    .iter()
                    .zip(PARAMETER_FIELDS)
                    .map(|(name, field)| format!("    float {name} = u_transform_params.{field};\n"))
                    .collect();

                let scalar = |name: &str, body: &str| {
                    format!("float {name}(float s) {{\n{params}{body}}}\n\n")
                };
                out.push_str(&scalar(
                    "dt_fwd",
                    &format!("    return {};\n", lowerer.lower(&warp.forward)?),
                ));
                let inverse_body = match &warp.inverse {
                    ScalarInverse::Closed(expr) => format!("    return {};\n", lowerer.lower(expr)?),
                    ScalarInverse::SineNewton => format!(
                        "    float x = s;\n    for (int i = 0; i < {SINE_INVERSE_ITERATIONS}; i++) {{\n        \
                         x -= (x + a*sin(b*x) - s) / (1.0 + a*b*cos(b*x));\n    }}\n    return x;\n"
                    ),
                };
                out.push_str(&scalar("dt_inv", &inverse_body));
                out.push_str(&scalar(
                    "dt_deriv",
                    &format!("    return {};\n", lowerer.lower(&warp.derivative)?),
                ));

                for (function, scalar_fn) in [("domain_forward", "dt_fwd"), ("domain_inverse", "dt_inv")] {
                    out.push_str(&format!("State {function}(State p) {{\n    State q;\n"));
                    for var in vars {
                        out.push_str(&format!("    q.{var} = {scalar_fn}(p.{var});\n"));
                    }
                    out.push_str("    return q;\n}\n\n");
                }
                out.push_str("State jt_apply(State p, State v) {\n    State w;\n");
                for var in vars {
                    out.push_str(&format!("    w.{var} = dt_deriv(p.{var})*v.{var};\n"));
                }
                out.push_str("    return w;\n}\n");
            }
            Shape::Radial => {
                let norm = vars
                    .iter()
                    .map(|var| format!("p.{var}*p.{var}"))
                    .collect::<Vec<_>>()
                    .join(" + ");
                let radial = |name: &str, exponent: &str| {
                    let mut f = format!(
                        "State {name}(State p) {{\n    float a = u_transform_params.x;\n    \
                         float n = sqrt({norm});\n    float k = n > 0.0 ? pow(n, {exponent}) : 0.0;\n    State q;\n"
                    );
                    for var in vars {
                        f.push_str(&format!("    q.{var} = k*p.{var};\n"));
                    }
                    f.push_str("    return q;\n}\n\n");
                    f
                };
                out.push_str(&radial("domain_forward", "a - 1.0"));
                out.push_str(&radial("domain_inverse", "1.0/a - 1.0"));
                let dot = vars
                    .iter()
                    .map(|var| format!("p.{var}*v.{var}"))
                    .collect::<Vec<_>>()
                    .join(" + ");
                out.push_str(&format!(
                    "State jt_apply(State p, State v) {{\n    float a = u_transform_params.x;\n    \
                     float n2 = {norm};\n    State w;\n    if (n2 <= 0.0) {{\n        return v;\n    }}\n    \
                     float k = pow(sqrt(n2), a - 1.0);\n    float d = ({dot})/n2;\n"
                ));
                for var in vars {
                    out.push_str(&format!(
                        "    w.{var} = k*(v.{var} + (a - 1.0)*d*p.{var});\n"
                    ));
                }
                out.push_str("    return w;\n}\n");
            }
        }
        Ok(out)
    }

    /// CPU mirror of the shader helpers.
    pub fn mirror(&self, params: [f64; 4]) -> Result<DomainMirror> {
        Ok(DomainMirror {
            shape: self.shape()?,
            params,
        })
    }
}

/// f64 evaluation of a transform with fixed parameters.
#[derive(Debug, Clone)]
pub struct DomainMirror {
    shape: Shape,
    params: [f64; 4],
}

impl DomainMirror {
    fn scalar(&self, expr: &Expr, s: f64) -> Result<f64> {
        let [a, b, c, d] = self.params;
        Evaluator::default().eval(expr, &[("s", s), ("a", a), ("b", b), ("c", c), ("d", d)])
    }

    pub fn forward(&self, x: &[f64]) -> Result<Vec<f64>> {
        match &self.shape {
            Shape::Identity => Ok(x.to_vec()),
            Shape::Componentwise(warp) => x.iter().map(|&s| self.scalar(&warp.forward, s)).collect(),
            Shape::Radial => Ok(radial_scale(x, self.params[0] - 1.0)),
        }
    }

    pub fn inverse(&self, y: &[f64]) -> Result<Vec<f64>> {
        match &self.shape {
            Shape::Identity => Ok(y.to_vec()),
            Shape::Componentwise(warp) => match &warp.inverse {
                ScalarInverse::Closed(expr) => y.iter().map(|&s| self.scalar(expr, s)).collect(),
                ScalarInverse::SineNewton => {
                    let [a, b, ..] = self.params;
                    Ok(y.iter()
                        .map(|&s| {
                            let mut x = s;
                            for _ in 0..SINE_INVERSE_ITERATIONS {
                                x -= (x + a * (b * x).sin() - s) / (1.0 + a * b * (b * x).cos());
                            }
                            x
                        })
                        .collect())
                }
            },
            Shape::Radial => Ok(radial_scale(y, 1.0 / self.params[0] - 1.0)),
        }
    }

    /// `J_T(x) · v`.
    pub fn jt_apply(&self, x: &[f64], v: &[f64]) -> Result<Vec<f64>> {
        match &self.shape {
            Shape::Identity => Ok(v.to_vec()),
            Shape::Componentwise(warp) => x
                .iter()
                .zip(v)
                .map(|(&s, &component)| Ok(self.scalar(&warp.derivative, s)? * component))
                .collect(),
            Shape::Radial => {
                let a = self.params[0];
                let n2: f64 = x.iter().map(|c| c * c).sum();
                if n2 <= 0.0 {
                    return Ok(v.to_vec());
                }
                let k = n2.sqrt().powf(a - 1.0);
                let d = x.iter().zip(v).map(|(p, q)| p * q).sum::<f64>() / n2;
                Ok(x.iter()
                    .zip(v)
                    .map(|(p, q)| k * (q + (a - 1.0) * d * p))
                    .collect())
            }
        }
    }
}

fn radial_scale(x: &[f64], exponent: f64) -> Vec<f64> {
    let n = x.iter().map(|c| c * c).sum::<f64>().sqrt();
    let k = if n > 0.0 { n.powf(exponent) } else { 0.0 };
    x.iter().map(|c| k * c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: [f64; 4] = [2.0, 0.5, 0.0, 0.0];

    #[test]
    fn test_round_trips() {
        let point = [0.3, -0.7, 0.05];
        for name in DomainTransform::MENU {
            let Some(transform) = DomainTransform::from_name(name) else {
                continue;
            };
            let mirror = transform.mirror(PARAMS).unwrap();
            let y = mirror.forward(&point).unwrap();
            let back = mirror.inverse(&y).unwrap();
            for (a, b) in point.iter().zip(&back) {
                assert!((a - b).abs() < 1e-6, "{name}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_jacobians_match_finite_differences() {
        let point = [0.4, -0.9];
        let step = 1e-6;
        for name in DomainTransform::MENU {
            let Some(transform) = DomainTransform::from_name(name) else {
                continue;
            };
            let mirror = transform.mirror(PARAMS).unwrap();
            for axis in 0..2 {
                let mut v = [0.0; 2];
                v[axis] = 1.0;
                let analytic = mirror.jt_apply(&point, &v).unwrap();
                let mut plus = point;
                let mut minus = point;
                plus[axis] += step;
                minus[axis] -= step;
                let fp = mirror.forward(&plus).unwrap();
                let fm = mirror.forward(&minus).unwrap();
                for row in 0..2 {
                    let numeric = (fp[row] - fm[row]) / (2.0 * step);
                    assert!(
                        (numeric - analytic[row]).abs() < 1e-5,
                        "{name} d{row}/d{axis}: {numeric} vs {}",
                        analytic[row]
                    );
                }
            }
        }
    }

    #[test]
    fn test_custom_transform() {
        let transform = DomainTransform::custom("a*s^3 + s", "s").unwrap();
        let Shape::Componentwise(warp) = transform.shape().unwrap() else {
            panic!("custom transforms are component-wise");
        };
        let slope = Evaluator::default()
            .eval(&warp.derivative, &[("s", 2.0), ("a", 0.5)])
            .unwrap();
        assert!((slope - 7.0).abs() < 1e-12);
        assert!(DomainTransform::custom("s + q", "s").is_err());
    }

    #[test]
    fn test_glsl_emission() {
        let vars = vec!["x".to_string(), "y".to_string()];
        let tanh = DomainTransform::Tanh.emit_glsl(&vars).unwrap();
        assert!(tanh.contains("float dt_fwd(float s)"));
        assert!(tanh.contains("return tanh(s/a);"));
        assert!(tanh.contains("w.y = dt_deriv(p.y)*v.y;"));
        let sine = DomainTransform::Sine.emit_glsl(&vars).unwrap();
        assert!(sine.contains("for (int i = 0; i < 5; i++)"));
        let radial = DomainTransform::RadialPower.emit_glsl(&vars).unwrap();
        assert!(radial.contains("float n = sqrt(p.x*p.x + p.y*p.y);"));
        let identity = DomainTransform::Identity.emit_glsl(&vars).unwrap();
        assert!(identity.contains("State jt_apply(State p, State v) {\n    return v;"));
    }
}
