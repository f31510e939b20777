//! Integrators
//!
//! Each integrator emits `State integrate(State y, float h)` in terms of a
//! previously declared `State velocity(State)`, and has an f64 twin used by
//! the CPU reference stepper. Implicit methods also call `newton_delta`
//! (see [`crate::jacobian::NewtonSolve`]) and fall back to an explicit Euler
//! step when Newton does not converge.

pub mod tableau;

use serde::{Deserialize, Serialize};

use crate::config::{JACOBIAN_FD_STEP, NEWTON_MAX_ITERATIONS, NEWTON_TOLERANCE};
use crate::error::Result;
use crate::expr::glsl_float;
use crate::math::{self, Real};

use tableau::Tableau;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Integrator {
    #[default]
    Euler,
    Midpoint,
    Heun,
    Rk4,
    CashKarp,
    BackwardEuler,
    Trapezoidal,
}

impl Integrator {
    pub const ALL: [Integrator; 7] = [
        Integrator::Euler,
        Integrator::Midpoint,
        Integrator::Heun,
        Integrator::Rk4,
        Integrator::CashKarp,
        Integrator::BackwardEuler,
        Integrator::Trapezoidal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Integrator::Euler => "euler",
            Integrator::Midpoint => "midpoint",
            Integrator::Heun => "heun",
            Integrator::Rk4 => "rk4",
            Integrator::CashKarp => "cash-karp",
            Integrator::BackwardEuler => "backward-euler",
            Integrator::Trapezoidal => "trapezoidal",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|integrator| integrator.name() == name)
    }

    pub fn is_implicit(self) -> bool {
        self.newton_coefficient().is_some()
    }

    /// `c` in the Newton matrix `I - c·h·J`.
    pub fn newton_coefficient(self) -> Option<f64> {
        match self {
            Integrator::BackwardEuler => Some(1.0),
            Integrator::Trapezoidal => Some(0.5),
            _ => None,
        }
    }

    fn tableau(self) -> Option<Tableau> {
        match self {
            Integrator::Euler => Some(tableau::EULER),
            Integrator::Midpoint => Some(tableau::MIDPOINT),
            Integrator::Heun => Some(tableau::HEUN),
            Integrator::Rk4 => Some(tableau::RK4),
            Integrator::CashKarp => Some(tableau::CASH_KARP),
            Integrator::BackwardEuler | Integrator::Trapezoidal => None,
        }
    }

    /// GLSL for `integrate`. `vars` are the `State` fields.
    pub fn emit_glsl(self, vars: &[String]) -> Result<String> {
        match (self.tableau(), self.newton_coefficient()) {
            (Some(tableau), _) => emit_explicit(&tableau, vars),
            (None, Some(coefficient)) => emit_implicit(coefficient, vars),
            (None, None) => emit_explicit(&tableau::EULER, vars),
        }
    }

    /// One f64 step of `y' = velocity(y)`.
    pub fn step(
        self,
        y: &[Real],
        h: Real,
        velocity: &impl Fn(&[Real]) -> Result<Vec<Real>>,
    ) -> Result<Vec<Real>> {
        match (self.tableau(), self.newton_coefficient()) {
            (Some(tableau), _) => step_explicit(&tableau, y, h, velocity),
            (None, Some(coefficient)) => step_implicit(coefficient, y, h, velocity),
            (None, None) => step_explicit(&tableau::EULER, y, h, velocity),
        }
    }
}

impl std::fmt::Display for Integrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn emit_explicit(tableau: &Tableau, vars: &[String]) -> Result<String> {
    let mut out = String::from("State integrate(State y, float h) {\n");
    for (stage, row) in tableau.a.iter().enumerate() {
        let k = stage + 1;
        if stage == 0 {
            out.push_str("    State k1 = velocity(y);\n");
            continue;
        }
        out.push_str(&format!("    State s{k};\n"));
        for var in vars {
            out.push_str(&format!("    s{k}.{var} = {};\n", combination(row, var)?));
        }
        out.push_str(&format!("    State k{k} = velocity(s{k});\n"));
    }
    out.push_str("    State r;\n");
    for var in vars {
        out.push_str(&format!("    r.{var} = {};\n", combination(tableau.b, var)?));
    }
    out.push_str("    return r;\n}\n");
    Ok(out)
}

/// `y.v + h*(w1*k1.v + ...)`, skipping zero weights.
fn combination(weights: &[f64], var: &str) -> Result<String> {
    let terms = weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w != 0.0)
        .map(|(i, w)| {
            if *w == 1.0 {
                Ok(format!("k{}.{var}", i + 1))
            } else {
                glsl_float(*w).map(|w| format!("{w}*k{}.{var}", i + 1))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    if terms.is_empty() {
        return Ok(format!("y.{var}"));
    }
    Ok(format!("y.{var} + h*({})", terms.join(" + ")))
}

fn emit_implicit(coefficient: f64, vars: &[String]) -> Result<String> {
    let tolerance = glsl_float(NEWTON_TOLERANCE)?;
    let mut out = String::from("State integrate(State y, float h) {\n    State f0 = velocity(y);\n    State z;\n");
    for var in vars {
        out.push_str(&format!("    z.{var} = y.{var} + h*f0.{var};\n"));
    }
    out.push_str("    State fallback = z;\n");
    out.push_str(&format!(
        "    for (int i = 0; i < {NEWTON_MAX_ITERATIONS}; i++) {{\n        State fz = velocity(z);\n        State g;\n"
    ));
    for var in vars {
        let residual = if coefficient == 1.0 {
            format!("h*fz.{var}")
        } else {
            format!("{}*h*(f0.{var} + fz.{var})", glsl_float(coefficient)?)
        };
        out.push_str(&format!("        g.{var} = z.{var} - y.{var} - {residual};\n"));
    }
    out.push_str("        State d = newton_delta(z, g, h);\n");
    for var in vars {
        out.push_str(&format!("        z.{var} -= d.{var};\n"));
    }
    let size = vars
        .iter()
        .map(|var| format!("abs(d.{var})"))
        .reduce(|acc, next| format!("max({acc}, {next})"))
        .unwrap_or_else(|| "0.0".to_string());
    out.push_str(&format!(
        "        if ({size} < {tolerance}) {{\n            return z;\n        }}\n    }}\n    return fallback;\n}}\n"
    ));
    Ok(out)
}

fn step_explicit(
    tableau: &Tableau,
    y: &[Real],
    h: Real,
    velocity: &impl Fn(&[Real]) -> Result<Vec<Real>>,
) -> Result<Vec<Real>> {
    let mut stages: Vec<Vec<Real>> = Vec::with_capacity(tableau.stages());
    for row in tableau.a {
        let mut point = y.to_vec();
        for (weight, k) in row.iter().zip(&stages) {
            point = math::axpy(&point, h * weight, k);
        }
        stages.push(velocity(&point)?);
    }
    let mut next = y.to_vec();
    for (weight, k) in tableau.b.iter().zip(&stages) {
        next = math::axpy(&next, h * weight, k);
    }
    Ok(next)
}

fn step_implicit(
    coefficient: f64,
    y: &[Real],
    h: Real,
    velocity: &impl Fn(&[Real]) -> Result<Vec<Real>>,
) -> Result<Vec<Real>> {
    let f0 = velocity(y)?;
    let fallback = math::axpy(y, h, &f0);
    let mut z = fallback.clone();
    for _ in 0..NEWTON_MAX_ITERATIONS {
        let fz = velocity(&z)?;
        let residual: Vec<Real> = (0..y.len())
            .map(|i| {
                let slope = if coefficient == 1.0 {
                    fz[i]
                } else {
                    coefficient * (f0[i] + fz[i])
                };
                z[i] - y[i] - h * slope
            })
            .collect();
        let jacobian = math::finite_difference_jacobian(velocity, &z, JACOBIAN_FD_STEP)?;
        let newton = math::identity_matrix(y.len()) - jacobian * (coefficient * h);
        let Some(delta) = math::solve_linear(newton, &residual) else {
            return Ok(fallback);
        };
        z = math::axpy(&z, -1.0, &delta);
        if math::max_abs(&delta) < NEWTON_TOLERANCE {
            return Ok(if math::all_finite(&z) { z } else { fallback });
        }
    }
    Ok(fallback)
}
