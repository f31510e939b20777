//! Jacobians for implicit integration.
//!
//! The field Jacobian is taken symbolically from the expanded field. Implicit
//! steps need `(I - c·h·J)⁻¹`; it is inverted by the CAS when the result stays
//! small and otherwise assembled in the shader and inverted there.

use bevy::log::{info, warn};

use crate::cas::MatrixInverse;
use crate::config::{
    JACOBIAN_FD_STEP, MAX_EXPANDED_POWER, MAX_IMPLICIT_DIMENSIONS, SELF_CHECK_FIXTURE,
};
use crate::error::{FlowError, Result};
use crate::expr::{Expr, Lowerer, collapse_powers, glsl_float, parse, rewrite_atan2};
use crate::notebook::Notebook;

/// How `newton_delta` solves `(I - c·h·J(z)) d = g`.
#[derive(Debug, Clone, PartialEq)]
pub enum NewtonSolve {
    /// Closed-form adjugate and determinant.
    Symbolic {
        coefficient: f64,
        inverse: MatrixInverse,
    },
    /// Matrix assembled in the shader and inverted with `inverse()`.
    Numeric {
        coefficient: f64,
        matrix: Vec<Vec<Expr>>,
    },
    /// `J` estimated by central differences of `velocity`.
    FiniteDifference { coefficient: f64 },
}

#[derive(Debug, Clone)]
pub struct JacobianEngine {
    threshold: usize,
    self_checked: Option<bool>,
}

impl JacobianEngine {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            self_checked: None,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Result of the last self-check, if one ran.
    pub fn self_check_result(&self) -> Option<bool> {
        self.self_checked
    }

    /// `J[i][j] = ∂f_i/∂x_j` over already expanded field expressions. An entry
    /// that cannot be differentiated becomes `0`.
    pub fn field_jacobian(
        &mut self,
        notebook: &mut Notebook,
        field: &[Expr],
        vars: &[String],
    ) -> Vec<Vec<Expr>> {
        if self.self_checked.is_none() {
            self.self_check(notebook);
        }
        field
            .iter()
            .map(|component| {
                let prepared = rewrite_atan2(component);
                vars.iter()
                    .map(|var| match notebook.differentiate(&prepared, var) {
                        Ok(partial) => collapse_powers(&partial, MAX_EXPANDED_POWER),
                        Err(error) => {
                            warn!("∂({})/∂{} failed, using 0: {}", component, var, error);
                            Expr::num(0.0)
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Differentiate a fixed fixture on both sides of a cache clear and
    /// compare. Some backends answer differently right after a reset.
    pub fn self_check(&mut self, notebook: &mut Notebook) -> bool {
        let consistent = match parse(SELF_CHECK_FIXTURE) {
            Ok(fixture) => {
                let prepared = rewrite_atan2(&fixture);
                let first = notebook.differentiate(&prepared, "x");
                notebook.clear_cache();
                let second = notebook.differentiate(&prepared, "x");
                match (first, second) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }
            Err(_) => false,
        };
        if !consistent {
            warn!("CAS differentiation is not stable across a cache clear; derivatives may be unreliable");
        }
        self.self_checked = Some(consistent);
        consistent
    }

    /// Pick the Newton solve for `I - c·h·J`. `jacobian` is `None` when the
    /// velocity is wrapped by a chart or domain transform.
    pub fn newton_solve(
        &mut self,
        notebook: &mut Notebook,
        jacobian: Option<&[Vec<Expr>]>,
        coefficient: f64,
    ) -> Result<NewtonSolve> {
        let Some(jacobian) = jacobian else {
            return Ok(NewtonSolve::FiniteDifference { coefficient });
        };
        let size = jacobian.len();
        if size == 0 || size > MAX_IMPLICIT_DIMENSIONS {
            return Err(FlowError::application(format!(
                "implicit integrators support 1 to {MAX_IMPLICIT_DIMENSIONS} dimensions, got {size}"
            )));
        }
        let matrix = newton_matrix(notebook, jacobian, coefficient)?;
        match notebook.invert_matrix(&matrix) {
            Ok(inverse) if inverse.node_count() <= self.threshold => {
                Ok(NewtonSolve::Symbolic {
                    coefficient,
                    inverse,
                })
            }
            Ok(inverse) => {
                info!(
                    "Symbolic Newton inverse has {} nodes (limit {}), inverting in the shader",
                    inverse.node_count(),
                    self.threshold
                );
                Ok(NewtonSolve::Numeric {
                    coefficient,
                    matrix,
                })
            }
            Err(error) => {
                info!("Symbolic inversion failed ({}), inverting in the shader", error);
                Ok(NewtonSolve::Numeric {
                    coefficient,
                    matrix,
                })
            }
        }
    }
}

/// `I - c·h·J` with `h` left symbolic.
pub fn newton_matrix(
    notebook: &mut Notebook,
    jacobian: &[Vec<Expr>],
    coefficient: f64,
) -> Result<Vec<Vec<Expr>>> {
    let scale = Expr::mul(Expr::num(coefficient), Expr::ident("h"));
    jacobian
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(|(j, entry)| {
                    let identity = Expr::num(if i == j { 1.0 } else { 0.0 });
                    let term = Expr::mul(scale.clone(), entry.clone());
                    notebook.simplify(&Expr::sub(identity, term))
                })
                .collect()
        })
        .collect()
}

impl NewtonSolve {
    pub fn coefficient(&self) -> f64 {
        match self {
            NewtonSolve::Symbolic { coefficient, .. }
            | NewtonSolve::Numeric { coefficient, .. }
            | NewtonSolve::FiniteDifference { coefficient } => *coefficient,
        }
    }

    /// GLSL for `State newton_delta(State nz, State ng, float h)`. The
    /// finite-difference form expects `velocity` to be declared.
    pub fn emit_glsl(&self, vars: &[String]) -> Result<String> {
        let size = vars.len();
        if size == 0 || size > MAX_IMPLICIT_DIMENSIONS {
            return Err(FlowError::application(format!(
                "implicit integrators support 1 to {MAX_IMPLICIT_DIMENSIONS} dimensions, got {size}"
            )));
        }
        let lowerer = Lowerer::new().bind_identity(vars).bind("h", "h");
        let mut out = String::from("State newton_delta(State nz, State ng, float h) {\n");
        let unpack = |out: &mut String| {
            for var in vars {
                out.push_str(&format!("    float {var} = nz.{var};\n"));
            }
        };
        match self {
            NewtonSolve::Symbolic { inverse, .. } => {
                unpack(&mut out);
                out.push_str(&format!(
                    "    float det = {};\n    if (abs(det) < 1e-12) {{\n        return ng;\n    }}\n    State d;\n",
                    lowerer.lower(&inverse.determinant)?
                ));
                for (i, var) in vars.iter().enumerate() {
                    let terms = inverse.adjugate[i]
                        .iter()
                        .zip(vars)
                        .filter(|(entry, _)| !entry.is_number(0.0))
                        .map(|(entry, column)| {
                            lowerer
                                .lower(entry)
                                .map(|text| format!("({text})*ng.{column}"))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    let sum = if terms.is_empty() {
                        "0.0".to_string()
                    } else {
                        terms.join(" + ")
                    };
                    out.push_str(&format!("    d.{var} = ({sum})/det;\n"));
                }
                out.push_str("    return d;\n}\n");
            }
            NewtonSolve::Numeric { matrix, .. } => {
                unpack(&mut out);
                if size == 1 {
                    out.push_str(&format!(
                        "    float m = {};\n    State d;\n    d.{} = ng.{} / m;\n    return d;\n}}\n",
                        lowerer.lower(&matrix[0][0])?,
                        vars[0],
                        vars[0]
                    ));
                    return Ok(out);
                }
                // Column-major constructor.
                let mut columns = Vec::with_capacity(size * size);
                for j in 0..size {
                    for row in matrix {
                        columns.push(lowerer.lower(&row[j])?);
                    }
                }
                out.push_str(&format!("    mat{size} m = mat{size}({});\n", columns.join(", ")));
                out.push_str(&solve_tail(vars));
            }
            NewtonSolve::FiniteDifference { coefficient } => {
                let eps = glsl_float(JACOBIAN_FD_STEP)?;
                let c = glsl_float(*coefficient)?;
                if size == 1 {
                    let var = &vars[0];
                    out.push_str(&format!(
                        "    State zp = nz;\n    State zm = nz;\n    zp.{var} += {eps};\n    zm.{var} -= {eps};\n    \
                         float m = 1.0 - {c}*h*(velocity(zp).{var} - velocity(zm).{var})/(2.0*{eps});\n    \
                         State d;\n    d.{var} = ng.{var} / m;\n    return d;\n}}\n"
                    ));
                    return Ok(out);
                }
                out.push_str(&format!("    mat{size} m = mat{size}(1.0);\n"));
                for (j, var) in vars.iter().enumerate() {
                    out.push_str(&format!(
                        "    {{\n        State zp = nz;\n        State zm = nz;\n        zp.{var} += {eps};\n        \
                         zm.{var} -= {eps};\n        State fp = velocity(zp);\n        State fm = velocity(zm);\n"
                    ));
                    for (i, row) in vars.iter().enumerate() {
                        out.push_str(&format!(
                            "        m[{j}][{i}] -= {c}*h*(fp.{row} - fm.{row})/(2.0*{eps});\n"
                        ));
                    }
                    out.push_str("    }\n");
                }
                out.push_str(&solve_tail(vars));
            }
        }
        Ok(out)
    }
}

fn solve_tail(vars: &[String]) -> String {
    let size = vars.len();
    let components = vars
        .iter()
        .map(|var| format!("ng.{var}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = format!("    vec{size} r = inverse(m) * vec{size}({components});\n    State d;\n");
    for (i, var) in vars.iter().enumerate() {
        out.push_str(&format!("    d.{var} = r[{i}];\n"));
    }
    out.push_str("    return d;\n}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::SymbolicCas;
    use crate::expr::{Positional, eval};

    fn notebook() -> Notebook {
        Notebook::new(Box::new(SymbolicCas::separating()))
    }

    fn vars(n: usize) -> Vec<String> {
        crate::coords::cartesian_variables(n)
    }

    #[test]
    fn test_field_jacobian_of_lorenz() {
        let mut nb = notebook();
        let field: Vec<Expr> = ["10*(y - x)", "x*(28 - z) - y", "x*y - (8/3)*z"]
            .iter()
            .map(|s| parse(s).unwrap())
            .collect();
        let mut engine = JacobianEngine::new(2000);
        let j = engine.field_jacobian(&mut nb, &field, &vars(3));
        assert_eq!(engine.self_check_result(), Some(true));
        let at = [1.0, 2.0, 3.0];
        let names = vars(3);
        let scope = Positional {
            names: &names,
            values: &at,
        };
        let expected = [
            [-10.0, 10.0, 0.0],
            [25.0, -1.0, -1.0],
            [2.0, 1.0, -8.0 / 3.0],
        ];
        for i in 0..3 {
            for k in 0..3 {
                let value = eval(&j[i][k], &scope).unwrap();
                assert!((value - expected[i][k]).abs() < 1e-12, "J[{i}][{k}] = {value}");
            }
        }
    }

    #[test]
    fn test_atan2_entries_are_differentiated() {
        let mut nb = notebook();
        let field = vec![parse("atan2(y, x)").unwrap(), parse("x^5").unwrap()];
        let mut engine = JacobianEngine::new(2000);
        let j = engine.field_jacobian(&mut nb, &field, &vars(2));
        let names = vars(2);
        let scope = Positional {
            names: &names,
            values: &[1.0, 1.0],
        };
        assert!((eval(&j[0][0], &scope).unwrap() + 0.5).abs() < 1e-12);
        assert!((eval(&j[0][1], &scope).unwrap() - 0.5).abs() < 1e-12);
        assert!(!j[1][0].to_string().contains("^4"));
    }

    #[test]
    fn test_newton_solve_selection() {
        let mut nb = notebook();
        let j = vec![
            vec![parse("-1").unwrap(), Expr::num(0.0)],
            vec![Expr::num(0.0), parse("-1").unwrap()],
        ];
        let mut engine = JacobianEngine::new(2000);
        let solve = engine.newton_solve(&mut nb, Some(&j), 1.0).unwrap();
        assert!(matches!(solve, NewtonSolve::Symbolic { .. }));

        let mut tiny = JacobianEngine::new(1);
        let solve = tiny.newton_solve(&mut nb, Some(&j), 1.0).unwrap();
        assert!(matches!(solve, NewtonSolve::Numeric { .. }));
        let glsl = solve.emit_glsl(&vars(2)).unwrap();
        assert!(glsl.contains("mat2 m = mat2("));
        assert!(glsl.contains("inverse(m)"));

        let wrapped = engine.newton_solve(&mut nb, None, 0.5).unwrap();
        assert_eq!(wrapped, NewtonSolve::FiniteDifference { coefficient: 0.5 });

        let big = vec![vec![Expr::num(0.0); 5]; 5];
        let err = engine.newton_solve(&mut nb, Some(&big), 1.0).unwrap_err();
        assert_eq!(err.kind(), "workflow-application-failure");
    }

    #[test]
    fn test_symbolic_newton_glsl() {
        let mut nb = notebook();
        let j = vec![vec![parse("-1").unwrap()]];
        let mut engine = JacobianEngine::new(2000);
        let solve = engine.newton_solve(&mut nb, Some(&j), 1.0).unwrap();
        let glsl = solve.emit_glsl(&vars(1)).unwrap();
        assert!(glsl.starts_with("State newton_delta(State nz, State ng, float h)"));
        assert!(glsl.contains("float det = "));
        assert!(glsl.contains("if (abs(det) < 1e-12)"));
        assert!(glsl.contains("d.x = ((1.0)*ng.x)/det;"));
    }

    #[test]
    fn test_finite_difference_glsl() {
        let solve = NewtonSolve::FiniteDifference { coefficient: 1.0 };
        let glsl = solve.emit_glsl(&vars(3)).unwrap();
        assert!(glsl.contains("mat3 m = mat3(1.0);"));
        assert!(glsl.contains("m[2][1] -= 1.0*h*(fp.y - fm.y)/(2.0*0.001);"));
        assert!(glsl.contains("d.z = r[2];"));
    }
}
