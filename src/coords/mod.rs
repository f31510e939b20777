//! Coordinate systems
//!
//! A chart maps Cartesian positions to native coordinates through one forward
//! expression per dimension. Field equations written in a chart are pulled
//! back to Cartesian velocities with `v = J⁻¹ · v_native(T(p))`.

pub mod catalog;

use bevy::log::{debug, info};

use crate::config::MAX_DIMENSIONS;
use crate::error::{FlowError, Result};
use crate::expr::{
    CARTESIAN_VARIABLES, Evaluator, Expr, FunctionTable, Lowerer, Positional, constant_value,
    lower::glsl_local_name, parse, rewrite_atan2,
};
use crate::expr::ast::Builtin;
use crate::notebook::Notebook;

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSystem {
    pub name: String,
    /// Native coordinate names, one per dimension.
    pub labels: Vec<String>,
    /// Native coordinate `i` as an expression in the Cartesian variables.
    pub forward: Vec<Expr>,
    /// Cartesian variable `j` as an expression in the labels, when known.
    pub inverse: Option<Vec<Expr>>,
}

/// Cartesian variable names for `n` dimensions.
pub fn cartesian_variables(n: usize) -> Vec<String> {
    CARTESIAN_VARIABLES
        .iter()
        .take(n)
        .map(|name| name.to_string())
        .collect()
}

impl CoordinateSystem {
    pub fn cartesian(dimensions: usize) -> Self {
        let vars = cartesian_variables(dimensions.clamp(1, MAX_DIMENSIONS));
        Self {
            name: format!("Cartesian {}D", vars.len()),
            forward: vars.iter().map(Expr::ident).collect(),
            inverse: Some(vars.iter().map(Expr::ident).collect()),
            labels: vars,
        }
    }

    pub fn polar() -> Result<Self> {
        Self::preset(
            "Polar 2D",
            &["r", "θ"],
            &["sqrt(x^2 + y^2)", "atan2(y, x)"],
            &["r*cos(θ)", "r*sin(θ)"],
        )
    }

    pub fn cylindrical() -> Result<Self> {
        Self::preset(
            "Cylindrical 3D",
            &["r", "θ", "z"],
            &["sqrt(x^2 + y^2)", "atan2(y, x)", "z"],
            &["r*cos(θ)", "r*sin(θ)", "z"],
        )
    }

    pub fn spherical() -> Result<Self> {
        Self::preset(
            "Spherical 3D",
            &["r", "θ", "φ"],
            &["sqrt(x^2 + y^2 + z^2)", "acos(z/sqrt(x^2 + y^2 + z^2))", "atan2(y, x)"],
            &["r*sin(θ)*cos(φ)", "r*sin(θ)*sin(φ)", "r*cos(θ)"],
        )
    }

    fn preset(name: &str, labels: &[&str], forward: &[&str], inverse: &[&str]) -> Result<Self> {
        Self::custom(name, labels, forward)?.with_inverse(inverse)
    }

    /// Build a user chart. The inverse is resolved later, from the catalog or
    /// by solving.
    pub fn custom(name: &str, labels: &[&str], forward: &[&str]) -> Result<Self> {
        let forward = forward
            .iter()
            .map(|source| parse(source))
            .collect::<Result<Vec<_>>>()?;
        let system = Self {
            name: name.to_string(),
            labels: labels.iter().map(|label| label.to_string()).collect(),
            forward,
            inverse: None,
        };
        system.validate()?;
        Ok(system)
    }

    pub fn with_inverse(mut self, inverse: &[&str]) -> Result<Self> {
        let inverse = inverse
            .iter()
            .map(|source| parse(source))
            .collect::<Result<Vec<_>>>()?;
        if inverse.len() != self.dimensions() {
            return Err(FlowError::application(format!(
                "{} expects {} inverse expression(s), got {}",
                self.name,
                self.dimensions(),
                inverse.len()
            )));
        }
        self.inverse = Some(inverse);
        Ok(self)
    }

    pub fn dimensions(&self) -> usize {
        self.labels.len()
    }

    pub fn cartesian_variables(&self) -> Vec<String> {
        cartesian_variables(self.dimensions())
    }

    pub fn is_cartesian(&self) -> bool {
        let vars = self.cartesian_variables();
        self.labels == vars
            && self
                .forward
                .iter()
                .zip(&vars)
                .all(|(expr, var)| matches!(expr, Expr::Ident(name) if name == var))
    }

    fn validate(&self) -> Result<()> {
        let n = self.dimensions();
        if n == 0 || n > MAX_DIMENSIONS {
            return Err(FlowError::application(format!(
                "{}: dimension must be between 1 and {MAX_DIMENSIONS}",
                self.name
            )));
        }
        if self.forward.len() != n {
            return Err(FlowError::application(format!(
                "{}: {} label(s) but {} forward transform(s)",
                self.name,
                n,
                self.forward.len()
            )));
        }
        for (idx, label) in self.labels.iter().enumerate() {
            if Builtin::lookup(label).is_some() || constant_value(label).is_some() {
                return Err(FlowError::application(format!(
                    "{}: label `{label}` is reserved",
                    self.name
                )));
            }
            if self.labels[..idx].contains(label) {
                return Err(FlowError::application(format!(
                    "{}: label `{label}` is used twice",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Compute everything the shader and the CPU mirror need: the inverse map
    /// and `J⁻¹`, through the notebook's CAS.
    pub fn resolve(&self, notebook: &mut Notebook) -> Result<ResolvedChart> {
        self.validate()?;
        if self.is_cartesian() {
            return Ok(ResolvedChart {
                system: self.clone(),
                functions: notebook.functions().clone(),
                jacobian: ChartJacobian::Identity,
            });
        }

        let vars = self.cartesian_variables();
        let functions = notebook.functions().clone();
        for expr in &self.forward {
            functions.check_references(expr, &vars)?;
        }
        let forward = self
            .forward
            .iter()
            .map(|expr| notebook.expand(expr))
            .collect::<Result<Vec<_>>>()?;

        let inverse = match &self.inverse {
            Some(inverse) => Some(inverse.clone()),
            None => catalog::lookup(&forward, &self.labels)
                .or_else(|| self.solve_inverse(notebook, &forward).ok()),
        };

        let jacobian = match inverse {
            Some(inverse) => {
                // J⁻¹ is the Jacobian of the inverse map, in native coordinates.
                let mut rows = Vec::with_capacity(inverse.len());
                for component in &inverse {
                    let prepared = rewrite_atan2(component);
                    let row = self
                        .labels
                        .iter()
                        .map(|label| notebook.differentiate(&prepared, label))
                        .collect::<Result<Vec<_>>>()?;
                    rows.push(row);
                }
                debug!("{}: J⁻¹ from the inverse map", self.name);
                ChartJacobian::FromInverse(rows)
            }
            None => {
                let mut rows = Vec::with_capacity(forward.len());
                for component in &forward {
                    let prepared = rewrite_atan2(component);
                    let row = vars
                        .iter()
                        .map(|var| notebook.differentiate(&prepared, var))
                        .collect::<Result<Vec<_>>>()?;
                    rows.push(row);
                }
                let inverted = notebook.invert_matrix(&rows)?;
                info!("{}: no closed-form inverse, inverting J symbolically", self.name);
                ChartJacobian::Symbolic(inverted.entries())
            }
        };

        Ok(ResolvedChart {
            system: Self {
                forward,
                ..self.clone()
            },
            functions,
            jacobian,
        })
    }

    /// Solve each forward equation for its Cartesian variable, substituting
    /// earlier solutions, and accept the result only if no Cartesian
    /// variable remains.
    fn solve_inverse(&self, notebook: &mut Notebook, forward: &[Expr]) -> Result<Vec<Expr>> {
        let vars = self.cartesian_variables();
        let mut solved: Vec<Expr> = Vec::with_capacity(vars.len());
        for (idx, var) in vars.iter().enumerate() {
            let equation = Expr::sub(forward[idx].clone(), Expr::ident(self.labels[idx].clone()));
            let mut solution = notebook
                .solve(&equation, var)?
                .into_iter()
                .next()
                .ok_or_else(|| FlowError::cas("no solution", equation.to_string()))?;
            let bindings: Vec<(String, Expr)> = vars[..idx]
                .iter()
                .cloned()
                .zip(solved.iter().cloned())
                .collect();
            solution = crate::expr::rewrite::replace_identifiers(&solution, &bindings);
            solved.push(solution);
        }
        // Later solutions may still reference earlier-unsolved variables.
        for (idx, solution) in solved.clone().iter().enumerate() {
            let bindings: Vec<(String, Expr)> = vars
                .iter()
                .cloned()
                .zip(solved.iter().cloned())
                .filter(|(name, _)| name != &vars[idx])
                .collect();
            solved[idx] = notebook.simplify(&crate::expr::rewrite::replace_identifiers(solution, &bindings))?;
        }
        if solved.iter().any(|expr| vars.iter().any(|var| expr.mentions(var))) {
            return Err(FlowError::cas(
                "forward transforms are coupled",
                self.forward.iter().map(Expr::to_string).collect::<Vec<_>>().join(", "),
            ));
        }
        Ok(solved)
    }
}

const IDENTITY_GLSL: &str = "State coord_forward(State p) {
    return p;
}

State cartesian_velocity(State p) {
    return field_velocity(p);
}
";

/// `J⁻¹` in the form the shader evaluates it.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartJacobian {
    Identity,
    /// `∂x_i/∂q_j` in the native labels, evaluated at `q = T(p)`.
    FromInverse(Vec<Vec<Expr>>),
    /// Symbolic inverse of `∂q_i/∂x_j` in the Cartesian variables.
    Symbolic(Vec<Vec<Expr>>),
}

/// A chart with its Jacobian resolved, ready for emission or CPU evaluation.
#[derive(Debug, Clone)]
pub struct ResolvedChart {
    pub system: CoordinateSystem,
    pub functions: FunctionTable,
    pub jacobian: ChartJacobian,
}

impl ResolvedChart {
    pub fn is_identity(&self) -> bool {
        matches!(self.jacobian, ChartJacobian::Identity)
    }

    pub fn dimensions(&self) -> usize {
        self.system.dimensions()
    }

    /// GLSL for `coord_forward` and `cartesian_velocity`. Expects `State`,
    /// `field_velocity` and the `uf_*` functions to be declared.
    pub fn emit_glsl(&self) -> Result<String> {
        let vars = self.system.cartesian_variables();
        if self.is_identity() {
            return Ok(IDENTITY_GLSL.to_string());
        }

        let mut out = String::new();
        out.push_str("State coord_forward(State p) {\n");
        out.push_str(&unpack(&vars, &vars, "p"));
        let cartesian = Lowerer::new()
            .bind_identity(vars.as_slice())
            .with_functions(&self.functions);
        out.push_str("    State q;\n");
        for (var, expr) in vars.iter().zip(&self.system.forward) {
            out.push_str(&format!("    q.{} = {};\n", var, cartesian.lower(expr)?));
        }
        out.push_str("    return q;\n}\n\n");

        out.push_str("State cartesian_velocity(State p) {\n");
        out.push_str("    State q = coord_forward(p);\n");
        out.push_str("    State vn = field_velocity(q);\n");
        let (matrix, lowerer) = match &self.jacobian {
            ChartJacobian::FromInverse(matrix) => {
                let locals: Vec<String> =
                    self.system.labels.iter().map(|l| glsl_local_name(l)).collect();
                out.push_str(&unpack(&locals, &vars, "q"));
                let mut lowerer = Lowerer::new().with_functions(&self.functions);
                for (label, local) in self.system.labels.iter().zip(&locals) {
                    lowerer = lowerer.bind(label.clone(), local.clone());
                }
                (matrix, lowerer)
            }
            ChartJacobian::Symbolic(matrix) => {
                out.push_str(&unpack(&vars, &vars, "p"));
                (matrix, cartesian.clone())
            }
            ChartJacobian::Identity => return Ok(IDENTITY_GLSL.to_string()),
        };
        out.push_str("    State vc;\n");
        for (i, var) in vars.iter().enumerate() {
            let terms = matrix[i]
                .iter()
                .zip(&vars)
                .filter(|(entry, _)| !entry.is_number(0.0))
                .map(|(entry, component)| {
                    lowerer
                        .lower(entry)
                        .map(|text| format!("({})*vn.{}", text, component))
                })
                .collect::<Result<Vec<_>>>()?;
            let sum = if terms.is_empty() {
                "0.0".to_string()
            } else {
                terms.join(" + ")
            };
            out.push_str(&format!("    vc.{} = {};\n", var, sum));
        }
        out.push_str("    return vc;\n}\n");
        Ok(out)
    }

    /// Native coordinates of a Cartesian point.
    pub fn forward(&self, point: &[f64]) -> Result<Vec<f64>> {
        let vars = self.system.cartesian_variables();
        let scope = Positional {
            names: &vars,
            values: point,
        };
        let evaluator = Evaluator::with_functions(&self.functions);
        self.system
            .forward
            .iter()
            .map(|expr| evaluator.eval(expr, &scope))
            .collect()
    }

    /// Cartesian velocity at `point`, given the native field `native`.
    pub fn cartesian_velocity(
        &self,
        point: &[f64],
        native: impl Fn(&[f64]) -> Result<Vec<f64>>,
    ) -> Result<Vec<f64>> {
        if self.is_identity() {
            return native(point);
        }
        let q = self.forward(point)?;
        let vn = native(&q)?;
        let evaluator = Evaluator::with_functions(&self.functions);
        let vars = self.system.cartesian_variables();
        let (matrix, names, values) = match &self.jacobian {
            ChartJacobian::FromInverse(matrix) => (matrix, &self.system.labels, q.as_slice()),
            ChartJacobian::Symbolic(matrix) => (matrix, &vars, point),
            ChartJacobian::Identity => return Ok(vn),
        };
        let scope = Positional { names, values };
        matrix
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&vn)
                    .try_fold(0.0, |acc, (entry, component)| -> Result<f64> {
                        Ok(acc + evaluator.eval(entry, &scope)? * component)
                    })
            })
            .collect()
    }
}

/// `float <local> = <source>.<field>;` for each pair.
fn unpack(locals: &[String], fields: &[String], source: &str) -> String {
    locals
        .iter()
        .zip(fields)
        .map(|(local, field)| format!("    float {} = {}.{};\n", local, source, field))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::SymbolicCas;

    fn notebook() -> Notebook {
        Notebook::new(Box::new(SymbolicCas::separating()))
    }

    #[test]
    fn test_presets() {
        assert!(CoordinateSystem::cartesian(3).is_cartesian());
        assert!(!CoordinateSystem::polar().unwrap().is_cartesian());
        assert_eq!(CoordinateSystem::spherical().unwrap().dimensions(), 3);
        assert_eq!(CoordinateSystem::cartesian(9).dimensions(), MAX_DIMENSIONS);
        for chart in [
            CoordinateSystem::polar(),
            CoordinateSystem::cylindrical(),
            CoordinateSystem::spherical(),
        ] {
            let chart = chart.unwrap();
            assert_eq!(chart.forward.len(), chart.dimensions());
            assert_eq!(chart.inverse.as_ref().map(|inverse| inverse.len()), Some(chart.dimensions()));
        }
    }

    #[test]
    fn test_preset_rejects_malformed_sources() {
        let err = CoordinateSystem::preset("broken", &["r", "s"], &["x", "y"], &["r*", "s"]).unwrap_err();
        assert_eq!(err.kind(), "parse-error");
        assert!(CoordinateSystem::preset("broken", &["r", "s"], &["x", "y +"], &["r", "s"]).is_err());
        assert!(CoordinateSystem::preset("short", &["r", "s"], &["x", "y"], &["r"]).is_err());
    }

    #[test]
    fn test_custom_validation() {
        assert!(CoordinateSystem::custom("bad", &["r", "r"], &["x", "y"]).is_err());
        assert!(CoordinateSystem::custom("bad", &["pi", "s"], &["x", "y"]).is_err());
        assert!(CoordinateSystem::custom("bad", &["a"], &["x", "y"]).is_err());
    }

    #[test]
    fn test_polar_velocity_matches_hand_pullback() {
        let mut nb = notebook();
        let chart = CoordinateSystem::polar().unwrap().resolve(&mut nb).unwrap();
        // dr/dt = 1, dθ/dt = 0 is the radial unit vector field.
        let v = chart
            .cartesian_velocity(&[3.0, 4.0], |_| Ok(vec![1.0, 0.0]))
            .unwrap();
        assert!((v[0] - 0.6).abs() < 1e-12 && (v[1] - 0.8).abs() < 1e-12);
        // dθ/dt = 1 rotates counter-clockwise with speed r.
        let v = chart
            .cartesian_velocity(&[3.0, 4.0], |_| Ok(vec![0.0, 1.0]))
            .unwrap();
        assert!((v[0] + 4.0).abs() < 1e-12 && (v[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_catalog_and_symbolic_paths_agree() {
        let mut nb = notebook();
        let catalog = CoordinateSystem::custom("polar", &["r", "t"], &["sqrt(x*x + y*y)", "atan(y, x)"])
            .unwrap()
            .resolve(&mut nb)
            .unwrap();
        assert!(matches!(catalog.jacobian, ChartJacobian::FromInverse(_)));

        let skew = CoordinateSystem::custom("skew", &["a", "b"], &["x + y", "x - y^3"])
            .unwrap()
            .resolve(&mut nb)
            .unwrap();
        assert!(matches!(skew.jacobian, ChartJacobian::Symbolic(_)));
        // J = [[1, 1], [1, -3y²]]; J·v must give back the native velocity.
        let (px, py) = (0.4_f64, 0.9_f64);
        let v = skew.cartesian_velocity(&[px, py], |_| Ok(vec![1.0, 2.0])).unwrap();
        let back = [v[0] + v[1], v[0] - 3.0 * py * py * v[1]];
        assert!((back[0] - 1.0).abs() < 1e-9 && (back[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_solved_inverse_for_decoupled_chart() {
        let mut nb = notebook();
        let chart = CoordinateSystem::custom("stretch", &["a", "b"], &["2*x", "y^3"])
            .unwrap()
            .resolve(&mut nb)
            .unwrap();
        assert!(matches!(chart.jacobian, ChartJacobian::FromInverse(_)));
        let v = chart.cartesian_velocity(&[1.0, 2.0], |_| Ok(vec![2.0, 12.0])).unwrap();
        assert!((v[0] - 1.0).abs() < 1e-9 && (v[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_emit_glsl_mentions_labels() {
        let mut nb = notebook();
        let chart = CoordinateSystem::polar().unwrap().resolve(&mut nb).unwrap();
        let glsl = chart.emit_glsl().unwrap();
        assert!(glsl.contains("State coord_forward(State p)"));
        assert!(glsl.contains("q.y = atan(y, x);"));
        assert!(glsl.contains("float l_r = q.x;"));
        assert!(glsl.contains("vn.y"));
        let identity = CoordinateSystem::cartesian(2).resolve(&mut nb).unwrap();
        assert!(identity.emit_glsl().unwrap().contains("return field_velocity(p);"));
    }
}
