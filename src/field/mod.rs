//! Field equations
//!
//! Turns the N user expressions into GLSL in three batch phases: validate
//! every expression, expand every expression against the notebook, lower
//! every expression. A phase reports all N outcomes before the next starts.

pub mod workflow;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, IndexedError, Result};
use crate::expr::{Expr, FunctionTable, Lowerer, parse};
use crate::notebook::Notebook;

pub use workflow::{FieldRequest, FieldWorkflow, PendingCompile, WorkflowMode};

/// A field that made it through all three phases.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedField {
    /// The user text, echoed back.
    pub expressions: Vec<String>,
    pub parsed: Vec<Expr>,
    /// User functions inlined; what the CAS and the CPU probes work on.
    pub expanded: Vec<Expr>,
    /// GLSL in `p.<var>`, calling the declared `uf_*` functions.
    pub lowered: Vec<String>,
}

/// The labels a field is written in and the state fields they bind to.
pub struct FieldEquations<'a> {
    labels: &'a [String],
    vars: &'a [String],
}

impl<'a> FieldEquations<'a> {
    pub fn new(labels: &'a [String], vars: &'a [String]) -> Self {
        Self { labels, vars }
    }

    /// Parse and resolve one expression.
    pub fn validate_one(&self, source: &str, functions: &FunctionTable) -> Result<Expr> {
        if source.trim().is_empty() {
            return Err(FlowError::parse("empty expression", 0, ""));
        }
        let expr = parse(source)?;
        functions.check_references(&expr, self.labels)?;
        Ok(expr)
    }

    pub fn lower_one(&self, expr: &Expr, functions: &FunctionTable) -> Result<String> {
        let mut lowerer = Lowerer::new().with_functions(functions);
        for (label, var) in self.labels.iter().zip(self.vars) {
            lowerer = lowerer.bind(label.clone(), format!("p.{var}"));
        }
        lowerer.lower(expr)
    }

    /// Run all phases. On failure every index is reported, in order.
    pub fn generate(
        &self,
        notebook: &mut Notebook,
        expressions: &[String],
    ) -> std::result::Result<GeneratedField, Vec<IndexedError>> {
        let functions = notebook.functions().clone();

        let parsed = batch(
            expressions,
            expressions
                .iter()
                .map(|source| self.validate_one(source, &functions))
                .collect(),
        )?;
        let expanded = batch(
            expressions,
            parsed.iter().map(|expr| notebook.expand(expr)).collect(),
        )?;
        let lowered = batch(
            expressions,
            parsed
                .iter()
                .map(|expr| self.lower_one(expr, &functions))
                .collect(),
        )?;

        Ok(GeneratedField {
            expressions: expressions.to_vec(),
            parsed,
            expanded,
            lowered,
        })
    }
}

/// All values when every result is `Ok`, otherwise one entry per index.
fn batch<T>(
    expressions: &[String],
    results: Vec<Result<T>>,
) -> std::result::Result<Vec<T>, Vec<IndexedError>> {
    if results.iter().all(|result| result.is_ok()) {
        return Ok(results.into_iter().flatten().collect());
    }
    Err(results
        .into_iter()
        .zip(expressions)
        .enumerate()
        .map(|(index, (result, expression))| IndexedError {
            index,
            expression: expression.clone(),
            error: result.err(),
        })
        .collect())
}

/// How particles are colored before the gradient lookup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    /// Speed relative to the probed maximum.
    #[default]
    Speed,
    /// Direction of motion in the first two dimensions.
    Angle,
    /// A user expression in the Cartesian variables and `speed`, clamped to `[0, 1]`.
    Expression(String),
}

impl ColorMode {
    /// GLSL float in `p`, `vel` and `speed`.
    pub fn glsl(&self, vars: &[String], functions: &FunctionTable) -> Result<String> {
        match self {
            ColorMode::Speed => {
                Ok("clamp(speed / max(u_max_velocity, 0.000001), 0.0, 1.0)".to_string())
            }
            ColorMode::Angle => {
                let x = vars.first().map_or("0.0".to_string(), |v| format!("vel.{v}"));
                let y = vars.get(1).map_or("0.0".to_string(), |v| format!("vel.{v}"));
                Ok(format!("atan({y}, {x}) / 6.2831853 + 0.5"))
            }
            ColorMode::Expression(source) => {
                let expr = parse(source)?;
                let mut bound = vars.to_vec();
                bound.push("speed".to_string());
                functions.check_references(&expr, &bound)?;
                let mut lowerer = Lowerer::new().with_functions(functions).bind("speed", "speed");
                for var in vars {
                    lowerer = lowerer.bind(var.clone(), format!("p.{var}"));
                }
                Ok(format!("clamp({}, 0.0, 1.0)", lowerer.lower(&expr)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::SymbolicCas;
    use crate::coords::cartesian_variables;
    use crate::notebook::CellKind;

    fn strings(sources: &[&str]) -> Vec<String> {
        sources.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_generate_reports_every_index() {
        let mut nb = Notebook::new(Box::new(SymbolicCas::separating()));
        let vars = cartesian_variables(3);
        let equations = FieldEquations::new(&vars, &vars);
        let errors = equations
            .generate(&mut nb, &strings(&["x", "q(x)", "z"]))
            .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].is_ok() && errors[2].is_ok());
        assert_eq!(errors[1].error.as_ref().unwrap().kind(), "unresolved-identifier");
        assert_eq!(errors[1].expression, "q(x)");
    }

    #[test]
    fn test_labels_bind_to_state_fields() {
        let mut nb = Notebook::new(Box::new(SymbolicCas::separating()));
        let labels = strings(&["r", "θ"]);
        let vars = cartesian_variables(2);
        let field = FieldEquations::new(&labels, &vars)
            .generate(&mut nb, &strings(&["r*(1 - r)", "1"]))
            .unwrap();
        assert_eq!(field.lowered[0], "p.x*(1.0 - p.x)");
        assert_eq!(field.lowered[1], "1.0");
    }

    #[test]
    fn test_user_functions_expand_but_lower_as_calls() {
        let mut nb = Notebook::new(Box::new(SymbolicCas::separating()));
        let id = nb.add_cell(CellKind::Code, "g(u) = sin(u)^2 + cos(u)^2");
        nb.evaluate_cell(&id).unwrap();
        let vars = cartesian_variables(2);
        let field = FieldEquations::new(&vars, &vars)
            .generate(&mut nb, &strings(&["g(x)", "g(y)"]))
            .unwrap();
        assert!(field.lowered[0].contains("uf_g(p.x)"));
        assert!(!field.expanded[0].to_string().contains("g("));
        assert!(FieldEquations::new(&vars, &vars)
            .validate_one("  ", nb.functions())
            .is_err());
    }

    #[test]
    fn test_color_modes() {
        let vars = cartesian_variables(2);
        let functions = FunctionTable::new();
        assert!(ColorMode::Angle.glsl(&vars, &functions).unwrap().starts_with("atan(vel.y, vel.x)"));
        let expr = ColorMode::Expression("speed/10 + x".to_string())
            .glsl(&vars, &functions)
            .unwrap();
        assert!(expr.starts_with("clamp(") && expr.contains("p.x") && expr.contains("speed"));
        assert!(ColorMode::Expression("k".to_string()).glsl(&vars, &functions).is_err());
    }
}
