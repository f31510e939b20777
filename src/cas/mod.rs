//! Symbolic algebra
//!
//! The [`CasEngine`] trait is the only way the rest of the crate reaches
//! symbolic operations. Backends advertise what they can do through a
//! [`Capabilities`] value; `persistent_notebook_context` decides whether a
//! cache clear also wipes user definitions.

pub mod diff;
pub mod matrix;
pub mod simplify;
pub mod solve;

use std::collections::HashMap;

use bevy::log::debug;

use crate::config::CasBackend;
use crate::error::Result;
use crate::expr::{self, Expr, FunctionDef, FunctionTable, Lowerer};

pub use matrix::{MatrixInverse, SymbolicMatrix};

/// Optional operations a backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub differentiate: bool,
    pub integrate: bool,
    pub solve: bool,
    pub matrices: bool,
    pub simplify: bool,
    /// Cache clears leave installed functions and variables alone.
    pub persistent_notebook_context: bool,
}

pub trait CasEngine: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn parse(&self, source: &str) -> Result<Expr>;

    /// Expand installed definitions and simplify. Fully numeric input folds to
    /// a number.
    fn evaluate(&mut self, expr: &Expr) -> Result<Expr>;

    fn differentiate(&mut self, expr: &Expr, variable: &str) -> Result<Expr>;

    fn simplify(&mut self, expr: &Expr) -> Result<Expr>;

    /// Solutions of `expr = 0` for `variable`.
    fn solve(&mut self, expr: &Expr, variable: &str) -> Result<Vec<Expr>>;

    fn invert_matrix(&mut self, matrix: &[Vec<Expr>]) -> Result<MatrixInverse>;

    /// Bind `name` to a constant expression.
    fn set_variable(&mut self, name: &str, value: Expr) -> Result<()>;

    fn set_function(&mut self, def: FunctionDef) -> Result<()>;

    /// GLSL text for `expr` with free identifiers emitted by name.
    fn to_target_code(&self, expr: &Expr) -> Result<String>;

    fn to_display(&self, expr: &Expr) -> String;

    /// Drop memoized results. Non-persistent backends also drop definitions.
    fn clear_cache(&mut self);

    /// Drop every installed function and variable along with memoized results.
    fn clear_definitions(&mut self);

    /// Definitions currently installed.
    fn functions(&self) -> &FunctionTable;
}

/// Build the backend selected by `backend`.
pub fn create_engine(backend: CasBackend) -> Box<dyn CasEngine> {
    Box::new(SymbolicCas::new(backend))
}

/// Built-in symbolic backend with memoized differentiation and simplification.
#[derive(Debug, Clone)]
pub struct SymbolicCas {
    backend: CasBackend,
    functions: FunctionTable,
    cache: HashMap<String, Expr>,
}

impl SymbolicCas {
    pub fn new(backend: CasBackend) -> Self {
        Self {
            backend,
            functions: FunctionTable::new(),
            cache: HashMap::new(),
        }
    }

    pub fn separating() -> Self {
        Self::new(CasBackend::Separating)
    }

    pub fn volatile() -> Self {
        Self::new(CasBackend::Volatile)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn expand(&self, expr: &Expr) -> Result<Expr> {
        self.functions.expand(expr)
    }

    fn install(&mut self, def: FunctionDef) -> Result<()> {
        self.functions.check_definition(&def)?;
        // Memoized results may depend on the previous body.
        self.cache.clear();
        self.functions.insert(def);
        Ok(())
    }
}

impl CasEngine for SymbolicCas {
    fn name(&self) -> &str {
        match self.backend {
            CasBackend::Separating => "symbolic (separating)",
            CasBackend::Volatile => "symbolic (volatile)",
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            differentiate: true,
            integrate: false,
            solve: true,
            matrices: true,
            simplify: true,
            persistent_notebook_context: self.backend == CasBackend::Separating,
        }
    }

    fn parse(&self, source: &str) -> Result<Expr> {
        expr::parse(source)
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Expr> {
        self.functions.check_references(expr, &free_variables(expr, &self.functions))?;
        let expanded = self.expand(expr)?;
        self.simplify(&expanded)
    }

    fn differentiate(&mut self, expr: &Expr, variable: &str) -> Result<Expr> {
        let key = format!("d/d{variable}:{expr}");
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        let expanded = self.expand(expr)?;
        let derivative = diff::differentiate(&expanded, variable)?;
        self.cache.insert(key, derivative.clone());
        Ok(derivative)
    }

    fn simplify(&mut self, expr: &Expr) -> Result<Expr> {
        let key = format!("simplify:{expr}");
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        let simplified = simplify::simplify_fully(expr);
        self.cache.insert(key, simplified.clone());
        Ok(simplified)
    }

    fn solve(&mut self, expr: &Expr, variable: &str) -> Result<Vec<Expr>> {
        let expanded = self.expand(expr)?;
        solve::solve(&expanded, variable)
    }

    fn invert_matrix(&mut self, matrix: &[Vec<Expr>]) -> Result<MatrixInverse> {
        let expanded = matrix
            .iter()
            .map(|row| row.iter().map(|entry| self.expand(entry)).collect())
            .collect::<Result<Vec<Vec<Expr>>>>()?;
        matrix::invert(&expanded)
    }

    fn set_variable(&mut self, name: &str, value: Expr) -> Result<()> {
        self.install(FunctionDef::new(name, Vec::new(), value))
    }

    fn set_function(&mut self, def: FunctionDef) -> Result<()> {
        self.install(def)
    }

    fn to_target_code(&self, expr: &Expr) -> Result<String> {
        let free = free_variables(expr, &self.functions);
        Lowerer::new()
            .bind_identity(free.as_slice())
            .with_functions(&self.functions)
            .lower(expr)
    }

    fn to_display(&self, expr: &Expr) -> String {
        expr.map_bottom_up(&mut |node| match node {
            Expr::Ident(name) if name == "pi" => Expr::ident("π"),
            other => other,
        })
        .to_string()
    }

    fn clear_cache(&mut self) {
        debug!(
            "{}: clearing {} cached result(s)",
            self.name(),
            self.cache.len()
        );
        self.cache.clear();
        if self.backend == CasBackend::Volatile {
            self.functions.clear();
        }
    }

    fn clear_definitions(&mut self) {
        self.cache.clear();
        self.functions.clear();
    }

    fn functions(&self) -> &FunctionTable {
        &self.functions
    }
}

/// Free identifiers of `expr` that are not installed constants.
fn free_variables(expr: &Expr, functions: &FunctionTable) -> Vec<String> {
    expr::free_identifiers(expr)
        .into_iter()
        .filter(|name| !functions.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;

    fn g() -> FunctionDef {
        FunctionDef::new(
            "g",
            vec!["u".into()],
            parse("sin(u)^2 + cos(u)^2").unwrap(),
        )
    }

    #[test]
    fn test_policies_on_cache_clear() {
        let mut separating = SymbolicCas::separating();
        separating.set_function(g()).unwrap();
        separating.clear_cache();
        assert!(separating.functions().contains("g"));
        assert!(separating.capabilities().persistent_notebook_context);

        let mut volatile = SymbolicCas::volatile();
        volatile.set_function(g()).unwrap();
        volatile.clear_cache();
        assert!(!volatile.functions().contains("g"));
        assert!(!volatile.capabilities().persistent_notebook_context);
    }

    #[test]
    fn test_clear_definitions_on_both_policies() {
        for mut cas in [SymbolicCas::separating(), SymbolicCas::volatile()] {
            cas.set_function(g()).unwrap();
            cas.differentiate(&parse("g(x)").unwrap(), "x").unwrap();
            cas.clear_definitions();
            assert!(!cas.functions().contains("g"));
            assert_eq!(cas.cache_len(), 0);
            assert!(cas.evaluate(&parse("g(1)").unwrap()).is_err());
        }
    }

    #[test]
    fn test_differentiate_through_user_function() {
        let mut cas = SymbolicCas::separating();
        cas.set_function(FunctionDef::new("sq", vec!["a".into()], parse("a*a").unwrap()))
            .unwrap();
        let derivative = cas.differentiate(&parse("sq(x) + y").unwrap(), "x").unwrap();
        assert_eq!(derivative.to_string(), "2*x");
        assert_eq!(cas.cache_len(), 1);
        let again = cas.differentiate(&parse("sq(x) + y").unwrap(), "x").unwrap();
        assert_eq!(again, derivative);
        assert_eq!(cas.cache_len(), 1);
    }

    #[test]
    fn test_evaluate_variables_and_display() {
        let mut cas = SymbolicCas::volatile();
        cas.set_variable("k", parse("3").unwrap()).unwrap();
        let value = cas.evaluate(&parse("2*k + 1").unwrap()).unwrap();
        assert_eq!(value, Expr::num(7.0));
        assert_eq!(cas.to_display(&parse("2*pi").unwrap()), "2*π");
        assert_eq!(cas.to_target_code(&parse("k*x^2").unwrap()).unwrap(), "uf_k()*x*x");
    }

    #[test]
    fn test_rejects_reserved_and_recursive_definitions() {
        let mut cas = SymbolicCas::separating();
        assert!(cas.set_function(FunctionDef::new("sin", vec!["a".into()], parse("a").unwrap())).is_err());
        cas.set_function(FunctionDef::new("f", vec!["a".into()], parse("a").unwrap()))
            .unwrap();
        cas.set_function(FunctionDef::new("h", vec!["a".into()], parse("f(a)").unwrap()))
            .unwrap();
        let err = cas
            .set_function(FunctionDef::new("f", vec!["a".into()], parse("h(a)").unwrap()))
            .unwrap_err();
        assert_eq!(err.kind(), "recursion");
    }
}
