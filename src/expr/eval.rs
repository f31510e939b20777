//! Numeric evaluation for probes, tests and expression expansion.

use std::collections::HashMap;

use crate::error::{FlowError, Result};

use super::ast::{Builtin, Expr, constant_value};
use super::function::FunctionTable;

/// Source of values for free identifiers.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl Scope for HashMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Scope for [(&str, f64)] {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }
}

impl Scope for &[(&str, f64)] {
    fn lookup(&self, name: &str) -> Option<f64> {
        (**self).lookup(name)
    }
}

impl<const N: usize> Scope for [(&str, f64); N] {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.as_slice().lookup(name)
    }
}

/// Positional binding of names to a value slice, e.g. `x, y, z` to a state.
pub struct Positional<'a> {
    pub names: &'a [String],
    pub values: &'a [f64],
}

impl Scope for Positional<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|idx| self.values.get(idx).copied())
    }
}

/// Evaluate `expr` using only built-ins, constants and `scope`.
pub fn eval(expr: &Expr, scope: &dyn Scope) -> Result<f64> {
    Evaluator::default().eval(expr, scope)
}

/// Evaluator that can also call user functions.
#[derive(Default, Clone, Copy)]
pub struct Evaluator<'a> {
    functions: Option<&'a FunctionTable>,
}

impl<'a> Evaluator<'a> {
    pub fn with_functions(functions: &'a FunctionTable) -> Self {
        Self {
            functions: Some(functions),
        }
    }

    pub fn eval(&self, expr: &Expr, scope: &dyn Scope) -> Result<f64> {
        match expr {
            Expr::Number(value) => Ok(*value),
            Expr::Ident(name) => {
                if let Some(value) = scope.lookup(name) {
                    return Ok(value);
                }
                if let Some(value) = constant_value(name) {
                    return Ok(value);
                }
                match self.functions.and_then(|table| table.get(name)) {
                    Some(def) if def.is_constant() => self.eval(&def.body, &[] as &[(&str, f64); 0]),
                    _ => Err(FlowError::unresolved(name.clone())),
                }
            }
            Expr::Neg(inner) => Ok(-self.eval(inner, scope)?),
            Expr::Binary { op, lhs, rhs } => {
                Ok(op.apply(self.eval(lhs, scope)?, self.eval(rhs, scope)?))
            }
            Expr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, scope))
                    .collect::<Result<Vec<_>>>()?;
                if let Some(def) = self.functions.and_then(|table| table.get(name)) {
                    if def.arity() != values.len() {
                        return Err(FlowError::ArityMismatch {
                            name: name.clone(),
                            expected: def.arity().to_string(),
                            found: values.len(),
                        });
                    }
                    let bound = Positional {
                        names: &def.params,
                        values: &values,
                    };
                    return self.eval(&def.body, &bound);
                }
                let builtin =
                    Builtin::lookup(name).ok_or_else(|| FlowError::unresolved(name.clone()))?;
                if !builtin.arity().accepts(values.len()) {
                    return Err(FlowError::ArityMismatch {
                        name: name.clone(),
                        expected: builtin.arity().to_string(),
                        found: values.len(),
                    });
                }
                Ok(builtin.eval(&values))
            }
        }
    }
}
