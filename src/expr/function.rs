//! User-defined functions and the table that resolves them.

use indexmap::IndexMap;

use crate::error::{FlowError, Result};

use super::ast::{Builtin, Expr, constant_value};

/// A named function `name(params) = body`. Nullary definitions double as
/// notebook constants (`k = 2`).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>, params: Vec<String>, body: Expr) -> Self {
        Self {
            name: name.into(),
            params,
            body,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_constant(&self) -> bool {
        self.params.is_empty()
    }

    /// Names of user functions this body calls, in first-use order.
    pub fn callees<'a>(&'a self, table: &'a FunctionTable) -> Vec<&'a str> {
        let mut found: Vec<&str> = Vec::new();
        self.body.walk(&mut |node| {
            let name = match node {
                Expr::Call { name, .. } => name.as_str(),
                Expr::Ident(name) if !self.params.contains(name) => name.as_str(),
                _ => return,
            };
            if let Some((_, key, _)) = table.functions.get_full(name) {
                if !found.contains(&key.as_str()) {
                    found.push(key.as_str());
                }
            }
        });
        found
    }
}

impl std::fmt::Display for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.params.is_empty() {
            write!(f, "{} = {}", self.name, self.body)
        } else {
            write!(f, "{}({}) = {}", self.name, self.params.join(", "), self.body)
        }
    }
}

/// Ordered set of user functions. Later definitions of the same name replace
/// earlier ones in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionTable {
    functions: IndexMap<String, FunctionDef>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: FunctionDef) {
        self.functions.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FunctionDef> {
        self.functions.shift_remove(name)
    }

    pub fn clear(&mut self) {
        self.functions.clear();
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionDef> {
        self.functions.values()
    }

    /// Check that `def` could be installed: the body only references its
    /// parameters, constants, built-ins and existing functions with matching
    /// arity, and installing it would not create a cycle.
    pub fn check_definition(&self, def: &FunctionDef) -> Result<()> {
        if Builtin::lookup(&def.name).is_some() || constant_value(&def.name).is_some() {
            return Err(FlowError::cas(
                format!("`{}` is a reserved name", def.name),
                def.to_string(),
            ));
        }
        let mut scratch = self.clone();
        scratch.insert(def.clone());
        scratch.check_references(&def.body, &def.params)?;
        scratch.dependency_order().map(|_| ())
    }

    /// Validate every identifier and call in `expr` against this table,
    /// treating `variables` as bound.
    pub fn check_references(&self, expr: &Expr, variables: &[String]) -> Result<()> {
        let mut failure = None;
        expr.walk(&mut |node| {
            if failure.is_some() {
                return;
            }
            match node {
                Expr::Ident(name) => {
                    let known = variables.iter().any(|v| v == name)
                        || constant_value(name).is_some()
                        || self.get(name).is_some_and(FunctionDef::is_constant);
                    if !known {
                        failure = Some(FlowError::unresolved(name.clone()));
                    }
                }
                Expr::Call { name, args } => {
                    failure = self.check_call(name, args.len()).err();
                }
                _ => {}
            }
        });
        failure.map_or(Ok(()), Err)
    }

    /// Arity check for a call to `name` with `count` arguments.
    pub fn check_call(&self, name: &str, count: usize) -> Result<()> {
        if let Some(def) = self.get(name) {
            if def.arity() != count {
                return Err(FlowError::ArityMismatch {
                    name: name.to_string(),
                    expected: def.arity().to_string(),
                    found: count,
                });
            }
            return Ok(());
        }
        if let Some(builtin) = Builtin::lookup(name) {
            if !builtin.arity().accepts(count) {
                return Err(FlowError::ArityMismatch {
                    name: name.to_string(),
                    expected: builtin.arity().to_string(),
                    found: count,
                });
            }
            return Ok(());
        }
        Err(FlowError::unresolved(name))
    }

    /// Definitions ordered so that every function appears after the
    /// functions it calls. Fails on recursion.
    pub fn dependency_order(&self) -> Result<Vec<&FunctionDef>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }

        fn visit<'a>(
            table: &'a FunctionTable,
            idx: usize,
            marks: &mut [Mark],
            order: &mut Vec<&'a FunctionDef>,
        ) -> Result<()> {
            let Some((_, def)) = table.functions.get_index(idx) else {
                return Ok(());
            };
            match marks[idx] {
                Mark::Done => return Ok(()),
                Mark::Visiting => {
                    return Err(FlowError::Recursion {
                        name: def.name.clone(),
                    });
                }
                Mark::Unvisited => {}
            }
            marks[idx] = Mark::Visiting;
            for callee in def.callees(table) {
                if let Some(callee_idx) = table.functions.get_index_of(callee) {
                    visit(table, callee_idx, marks, order)?;
                }
            }
            marks[idx] = Mark::Done;
            order.push(def);
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.functions.len()];
        let mut order = Vec::with_capacity(self.functions.len());
        for idx in 0..self.functions.len() {
            visit(self, idx, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    /// Inline every user function appearing in `expr` until none remain.
    pub fn expand(&self, expr: &Expr) -> Result<Expr> {
        self.expand_depth(expr, 0)
    }

    fn expand_depth(&self, expr: &Expr, depth: usize) -> Result<Expr> {
        if depth > self.functions.len() + 1 {
            return Err(FlowError::Recursion {
                name: expr.to_string(),
            });
        }
        let expanded = match expr {
            Expr::Number(_) => expr.clone(),
            Expr::Ident(name) => match self.get(name) {
                Some(def) if def.is_constant() => self.expand_depth(&def.body, depth + 1)?,
                _ => expr.clone(),
            },
            Expr::Neg(inner) => Expr::neg(self.expand_depth(inner, depth)?),
            Expr::Binary { op, lhs, rhs } => Expr::binary(
                *op,
                self.expand_depth(lhs, depth)?,
                self.expand_depth(rhs, depth)?,
            ),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.expand_depth(arg, depth))
                    .collect::<Result<Vec<_>>>()?;
                match self.get(name) {
                    Some(def) => {
                        self.check_call(name, args.len())?;
                        let body = substitute(&def.body, &def.params, &args);
                        self.expand_depth(&body, depth + 1)?
                    }
                    None => Expr::call(name.clone(), args),
                }
            }
        };
        Ok(expanded)
    }

    /// Whether any user function name syntactically appears in `expr`.
    pub fn is_referenced_by(&self, expr: &Expr) -> bool {
        let mut found = false;
        expr.walk(&mut |node| match node {
            Expr::Call { name, .. } | Expr::Ident(name) if self.contains(name) => found = true,
            _ => {}
        });
        found
    }
}

/// Replace each parameter identifier with the matching argument, in one pass
/// so arguments mentioning parameter names are not substituted twice.
pub fn substitute(body: &Expr, params: &[String], args: &[Expr]) -> Expr {
    match body {
        Expr::Number(_) => body.clone(),
        Expr::Ident(name) => params
            .iter()
            .position(|param| param == name)
            .and_then(|idx| args.get(idx))
            .cloned()
            .unwrap_or_else(|| body.clone()),
        Expr::Neg(inner) => Expr::neg(substitute(inner, params, args)),
        Expr::Binary { op, lhs, rhs } => Expr::binary(
            *op,
            substitute(lhs, params, args),
            substitute(rhs, params, args),
        ),
        Expr::Call { name, args: call_args } => Expr::call(
            name.clone(),
            call_args
                .iter()
                .map(|arg| substitute(arg, params, args))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;

    fn def(name: &str, params: &[&str], body: &str) -> FunctionDef {
        FunctionDef::new(
            name,
            params.iter().map(|p| p.to_string()).collect(),
            parse(body).unwrap(),
        )
    }

    #[test]
    fn test_expand_nested_functions() {
        let mut table = FunctionTable::new();
        table.insert(def("sq", &["a"], "a*a"));
        table.insert(def("g", &["u"], "sq(sin(u)) + sq(cos(u))"));
        let expanded = table.expand(&parse("g(x)").unwrap()).unwrap();
        assert_eq!(expanded.to_string(), "sin(x)*sin(x) + cos(x)*cos(x)");
    }

    #[test]
    fn test_substitution_is_simultaneous() {
        let body = parse("a - b").unwrap();
        let out = substitute(
            &body,
            &["a".into(), "b".into()],
            &[parse("b").unwrap(), parse("a").unwrap()],
        );
        assert_eq!(out.to_string(), "b - a");
    }

    #[test]
    fn test_recursion_rejected() {
        let mut table = FunctionTable::new();
        table.insert(def("f", &["a"], "a + 1"));
        let err = table.check_definition(&def("g", &["a"], "h(a)")).unwrap_err();
        assert_eq!(err.kind(), "unresolved-identifier");

        table.insert(def("g", &["a"], "f(a)"));
        let err = table.check_definition(&def("f", &["a"], "g(a)")).unwrap_err();
        assert_eq!(err.kind(), "recursion");
    }

    #[test]
    fn test_arity_and_unresolved() {
        let mut table = FunctionTable::new();
        table.insert(def("g", &["u"], "u*2"));
        let vars = vec!["x".to_string()];
        let err = table
            .check_references(&parse("g(x, x)").unwrap(), &vars)
            .unwrap_err();
        assert_eq!(err.kind(), "arity-mismatch");
        let err = table
            .check_references(&parse("q(x)").unwrap(), &vars)
            .unwrap_err();
        assert_eq!(err, FlowError::unresolved("q"));
        let err = table
            .check_references(&parse("x + y").unwrap(), &vars)
            .unwrap_err();
        assert_eq!(err, FlowError::unresolved("y"));
        assert!(table.check_references(&parse("g(x) + pi").unwrap(), &vars).is_ok());
    }

    #[test]
    fn test_dependency_order_and_constants() {
        let mut table = FunctionTable::new();
        table.insert(def("outer", &["a"], "inner(a) * k"));
        table.insert(def("inner", &["a"], "a + 1"));
        table.insert(def("k", &[], "3"));
        let order: Vec<_> = table
            .dependency_order()
            .unwrap()
            .into_iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(order, vec!["inner", "k", "outer"]);
        let expanded = table.expand(&parse("outer(x)").unwrap()).unwrap();
        assert_eq!(expanded.to_string(), "(x + 1)*3");
        assert!(table.is_referenced_by(&parse("k*x").unwrap()));
        assert!(!table.is_referenced_by(&parse("sin(x)").unwrap()));
    }
}
