//! Tree rewrites shared by the CAS bridge and the lowerer.

use std::collections::BTreeSet;

use super::ast::{BinaryOp, Builtin, Expr, constant_value};

/// Rewrite every `atan2(A, B)` (and two-argument `atan`) to `atan(A/B)`.
///
/// Both forms have the same partial derivatives. Only used when preparing an
/// expression for differentiation; shader emission keeps the two-argument form.
pub fn rewrite_atan2(expr: &Expr) -> Expr {
    expr.map_bottom_up(&mut |node| match node {
        Expr::Call { name, mut args }
            if args.len() == 2 && matches!(Builtin::lookup(&name), Some(Builtin::Atan2 | Builtin::Atan)) =>
        {
            let denominator = args.pop().unwrap_or(Expr::num(1.0));
            let numerator = args.pop().unwrap_or(Expr::num(0.0));
            Expr::call("atan", vec![Expr::div(numerator, denominator)])
        }
        other => other,
    })
}

/// Expand `var^k` for integer `k` in `2..=max_power` into repeated
/// multiplication.
pub fn collapse_powers(expr: &Expr, max_power: u32) -> Expr {
    expr.map_bottom_up(&mut |node| match node {
        Expr::Binary {
            op: BinaryOp::Pow,
            lhs,
            rhs,
        } => {
            let exponent = small_integer(&rhs, max_power).filter(|k| *k >= 2);
            match (matches!(*lhs, Expr::Ident(_)), exponent) {
                (true, Some(k)) => {
                    let mut product = (*lhs).clone();
                    for _ in 1..k {
                        product = Expr::mul(product, (*lhs).clone());
                    }
                    product
                }
                _ => Expr::Binary {
                    op: BinaryOp::Pow,
                    lhs,
                    rhs,
                },
            }
        }
        other => other,
    })
}

/// `Some(k)` if `expr` is the literal integer `k` with `1 <= k <= max`.
pub fn small_integer(expr: &Expr, max: u32) -> Option<u32> {
    let value = expr.as_number()?;
    if value.fract() == 0.0 && value >= 1.0 && value <= max as f64 {
        Some(value as u32)
    } else {
        None
    }
}

/// Identifiers that are neither constants nor call targets, sorted.
pub fn free_identifiers(expr: &Expr) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    expr.walk(&mut |node| {
        if let Expr::Ident(name) = node {
            if constant_value(name).is_none() {
                names.insert(name.clone());
            }
        }
    });
    names
}

/// Names of every call target that is not a built-in.
pub fn called_functions(expr: &Expr) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    expr.walk(&mut |node| {
        if let Expr::Call { name, .. } = node {
            if Builtin::lookup(name).is_none() {
                names.insert(name.clone());
            }
        }
    });
    names
}

/// Replace identifiers by name with the given expressions.
pub fn replace_identifiers(expr: &Expr, bindings: &[(String, Expr)]) -> Expr {
    let names: Vec<String> = bindings.iter().map(|(name, _)| name.clone()).collect();
    let values: Vec<Expr> = bindings.iter().map(|(_, value)| value.clone()).collect();
    super::function::substitute(expr, &names, &values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;

    #[test]
    fn test_atan2_rewrite() {
        let expr = parse("atan2(y, x) + atan(y, 2)").unwrap();
        assert_eq!(rewrite_atan2(&expr).to_string(), "atan(y/x) + atan(y/2)");
        let untouched = parse("atan(x)").unwrap();
        assert_eq!(rewrite_atan2(&untouched), untouched);
    }

    #[test]
    fn test_collapse_powers() {
        let expr = parse("x^3 + y^2 + z^5 + (x + 1)^2").unwrap();
        assert_eq!(
            collapse_powers(&expr, 4).to_string(),
            "x*x*x + y*y + z^5 + (x + 1)^2"
        );
    }

    #[test]
    fn test_free_identifiers_skip_constants() {
        let expr = parse("r*cos(theta) + pi").unwrap();
        let names: Vec<_> = free_identifiers(&expr).into_iter().collect();
        assert_eq!(names, vec!["r".to_string(), "theta".to_string()]);
    }

    #[test]
    fn test_called_functions() {
        let expr = parse("g(x) + sin(h(y))").unwrap();
        let names: Vec<_> = called_functions(&expr).into_iter().collect();
        assert_eq!(names, vec!["g".to_string(), "h".to_string()]);
    }
}
