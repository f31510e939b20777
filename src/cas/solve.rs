//! Solving `expr = 0` for a single variable.
//!
//! Two strategies: isolation when the variable occurs once (peeling inverse
//! operations off the equation), and the closed forms for equations that are
//! polynomial of degree at most two in the variable.

use crate::error::{FlowError, Result};
use crate::expr::{BinaryOp, Builtin, Expr, function::substitute};

use super::diff::differentiate;
use super::simplify::{is_zero, simplify_fully};

/// All solutions found for `expr = 0` in `variable`, principal branch first.
pub fn solve(expr: &Expr, variable: &str) -> Result<Vec<Expr>> {
    let failure = |message: &str| FlowError::cas(message.to_string(), format!("{expr} = 0 for {variable}"));
    if !expr.mentions(variable) {
        return Err(failure("variable does not occur"));
    }
    let solutions = if occurrences(expr, variable) == 1 {
        isolate(expr.clone(), Expr::num(0.0), variable)
    } else {
        polynomial(expr, variable)?
    };
    if solutions.is_empty() {
        return Err(failure("no closed-form solution"));
    }
    Ok(solutions.iter().map(simplify_fully).collect())
}

fn occurrences(expr: &Expr, variable: &str) -> usize {
    let mut count = 0;
    expr.walk(&mut |node| {
        if matches!(node, Expr::Ident(name) if name == variable) {
            count += 1;
        }
    });
    count
}

/// Peel `lhs = rhs` down to `variable = ...`.
fn isolate(lhs: Expr, rhs: Expr, variable: &str) -> Vec<Expr> {
    match lhs {
        Expr::Ident(ref name) if name == variable => vec![rhs],
        Expr::Neg(inner) => isolate(*inner, Expr::neg(rhs), variable),
        Expr::Binary { op, lhs: a, rhs: b } => {
            let left = a.mentions(variable);
            match (op, left) {
                (BinaryOp::Add, true) => isolate(*a, Expr::sub(rhs, *b), variable),
                (BinaryOp::Add, false) => isolate(*b, Expr::sub(rhs, *a), variable),
                (BinaryOp::Sub, true) => isolate(*a, Expr::add(rhs, *b), variable),
                (BinaryOp::Sub, false) => isolate(*b, Expr::sub(*a, rhs), variable),
                (BinaryOp::Mul, true) => isolate(*a, Expr::div(rhs, *b), variable),
                (BinaryOp::Mul, false) => isolate(*b, Expr::div(rhs, *a), variable),
                (BinaryOp::Div, true) => isolate(*a, Expr::mul(rhs, *b), variable),
                (BinaryOp::Div, false) => isolate(*b, Expr::div(*a, rhs), variable),
                (BinaryOp::Pow, true) => match b.as_number() {
                    Some(k) if k == 2.0 => {
                        let root = Expr::call("sqrt", vec![rhs]);
                        let mut out = isolate((*a).clone(), root.clone(), variable);
                        out.extend(isolate(*a, Expr::neg(root), variable));
                        out
                    }
                    _ => isolate(
                        *a,
                        Expr::pow(rhs, Expr::div(Expr::num(1.0), *b)),
                        variable,
                    ),
                },
                (BinaryOp::Pow, false) => isolate(
                    *b,
                    Expr::div(
                        Expr::call("log", vec![rhs]),
                        Expr::call("log", vec![*a]),
                    ),
                    variable,
                ),
            }
        }
        Expr::Call { name, mut args } if args.len() == 1 => {
            let inverse = match Builtin::lookup(&name) {
                Some(Builtin::Sin) => "asin",
                Some(Builtin::Cos) => "acos",
                Some(Builtin::Tan) => "atan",
                Some(Builtin::Asin) => "sin",
                Some(Builtin::Acos) => "cos",
                Some(Builtin::Atan) => "tan",
                Some(Builtin::Exp) => "log",
                Some(Builtin::Log) => "exp",
                Some(Builtin::Sqrt) => {
                    let inner = args.remove(0);
                    return isolate(inner, Expr::pow(rhs, Expr::num(2.0)), variable);
                }
                Some(Builtin::Tanh) => {
                    // atanh(r) = log((1 + r)/(1 - r))/2
                    let inner = args.remove(0);
                    let atanh = Expr::div(
                        Expr::call(
                            "log",
                            vec![Expr::div(
                                Expr::add(Expr::num(1.0), rhs.clone()),
                                Expr::sub(Expr::num(1.0), rhs),
                            )],
                        ),
                        Expr::num(2.0),
                    );
                    return isolate(inner, atanh, variable);
                }
                _ => return Vec::new(),
            };
            let inner = args.remove(0);
            isolate(inner, Expr::call(inverse, vec![rhs]), variable)
        }
        _ => Vec::new(),
    }
}

/// Closed-form roots when `expr` is linear or quadratic in `variable`.
fn polynomial(expr: &Expr, variable: &str) -> Result<Vec<Expr>> {
    let at_zero = |e: &Expr| {
        simplify_fully(&substitute(e, &[variable.to_string()], &[Expr::num(0.0)]))
    };
    let first = differentiate(expr, variable)?;
    let second = differentiate(&first, variable)?;
    let third = differentiate(&second, variable)?;
    if !is_zero(&third) {
        return Ok(Vec::new());
    }
    let c0 = at_zero(expr);
    let c1 = at_zero(&first);
    let c2 = simplify_fully(&Expr::div(at_zero(&second), Expr::num(2.0)));
    if c2.mentions(variable) || c1.mentions(variable) {
        return Ok(Vec::new());
    }
    if is_zero(&c2) {
        if is_zero(&c1) {
            return Ok(Vec::new());
        }
        return Ok(vec![Expr::neg(Expr::div(c0, c1))]);
    }
    // (-b ± sqrt(b^2 - 4ac)) / 2a
    let discriminant = Expr::call(
        "sqrt",
        vec![Expr::sub(
            Expr::pow(c1.clone(), Expr::num(2.0)),
            Expr::mul(Expr::mul(Expr::num(4.0), c2.clone()), c0),
        )],
    );
    let denominator = Expr::mul(Expr::num(2.0), c2);
    Ok(vec![
        Expr::div(
            Expr::add(Expr::neg(c1.clone()), discriminant.clone()),
            denominator.clone(),
        ),
        Expr::div(Expr::sub(Expr::neg(c1), discriminant), denominator),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{eval, parse};

    fn check_roots(equation: &str, var: &str, scope: &[(&str, f64)]) {
        let expr = parse(equation).unwrap();
        let roots = solve(&expr, var).unwrap();
        assert!(!roots.is_empty());
        for root in roots {
            let value = eval(&root, &scope).unwrap();
            let mut bound: Vec<(&str, f64)> = scope.to_vec();
            bound.push((var, value));
            let residual = eval(&expr, &bound.as_slice()).unwrap();
            assert!(residual.abs() < 1e-9, "{equation} at {var} = {root}: {residual}");
        }
    }

    #[test]
    fn test_isolation() {
        check_roots("r*cos(t) - x", "r", &[("t", 0.4), ("x", 1.5)]);
        check_roots("exp(2*x) - 3", "x", &[]);
        check_roots("sqrt(x^2 + y^2) - r", "x", &[("y", 0.5), ("r", 2.0)]);
        check_roots("tanh(a*x) - y", "x", &[("a", 2.0), ("y", 0.3)]);
    }

    #[test]
    fn test_polynomial_roots() {
        check_roots("x^2 - 3*x + 2", "x", &[]);
        check_roots("a*x + x - 4", "x", &[("a", 3.0)]);
    }

    #[test]
    fn test_failures() {
        assert!(solve(&parse("y + 1").unwrap(), "x").is_err());
        assert!(solve(&parse("sin(x) + x").unwrap(), "x").is_err());
    }
}
