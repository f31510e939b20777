//! Symbolic differentiation over fully expanded expressions.

use crate::error::{FlowError, Result};
use crate::expr::{BinaryOp, Builtin, Expr};

use super::simplify::simplify_fully;

/// `d expr / d variable`, simplified. `expr` must not contain user function
/// calls or two-argument arctangents.
pub fn differentiate(expr: &Expr, variable: &str) -> Result<Expr> {
    let raw = derive(expr, variable).map_err(|message| FlowError::Differentiation {
        expression: expr.to_string(),
        variable: variable.to_string(),
        message,
    })?;
    Ok(simplify_fully(&raw))
}

type Derived = std::result::Result<Expr, String>;

fn derive(expr: &Expr, var: &str) -> Derived {
    if !expr.mentions(var) {
        return Ok(Expr::num(0.0));
    }
    match expr {
        Expr::Number(_) => Ok(Expr::num(0.0)),
        Expr::Ident(name) => Ok(Expr::num(if name == var { 1.0 } else { 0.0 })),
        Expr::Neg(inner) => Ok(Expr::neg(derive(inner, var)?)),
        Expr::Binary { op, lhs, rhs } => {
            let (a, b) = (lhs.as_ref(), rhs.as_ref());
            match op {
                BinaryOp::Add => Ok(Expr::add(derive(a, var)?, derive(b, var)?)),
                BinaryOp::Sub => Ok(Expr::sub(derive(a, var)?, derive(b, var)?)),
                BinaryOp::Mul => Ok(Expr::add(
                    Expr::mul(derive(a, var)?, b.clone()),
                    Expr::mul(a.clone(), derive(b, var)?),
                )),
                BinaryOp::Div => Ok(Expr::div(
                    Expr::sub(
                        Expr::mul(derive(a, var)?, b.clone()),
                        Expr::mul(a.clone(), derive(b, var)?),
                    ),
                    Expr::pow(b.clone(), Expr::num(2.0)),
                )),
                BinaryOp::Pow => derive_power(a, b, var),
            }
        }
        Expr::Call { name, args } => derive_call(name, args, var),
    }
}

fn derive_power(base: &Expr, exponent: &Expr, var: &str) -> Derived {
    let power = Expr::pow(base.clone(), exponent.clone());
    if !exponent.mentions(var) {
        // n * a^(n-1) * a'
        return Ok(Expr::mul(
            Expr::mul(
                exponent.clone(),
                Expr::pow(base.clone(), Expr::sub(exponent.clone(), Expr::num(1.0))),
            ),
            derive(base, var)?,
        ));
    }
    if matches!(base, Expr::Ident(name) if name == "e") {
        return Ok(Expr::mul(power, derive(exponent, var)?));
    }
    if !base.mentions(var) {
        return Ok(Expr::mul(
            Expr::mul(power, Expr::call("log", vec![base.clone()])),
            derive(exponent, var)?,
        ));
    }
    // a^b * (b' ln a + b a'/a)
    Ok(Expr::mul(
        power,
        Expr::add(
            Expr::mul(derive(exponent, var)?, Expr::call("log", vec![base.clone()])),
            Expr::div(
                Expr::mul(exponent.clone(), derive(base, var)?),
                base.clone(),
            ),
        ),
    ))
}

fn derive_call(name: &str, args: &[Expr], var: &str) -> Derived {
    let Some(builtin) = Builtin::lookup(name) else {
        return Err(format!("`{name}` is not a known function"));
    };
    if !builtin.arity().accepts(args.len()) {
        return Err(format!(
            "`{name}` expects {} argument(s), found {}",
            builtin.arity(),
            args.len()
        ));
    }
    let u = &args[0];
    let chain = |outer: Expr| -> Derived { Ok(Expr::mul(outer, derive(u, var)?)) };
    let call = |f: &str, arg: Expr| Expr::call(f, vec![arg]);
    let square = |e: Expr| Expr::pow(e, Expr::num(2.0));

    match builtin {
        Builtin::Sin => chain(call("cos", u.clone())),
        Builtin::Cos => chain(Expr::neg(call("sin", u.clone()))),
        Builtin::Tan => chain(Expr::div(Expr::num(1.0), square(call("cos", u.clone())))),
        Builtin::Asin => chain(Expr::div(
            Expr::num(1.0),
            call("sqrt", Expr::sub(Expr::num(1.0), square(u.clone()))),
        )),
        Builtin::Acos => chain(Expr::neg(Expr::div(
            Expr::num(1.0),
            call("sqrt", Expr::sub(Expr::num(1.0), square(u.clone()))),
        ))),
        Builtin::Atan if args.len() == 1 => chain(Expr::div(
            Expr::num(1.0),
            Expr::add(Expr::num(1.0), square(u.clone())),
        )),
        Builtin::Atan | Builtin::Atan2 => {
            Err("two-argument arctangent must be rewritten to atan(A/B) first".to_string())
        }
        Builtin::Exp => chain(call("exp", u.clone())),
        Builtin::Log => chain(Expr::div(Expr::num(1.0), u.clone())),
        Builtin::Sqrt => chain(Expr::div(
            Expr::num(1.0),
            Expr::mul(Expr::num(2.0), call("sqrt", u.clone())),
        )),
        Builtin::Abs => chain(call("sign", u.clone())),
        Builtin::Sign | Builtin::Floor | Builtin::Ceil | Builtin::Step => Ok(Expr::num(0.0)),
        Builtin::Tanh => chain(Expr::sub(Expr::num(1.0), square(call("tanh", u.clone())))),
        Builtin::Sinh => chain(call("cosh", u.clone())),
        Builtin::Cosh => chain(call("sinh", u.clone())),
        Builtin::Pow => derive_power(&args[0], &args[1], var),
        Builtin::Mod => {
            // mod(a, b) = a - b*floor(a/b)
            let (a, b) = (&args[0], &args[1]);
            Ok(Expr::sub(
                derive(a, var)?,
                Expr::mul(
                    derive(b, var)?,
                    call("floor", Expr::div(a.clone(), b.clone())),
                ),
            ))
        }
        Builtin::Min | Builtin::Max => {
            let (first, rest) = (&args[0], &args[1..]);
            let other = if rest.len() == 1 {
                rest[0].clone()
            } else {
                Expr::call(name, rest.to_vec())
            };
            // step(edge, v) is 1 where v >= edge
            let picks_first = if builtin == Builtin::Min {
                Expr::call("step", vec![first.clone(), other.clone()])
            } else {
                Expr::call("step", vec![other.clone(), first.clone()])
            };
            Ok(Expr::add(
                Expr::mul(picks_first.clone(), derive(first, var)?),
                Expr::mul(
                    Expr::sub(Expr::num(1.0), picks_first),
                    derive(&other, var)?,
                ),
            ))
        }
        Builtin::Clamp => {
            let rewritten = Expr::call(
                "min",
                vec![
                    Expr::call("max", vec![args[0].clone(), args[1].clone()]),
                    args[2].clone(),
                ],
            );
            derive(&rewritten, var)
        }
        Builtin::Mix => {
            let (a, b, t) = (&args[0], &args[1], &args[2]);
            let rewritten = Expr::add(
                Expr::mul(a.clone(), Expr::sub(Expr::num(1.0), t.clone())),
                Expr::mul(b.clone(), t.clone()),
            );
            derive(&rewritten, var)
        }
        Builtin::Smoothstep => {
            let (e0, e1, x) = (&args[0], &args[1], &args[2]);
            let t = Expr::call(
                "clamp",
                vec![
                    Expr::div(
                        Expr::sub(x.clone(), e0.clone()),
                        Expr::sub(e1.clone(), e0.clone()),
                    ),
                    Expr::num(0.0),
                    Expr::num(1.0),
                ],
            );
            let rewritten = Expr::mul(
                Expr::mul(t.clone(), t.clone()),
                Expr::sub(Expr::num(3.0), Expr::mul(Expr::num(2.0), t)),
            );
            derive(&rewritten, var)
        }
        Builtin::Length => {
            let sum = args
                .iter()
                .cloned()
                .map(square)
                .reduce(Expr::add)
                .unwrap_or(Expr::num(0.0));
            derive(&call("sqrt", sum), var)
        }
        Builtin::Dot => derive(&Expr::mul(args[0].clone(), args[1].clone()), var),
    }
}
