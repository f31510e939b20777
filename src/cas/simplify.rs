//! Algebraic simplification.
//!
//! Sums are flattened into coefficient-weighted terms and like terms merged;
//! products are flattened into a numeric numerator/denominator pair and
//! base-exponent factors in a canonical order. Sum terms keep first-appearance
//! order so output stays close to what the user wrote.

use crate::expr::{BinaryOp, Builtin, Expr};

pub fn simplify(expr: &Expr) -> Expr {
    match expr {
        Expr::Number(_) | Expr::Ident(_) => expr.clone(),
        Expr::Neg(inner) => negate(simplify(inner)),
        Expr::Binary {
            op: BinaryOp::Add | BinaryOp::Sub,
            ..
        } => {
            let mut sum = Sum::default();
            sum.collect(expr, 1.0);
            sum.build()
        }
        Expr::Binary {
            op: BinaryOp::Mul | BinaryOp::Div,
            ..
        } => {
            let mut product = Product::default();
            product.collect(expr, 1.0);
            product.build()
        }
        Expr::Binary {
            op: BinaryOp::Pow,
            lhs,
            rhs,
        } => simplify_power(simplify(lhs), simplify(rhs)),
        Expr::Call { name, args } => {
            let args: Vec<Expr> = args.iter().map(simplify).collect();
            fold_call(name, args)
        }
    }
}

/// Simplify until the display form stops changing (bounded).
pub fn simplify_fully(expr: &Expr) -> Expr {
    let mut current = simplify(expr);
    for _ in 0..4 {
        let next = simplify(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Structural zero test after simplification.
pub fn is_zero(expr: &Expr) -> bool {
    simplify_fully(expr).is_number(0.0)
}

fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Number(value) => Expr::num(-value),
        Expr::Neg(inner) => *inner,
        Expr::Binary {
            op: BinaryOp::Sub,
            lhs,
            rhs,
        } => Expr::sub(*rhs, *lhs),
        other => negate_leading(other),
    }
}

fn simplify_power(base: Expr, exponent: Expr) -> Expr {
    if exponent.is_number(0.0) || base.is_number(1.0) {
        return Expr::num(1.0);
    }
    if exponent.is_number(1.0) {
        return base;
    }
    if let (Some(b), Some(e)) = (base.as_number(), exponent.as_number()) {
        let folded = crate::expr::ast::power(b, e);
        if folded.is_finite() {
            return Expr::num(folded);
        }
    }
    if base.is_number(0.0) && exponent.as_number().is_some_and(|e| e > 0.0) {
        return Expr::num(0.0);
    }
    // (a^m)^n = a^(m*n) for integer n
    if let (
        Expr::Binary {
            op: BinaryOp::Pow,
            lhs,
            rhs,
        },
        Some(n),
    ) = (&base, exponent.as_number())
    {
        if let Some(m) = rhs.as_number() {
            if n.fract() == 0.0 {
                return simplify_power((**lhs).clone(), Expr::num(m * n));
            }
        }
    }
    Expr::pow(base, exponent)
}

fn fold_call(name: &str, args: Vec<Expr>) -> Expr {
    if let Some(builtin) = Builtin::lookup(name) {
        if builtin.arity().accepts(args.len()) {
            let values: Option<Vec<f64>> = args.iter().map(Expr::as_number).collect();
            if let Some(values) = values {
                let folded = builtin.eval(&values);
                if folded.is_finite() {
                    return Expr::num(folded);
                }
            }
        }
    }
    Expr::call(name, args)
}

/// Terms keyed by their non-numeric part; constants are keyed by `1`.
#[derive(Default)]
struct Sum {
    terms: Vec<(f64, Expr)>,
}

impl Sum {
    fn collect(&mut self, expr: &Expr, sign: f64) {
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            } => {
                self.collect(lhs, sign);
                self.collect(rhs, sign);
            }
            Expr::Binary {
                op: BinaryOp::Sub,
                lhs,
                rhs,
            } => {
                self.collect(lhs, sign);
                self.collect(rhs, -sign);
            }
            Expr::Neg(inner) => self.collect(inner, -sign),
            other => {
                let simplified = simplify(other);
                match simplified {
                    Expr::Binary {
                        op: BinaryOp::Add | BinaryOp::Sub,
                        ..
                    }
                    | Expr::Neg(_) => self.collect_simplified(&simplified, sign),
                    leaf => self.push(leaf, sign),
                }
            }
        }
    }

    /// Like `collect`, for input that is already simplified.
    fn collect_simplified(&mut self, expr: &Expr, sign: f64) {
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            } => {
                self.collect_simplified(lhs, sign);
                self.collect_simplified(rhs, sign);
            }
            Expr::Binary {
                op: BinaryOp::Sub,
                lhs,
                rhs,
            } => {
                self.collect_simplified(lhs, sign);
                self.collect_simplified(rhs, -sign);
            }
            Expr::Neg(inner) => self.collect_simplified(inner, -sign),
            leaf => self.push(leaf.clone(), sign),
        }
    }

    fn push(&mut self, term: Expr, sign: f64) {
        let (coefficient, rest) = split_coefficient(term);
        let coefficient = coefficient * sign;
        let rest = rest.unwrap_or(Expr::num(1.0));
        match self.terms.iter_mut().find(|(_, existing)| *existing == rest) {
            Some((existing, _)) => *existing += coefficient,
            None => self.terms.push((coefficient, rest)),
        }
    }

    fn build(self) -> Expr {
        let mut acc: Option<Expr> = None;
        let pieces = self
            .terms
            .into_iter()
            .filter(|(coefficient, _)| *coefficient != 0.0);
        for (coefficient, term) in pieces {
            let magnitude = scaled(coefficient.abs(), term);
            acc = Some(match acc {
                None if coefficient < 0.0 => negate_leading(magnitude),
                None => magnitude,
                Some(acc) if coefficient < 0.0 => Expr::sub(acc, magnitude),
                Some(acc) => Expr::add(acc, magnitude),
            });
        }
        acc.unwrap_or(Expr::num(0.0))
    }
}

/// `coefficient * term`, dropping unit factors.
fn scaled(coefficient: f64, term: Expr) -> Expr {
    if term.is_number(1.0) {
        Expr::num(coefficient)
    } else if coefficient == 1.0 {
        term
    } else {
        Expr::mul(Expr::num(coefficient), term)
    }
}

fn negate_leading(expr: Expr) -> Expr {
    match expr {
        Expr::Number(value) => Expr::num(-value),
        Expr::Binary {
            op: BinaryOp::Mul,
            lhs,
            rhs,
        } => match lhs.as_number() {
            Some(value) => Expr::mul(Expr::num(-value), *rhs),
            None => Expr::neg(Expr::mul(*lhs, *rhs)),
        },
        Expr::Binary {
            op: BinaryOp::Div,
            lhs,
            rhs,
        } => Expr::div(negate_leading(*lhs), *rhs),
        other => Expr::neg(other),
    }
}

/// Split a leading numeric factor: `3*x` gives `(3, Some(x))`, `5` gives `(5, None)`.
fn split_coefficient(term: Expr) -> (f64, Option<Expr>) {
    match term {
        Expr::Number(value) => (value, None),
        Expr::Binary {
            op: BinaryOp::Mul,
            lhs,
            rhs,
        } => match lhs.as_number() {
            Some(value) => (value, Some(*rhs)),
            None => (
                1.0,
                Some(Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs,
                    rhs,
                }),
            ),
        },
        other => (1.0, Some(other)),
    }
}

#[derive(Default)]
struct Product {
    numerator: f64,
    denominator: f64,
    factors: Vec<(Expr, Expr)>,
    started: bool,
}

impl Product {
    fn collect(&mut self, expr: &Expr, exponent: f64) {
        if !self.started {
            self.numerator = 1.0;
            self.denominator = 1.0;
            self.started = true;
        }
        match expr {
            Expr::Binary {
                op: BinaryOp::Mul,
                lhs,
                rhs,
            } => {
                self.collect(lhs, exponent);
                self.collect(rhs, exponent);
            }
            Expr::Binary {
                op: BinaryOp::Div,
                lhs,
                rhs,
            } => {
                self.collect(lhs, exponent);
                self.collect(rhs, -exponent);
            }
            Expr::Neg(inner) => {
                self.numerator = -self.numerator;
                self.collect(inner, exponent);
            }
            other => {
                let simplified = simplify(other);
                match simplified {
                    Expr::Binary {
                        op: BinaryOp::Mul | BinaryOp::Div,
                        ..
                    }
                    | Expr::Neg(_) => self.collect(&simplified, exponent),
                    leaf => self.push(leaf, exponent),
                }
            }
        }
    }

    fn push(&mut self, factor: Expr, exponent: f64) {
        if let Some(value) = factor.as_number() {
            if exponent > 0.0 {
                self.numerator *= value;
            } else {
                self.denominator *= value;
            }
            return;
        }
        let (base, power) = match factor {
            Expr::Binary {
                op: BinaryOp::Pow,
                lhs,
                rhs,
            } => (*lhs, *rhs),
            other => (other, Expr::num(1.0)),
        };
        let power = if exponent < 0.0 {
            negate(power)
        } else {
            power
        };
        match self.factors.iter_mut().find(|(existing, _)| *existing == base) {
            Some((_, existing)) => {
                *existing = simplify(&Expr::add(existing.clone(), power));
            }
            None => self.factors.push((base, power)),
        }
    }

    fn build(self) -> Expr {
        if self.numerator == 0.0 && self.denominator != 0.0 {
            return Expr::num(0.0);
        }
        let (mut numerator, mut denominator) = (self.numerator, self.denominator);
        if denominator < 0.0 {
            numerator = -numerator;
            denominator = -denominator;
        }
        if numerator.fract() == 0.0 && denominator.fract() == 0.0 && denominator != 0.0 {
            let divisor = gcd(numerator.abs(), denominator);
            if divisor > 1.0 {
                numerator /= divisor;
                denominator /= divisor;
            }
        } else if denominator != 0.0 {
            numerator /= denominator;
            denominator = 1.0;
        }

        // Canonical factor order: plain identifiers first, then by display form.
        let mut factors = self.factors;
        factors.sort_by_key(|(base, _)| (!matches!(base, Expr::Ident(_)), base.to_string()));

        let mut top: Vec<Expr> = Vec::new();
        let mut bottom: Vec<Expr> = Vec::new();
        for (base, power) in factors {
            match power.as_number() {
                Some(p) if p == 0.0 => {}
                Some(p) if p < 0.0 => bottom.push(simplify_power(base, Expr::num(-p))),
                _ => top.push(simplify_power(base, power)),
            }
        }

        let negative = numerator < 0.0;
        let magnitude = numerator.abs();
        if magnitude != 1.0 || top.is_empty() {
            top.insert(0, Expr::num(magnitude));
        }
        if denominator != 1.0 {
            bottom.insert(0, Expr::num(denominator));
        }
        let top = join_product(top);
        let result = match join_product(bottom) {
            Expr::Number(value) if value == 1.0 => top,
            bottom => Expr::div(top, bottom),
        };
        if negative {
            negate_leading(result)
        } else {
            result
        }
    }
}

fn join_product(factors: Vec<Expr>) -> Expr {
    factors
        .into_iter()
        .reduce(Expr::mul)
        .unwrap_or(Expr::num(1.0))
}

fn gcd(mut a: f64, mut b: f64) -> f64 {
    while b > 0.5 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}
