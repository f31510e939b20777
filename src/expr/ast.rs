//! Abstract syntax for math expressions.
//!
//! Trees are immutable once built; every rewrite produces a new tree.

use std::fmt;

/// Binary operators in ascending precedence order (`+ -`, `* /`, `^`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
            BinaryOp::Pow => 3,
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Pow => power(lhs, rhs),
        }
    }
}

/// `lhs^rhs` with integer exponents evaluated exactly for negative bases.
pub fn power(base: f64, exponent: f64) -> f64 {
    if exponent.fract() == 0.0 && exponent.abs() <= i32::MAX as f64 {
        base.powi(exponent as i32)
    } else {
        base.powf(exponent)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Ident(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn num(value: f64) -> Self {
        Expr::Number(value)
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn neg(inner: Expr) -> Self {
        Expr::Neg(Box::new(inner))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn pow(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Pow, lhs, rhs)
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Number(value) => Some(*value),
            Expr::Neg(inner) => inner.as_number().map(|value| -value),
            _ => None,
        }
    }

    pub fn is_number(&self, value: f64) -> bool {
        self.as_number() == Some(value)
    }

    /// Total node count, used as a complexity measure.
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Number(_) | Expr::Ident(_) => 1,
            Expr::Neg(inner) => 1 + inner.node_count(),
            Expr::Binary { lhs, rhs, .. } => 1 + lhs.node_count() + rhs.node_count(),
            Expr::Call { args, .. } => 1 + args.iter().map(Expr::node_count).sum::<usize>(),
        }
    }

    /// Whether the identifier `name` occurs anywhere in the tree.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Expr::Number(_) => false,
            Expr::Ident(id) => id == name,
            Expr::Neg(inner) => inner.mentions(name),
            Expr::Binary { lhs, rhs, .. } => lhs.mentions(name) || rhs.mentions(name),
            Expr::Call { name: callee, args } => {
                callee == name || args.iter().any(|arg| arg.mentions(name))
            }
        }
    }

    /// Visit every node depth-first, parents before children.
    pub fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Number(_) | Expr::Ident(_) => {}
            Expr::Neg(inner) => inner.walk(visit),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.walk(visit)),
        }
    }

    /// Rebuild the tree bottom-up, giving `rewrite` each node after its
    /// children have been rewritten.
    pub fn map_bottom_up(&self, rewrite: &mut impl FnMut(Expr) -> Expr) -> Expr {
        let rebuilt = match self {
            Expr::Number(_) | Expr::Ident(_) => self.clone(),
            Expr::Neg(inner) => Expr::neg(inner.map_bottom_up(rewrite)),
            Expr::Binary { op, lhs, rhs } => {
                Expr::binary(*op, lhs.map_bottom_up(rewrite), rhs.map_bottom_up(rewrite))
            }
            Expr::Call { name, args } => Expr::call(
                name.clone(),
                args.iter().map(|arg| arg.map_bottom_up(rewrite)).collect(),
            ),
        };
        rewrite(rebuilt)
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Neg(_) => 4,
            Expr::Number(value) if *value < 0.0 => 4,
            _ => 5,
        }
    }
}

/// Display form: minimal parentheses, re-parseable by [`crate::expr::parse`].
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(value) => write!(f, "{}", format_number(*value)),
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Neg(inner) => {
                // Unary minus binds tightest, so any compound operand needs parentheses.
                if inner.precedence() >= 5 {
                    write!(f, "-{}", inner)
                } else {
                    write!(f, "-({})", inner)
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let (lhs_parens, rhs_parens) = match op {
                    BinaryOp::Pow => (lhs.precedence() <= prec, rhs.precedence() < prec),
                    BinaryOp::Add | BinaryOp::Mul => {
                        (lhs.precedence() < prec, rhs.precedence() < prec)
                    }
                    BinaryOp::Sub | BinaryOp::Div => {
                        (lhs.precedence() < prec, rhs.precedence() <= prec)
                    }
                };
                write_operand(f, lhs, lhs_parens)?;
                match op {
                    BinaryOp::Add | BinaryOp::Sub => write!(f, " {} ", op.symbol())?,
                    _ => write!(f, "{}", op.symbol())?,
                }
                write_operand(f, rhs, rhs_parens)
            }
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

/// Shortest faithful decimal rendering of a literal.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Arity accepted by a built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: usize,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self { min: n, max: n }
    }

    pub const fn range(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn accepts(self, count: usize) -> bool {
        count >= self.min && count <= self.max
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{} to {}", self.min, self.max)
        }
    }
}

/// Built-in functions understood by every stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Exp,
    Log,
    Sqrt,
    Abs,
    Pow,
    Min,
    Max,
    Floor,
    Ceil,
    Mod,
    Sign,
    Clamp,
    Mix,
    Smoothstep,
    Step,
    Length,
    Dot,
    Tanh,
    Sinh,
    Cosh,
}

impl Builtin {
    pub const ALL: [Builtin; 27] = [
        Builtin::Sin,
        Builtin::Cos,
        Builtin::Tan,
        Builtin::Asin,
        Builtin::Acos,
        Builtin::Atan,
        Builtin::Atan2,
        Builtin::Exp,
        Builtin::Log,
        Builtin::Sqrt,
        Builtin::Abs,
        Builtin::Pow,
        Builtin::Min,
        Builtin::Max,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Mod,
        Builtin::Sign,
        Builtin::Clamp,
        Builtin::Mix,
        Builtin::Smoothstep,
        Builtin::Step,
        Builtin::Length,
        Builtin::Dot,
        Builtin::Tanh,
        Builtin::Sinh,
        Builtin::Cosh,
    ];

    /// Resolve a source-level name. `ln` is an alias of `log`.
    pub fn lookup(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "sin" => Builtin::Sin,
            "cos" => Builtin::Cos,
            "tan" => Builtin::Tan,
            "asin" => Builtin::Asin,
            "acos" => Builtin::Acos,
            "atan" => Builtin::Atan,
            "atan2" => Builtin::Atan2,
            "exp" => Builtin::Exp,
            "log" | "ln" => Builtin::Log,
            "sqrt" => Builtin::Sqrt,
            "abs" => Builtin::Abs,
            "pow" => Builtin::Pow,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "floor" => Builtin::Floor,
            "ceil" => Builtin::Ceil,
            "mod" => Builtin::Mod,
            "sign" => Builtin::Sign,
            "clamp" => Builtin::Clamp,
            "mix" => Builtin::Mix,
            "smoothstep" => Builtin::Smoothstep,
            "step" => Builtin::Step,
            "length" => Builtin::Length,
            "dot" => Builtin::Dot,
            "tanh" => Builtin::Tanh,
            "sinh" => Builtin::Sinh,
            "cosh" => Builtin::Cosh,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Asin => "asin",
            Builtin::Acos => "acos",
            Builtin::Atan => "atan",
            Builtin::Atan2 => "atan2",
            Builtin::Exp => "exp",
            Builtin::Log => "log",
            Builtin::Sqrt => "sqrt",
            Builtin::Abs => "abs",
            Builtin::Pow => "pow",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Mod => "mod",
            Builtin::Sign => "sign",
            Builtin::Clamp => "clamp",
            Builtin::Mix => "mix",
            Builtin::Smoothstep => "smoothstep",
            Builtin::Step => "step",
            Builtin::Length => "length",
            Builtin::Dot => "dot",
            Builtin::Tanh => "tanh",
            Builtin::Sinh => "sinh",
            Builtin::Cosh => "cosh",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            // Two-argument atan is the shading-language spelling of atan2.
            Builtin::Atan => Arity::range(1, 2),
            Builtin::Atan2 | Builtin::Pow | Builtin::Mod | Builtin::Step | Builtin::Dot => {
                Arity::exactly(2)
            }
            Builtin::Min | Builtin::Max => Arity::range(2, 8),
            Builtin::Clamp | Builtin::Mix | Builtin::Smoothstep => Arity::exactly(3),
            Builtin::Length => Arity::range(1, 4),
            _ => Arity::exactly(1),
        }
    }

    /// Numeric semantics, matching GLSL ES 3.00 where the two differ from libm.
    pub fn eval(self, args: &[f64]) -> f64 {
        let a = args.first().copied().unwrap_or(f64::NAN);
        let b = args.get(1).copied().unwrap_or(f64::NAN);
        let c = args.get(2).copied().unwrap_or(f64::NAN);
        match self {
            Builtin::Sin => a.sin(),
            Builtin::Cos => a.cos(),
            Builtin::Tan => a.tan(),
            Builtin::Asin => a.asin(),
            Builtin::Acos => a.acos(),
            Builtin::Atan if args.len() == 2 => a.atan2(b),
            Builtin::Atan => a.atan(),
            Builtin::Atan2 => a.atan2(b),
            Builtin::Exp => a.exp(),
            Builtin::Log => a.ln(),
            Builtin::Sqrt => a.sqrt(),
            Builtin::Abs => a.abs(),
            Builtin::Pow => power(a, b),
            Builtin::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Builtin::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Builtin::Floor => a.floor(),
            Builtin::Ceil => a.ceil(),
            Builtin::Mod => a - b * (a / b).floor(),
            Builtin::Sign => {
                if a > 0.0 {
                    1.0
                } else if a < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Builtin::Clamp => a.max(b).min(c),
            Builtin::Mix => a * (1.0 - c) + b * c,
            Builtin::Smoothstep => {
                let t = ((c - a) / (b - a)).clamp(0.0, 1.0);
                t * t * (3.0 - 2.0 * t)
            }
            Builtin::Step => {
                if b < a {
                    0.0
                } else {
                    1.0
                }
            }
            Builtin::Length => args.iter().map(|v| v * v).sum::<f64>().sqrt(),
            Builtin::Dot => a * b,
            Builtin::Tanh => a.tanh(),
            Builtin::Sinh => a.sinh(),
            Builtin::Cosh => a.cosh(),
        }
    }
}

/// Named constants every expression may reference.
pub fn constant_value(name: &str) -> Option<f64> {
    match name {
        "pi" | "π" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        _ => None,
    }
}

/// Conventional Cartesian variable names, one per dimension.
pub const CARTESIAN_VARIABLES: [&str; 6] = ["x", "y", "z", "w", "u", "v"];
