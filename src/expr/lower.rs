//! Lowering to GLSL ES 3.00 expression text.
//!
//! The caller supplies the convention: which GLSL text stands for each bound
//! variable, and which user functions have been declared. User function calls
//! lower to calls of the declared `uf_*` shader functions.

use indexmap::IndexMap;

use crate::config::constants::MAX_EXPANDED_POWER;
use crate::error::{FlowError, Result};

use super::ast::{BinaryOp, Builtin, Expr, constant_value};
use super::function::{FunctionDef, FunctionTable};

/// Precedence of an emitted fragment; mirrors the source-level table.
const PREC_ADD: u8 = 1;
const PREC_MUL: u8 = 2;
const PREC_UNARY: u8 = 4;
const PREC_ATOM: u8 = 5;

#[derive(Debug, Clone)]
struct Fragment {
    text: String,
    prec: u8,
}

impl Fragment {
    fn atom(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prec: PREC_ATOM,
        }
    }

    fn wrapped(&self, min_prec: u8) -> String {
        if self.prec < min_prec {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Lowerer<'a> {
    variables: IndexMap<String, String>,
    functions: Option<&'a FunctionTable>,
}

impl<'a> Lowerer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind source identifier `name` to the GLSL text `glsl`.
    pub fn bind(mut self, name: impl Into<String>, glsl: impl Into<String>) -> Self {
        self.variables.insert(name.into(), glsl.into());
        self
    }

    /// Bind each name to itself.
    pub fn bind_identity<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            let name = name.as_ref();
            self.variables.insert(name.to_string(), name.to_string());
        }
        self
    }

    pub fn with_functions(mut self, functions: &'a FunctionTable) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn lower(&self, expr: &Expr) -> Result<String> {
        Ok(self.fragment(expr)?.text)
    }

    fn fragment(&self, expr: &Expr) -> Result<Fragment> {
        match expr {
            Expr::Number(value) => number_fragment(*value),
            Expr::Ident(name) => self.identifier(name),
            Expr::Neg(inner) => {
                let inner = self.fragment(inner)?;
                Ok(Fragment {
                    text: format!("-{}", inner.wrapped(PREC_ATOM)),
                    prec: PREC_UNARY,
                })
            }
            Expr::Binary {
                op: BinaryOp::Pow,
                lhs,
                rhs,
            } => self.power(lhs, rhs),
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let lhs = self.fragment(lhs)?;
                let rhs = self.fragment(rhs)?;
                let rhs_min = match op {
                    BinaryOp::Sub | BinaryOp::Div => prec + 1,
                    _ => prec,
                };
                let separator = match op {
                    BinaryOp::Add | BinaryOp::Sub => format!(" {} ", op.symbol()),
                    _ => op.symbol().to_string(),
                };
                Ok(Fragment {
                    text: format!("{}{}{}", lhs.wrapped(prec), separator, rhs.wrapped(rhs_min)),
                    prec,
                })
            }
            Expr::Call { name, args } => self.call(name, args),
        }
    }

    fn identifier(&self, name: &str) -> Result<Fragment> {
        if let Some(glsl) = self.variables.get(name) {
            return Ok(Fragment::atom(glsl.clone()));
        }
        if let Some(value) = constant_value(name) {
            return number_fragment(value);
        }
        match self.functions.and_then(|table| table.get(name)) {
            Some(def) if def.is_constant() => {
                Ok(Fragment::atom(format!("{}()", glsl_function_name(name))))
            }
            Some(def) => Err(FlowError::ArityMismatch {
                name: name.to_string(),
                expected: def.arity().to_string(),
                found: 0,
            }),
            None => Err(FlowError::unresolved(name)),
        }
    }

    fn power(&self, base: &Expr, exponent: &Expr) -> Result<Fragment> {
        if matches!(base, Expr::Ident(name) if name == "e" && !self.variables.contains_key("e")) {
            let exponent = self.fragment(exponent)?;
            return Ok(Fragment::atom(format!("exp({})", exponent.text)));
        }
        let lowered = self.fragment(base)?;
        let Some(k) = exponent
            .as_number()
            .filter(|value| value.is_finite() && value.fract() == 0.0)
        else {
            let exponent = self.fragment(exponent)?;
            return Ok(Fragment::atom(format!(
                "pow({}, {})",
                lowered.text, exponent.text
            )));
        };
        if k < 0.0 {
            let positive = integer_power(&lowered, -k)?;
            return Ok(Fragment {
                text: format!("1.0/{}", positive.wrapped(PREC_ATOM)),
                prec: PREC_MUL,
            });
        }
        integer_power(&lowered, k)
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Fragment> {
        if let Some(def) = self.functions.and_then(|table| table.get(name)) {
            if def.arity() != args.len() {
                return Err(FlowError::ArityMismatch {
                    name: name.to_string(),
                    expected: def.arity().to_string(),
                    found: args.len(),
                });
            }
            let lowered = self.arguments(args)?;
            return Ok(Fragment::atom(format!(
                "{}({})",
                glsl_function_name(name),
                lowered.join(", ")
            )));
        }

        let builtin = Builtin::lookup(name).ok_or_else(|| FlowError::unresolved(name))?;
        if !builtin.arity().accepts(args.len()) {
            return Err(FlowError::ArityMismatch {
                name: name.to_string(),
                expected: builtin.arity().to_string(),
                found: args.len(),
            });
        }

        if builtin == Builtin::Pow {
            return self.power(&args[0], &args[1]);
        }

        let lowered = self.arguments(args)?;
        let text = match builtin {
            Builtin::Atan2 => format!("atan({}, {})", lowered[0], lowered[1]),
            Builtin::Min | Builtin::Max => nest_binary(builtin.name(), &lowered),
            Builtin::Length if lowered.len() == 1 => format!("abs({})", lowered[0]),
            Builtin::Length => format!("length(vec{}({}))", lowered.len(), lowered.join(", ")),
            _ => format!("{}({})", builtin.name(), lowered.join(", ")),
        };
        Ok(Fragment::atom(text))
    }

    fn arguments(&self, args: &[Expr]) -> Result<Vec<String>> {
        args.iter()
            .map(|arg| self.fragment(arg).map(|fragment| fragment.text))
            .collect()
    }
}

fn nest_binary(name: &str, args: &[String]) -> String {
    match args {
        [] => String::new(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{}({}, {})", name, first, nest_binary(name, rest)),
    }
}

/// `base^k` for a non-negative integer-valued `k`: repeated multiplication up
/// to the expansion limit, `pow` of the magnitude beyond it (sign-corrected for
/// odd powers, since GLSL `pow` is undefined for a negative base).
fn integer_power(base: &Fragment, k: f64) -> Result<Fragment> {
    if k == 0.0 {
        return Ok(Fragment::atom("1.0"));
    }
    if k == 1.0 {
        return Ok(base.clone());
    }
    if k <= MAX_EXPANDED_POWER as f64 {
        let factor = base.wrapped(PREC_ATOM);
        return Ok(Fragment {
            text: vec![factor; k as usize].join("*"),
            prec: PREC_MUL,
        });
    }
    let exponent = glsl_float(k)?;
    if k % 2.0 == 0.0 {
        return Ok(Fragment::atom(format!("pow(abs({}), {})", base.text, exponent)));
    }
    Ok(Fragment {
        text: format!("sign({0})*pow(abs({0}), {1})", base.text, exponent),
        prec: PREC_MUL,
    })
}

fn number_fragment(value: f64) -> Result<Fragment> {
    let text = glsl_float(value)?;
    let prec = if value < 0.0 { PREC_UNARY } else { PREC_ATOM };
    Ok(Fragment { text, prec })
}

/// GLSL float literal for `value`.
pub fn glsl_float(value: f64) -> Result<String> {
    if !value.is_finite() {
        return Err(FlowError::lowering(format!(
            "non-finite constant {value} cannot be emitted"
        )));
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-5..1e7).contains(&magnitude) {
        return Ok(format!("{:e}", value));
    }
    if value.fract() == 0.0 {
        Ok(format!("{:.1}", value))
    } else {
        Ok(format!("{}", value))
    }
}

/// Shader-side name of a user function. Non-ASCII characters are hex-escaped
/// so Unicode names stay valid identifiers.
pub fn glsl_function_name(name: &str) -> String {
    format!("uf_{}", mangle(name))
}

/// Shader-side name of a user function parameter.
pub fn glsl_param_name(name: &str) -> String {
    format!("a_{}", mangle(name))
}

/// Shader-side name of a local bound to a coordinate label.
pub fn glsl_local_name(name: &str) -> String {
    format!("l_{}", mangle(name))
}

fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push_str(&format!("x{:x}", c as u32));
        }
    }
    out
}

/// Emit the declaration of a user function: `float uf_name(float a_p, ...)`.
pub fn lower_function(def: &FunctionDef, table: &FunctionTable) -> Result<String> {
    let mut lowerer = Lowerer::new().with_functions(table);
    for param in &def.params {
        lowerer = lowerer.bind(param.clone(), glsl_param_name(param));
    }
    let body = lowerer.lower(&def.body)?;
    let params = def
        .params
        .iter()
        .map(|param| format!("float {}", glsl_param_name(param)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "float {}({}) {{\n    return {};\n}}\n",
        glsl_function_name(&def.name),
        params,
        body
    ))
}
