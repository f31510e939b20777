//! Expression language
//!
//! Tokenizing, parsing, numeric evaluation and GLSL lowering of the math text
//! users type for field equations, functions and coordinate charts.

pub mod ast;
pub mod eval;
pub mod function;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod rewrite;

pub use ast::{Arity, BinaryOp, Builtin, CARTESIAN_VARIABLES, Expr, constant_value};
pub use eval::{Evaluator, Positional, Scope, eval};
pub use function::{FunctionDef, FunctionTable, substitute};
pub use lower::{Lowerer, glsl_float, glsl_function_name, lower_function};
pub use parser::{Statement, parse, parse_list, parse_statement};
pub use rewrite::{collapse_powers, free_identifiers, rewrite_atan2};
