//! Error taxonomy shared by every stage of the pipeline.
//!
//! Each variant corresponds to one failure kind the caller can observe. The
//! CAS layer converts its own failures into these values; nothing in the
//! pipeline panics the host loop.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Which program stage a shader compile failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("parse error at offset {offset} near `{token}`: {message}")]
    Parse {
        message: String,
        offset: usize,
        token: String,
    },

    #[error("unresolved identifier `{name}`")]
    UnresolvedIdentifier { name: String },

    #[error("`{name}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("function `{name}` is defined recursively")]
    Recursion { name: String },

    #[error("CAS failure on `{expression}`: {message}")]
    Cas { message: String, expression: String },

    #[error("cannot differentiate `{expression}` with respect to `{variable}`: {message}")]
    Differentiation {
        expression: String,
        variable: String,
        message: String,
    },

    #[error("cannot invert {size}x{size} matrix: {message}")]
    MatrixInversion { size: usize, message: String },

    #[error("lowering failed: {message}")]
    Lowering { message: String },

    #[error("{stage} shader failed to compile: {log}\n{listing}")]
    ShaderCompile {
        stage: ShaderStage,
        log: String,
        listing: String,
    },

    #[error("program failed to link: {log}")]
    ShaderLink { log: String },

    #[error("{} expression(s) failed validation", .errors.len())]
    WorkflowValidation { errors: Vec<IndexedError> },

    #[error("could not apply field equations: {message}")]
    WorkflowApplication { message: String },

    #[error("no cell with id `{id}`")]
    UnknownCell { id: String },

    #[error("persistence failure: {message}")]
    Persistence { message: String },

    #[error("unsupported record version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

impl FlowError {
    pub fn parse(message: impl Into<String>, offset: usize, token: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            offset,
            token: token.into(),
        }
    }

    pub fn unresolved(name: impl Into<String>) -> Self {
        Self::UnresolvedIdentifier { name: name.into() }
    }

    pub fn cas(message: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::Cas {
            message: message.into(),
            expression: expression.into(),
        }
    }

    pub fn lowering(message: impl Into<String>) -> Self {
        Self::Lowering {
            message: message.into(),
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::WorkflowApplication {
            message: message.into(),
        }
    }

    /// Short machine-friendly kind name, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Parse { .. } => "parse-error",
            FlowError::UnresolvedIdentifier { .. } => "unresolved-identifier",
            FlowError::ArityMismatch { .. } => "arity-mismatch",
            FlowError::Recursion { .. } => "recursion",
            FlowError::Cas { .. } => "cas-failure",
            FlowError::Differentiation { .. } => "differentiation-failure",
            FlowError::MatrixInversion { .. } => "matrix-inversion-failure",
            FlowError::Lowering { .. } => "lowering-failure",
            FlowError::ShaderCompile { .. } => "shader-compile-failure",
            FlowError::ShaderLink { .. } => "shader-link-failure",
            FlowError::WorkflowValidation { .. } => "workflow-validation-failure",
            FlowError::WorkflowApplication { .. } => "workflow-application-failure",
            FlowError::UnknownCell { .. } => "unknown-cell",
            FlowError::Persistence { .. } => "persistence-failure",
            FlowError::UnsupportedVersion { .. } => "unsupported-version",
        }
    }
}

/// Outcome of validating one expression in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedError {
    pub index: usize,
    pub expression: String,
    pub error: Option<FlowError>,
}

impl IndexedError {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Prefix every line of `source` with its 1-based line number.
pub fn numbered_source(source: &str) -> String {
    source
        .lines()
        .enumerate()
        .map(|(idx, line)| format!("{:4}: {}", idx + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(FlowError::unresolved("q").kind(), "unresolved-identifier");
        assert_eq!(
            FlowError::parse("bad", 3, ")").kind(),
            "parse-error"
        );
    }

    #[test]
    fn test_numbered_source() {
        let numbered = numbered_source("a\nb");
        assert_eq!(numbered, "   1: a\n   2: b");
    }
}
