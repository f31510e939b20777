use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a notebook cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Code,
    Prose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Code {
        input: String,
        /// Result form of the last evaluation.
        output: Option<String>,
        /// Display form of the last evaluation.
        display: Option<String>,
        error: Option<String>,
    },
    Prose {
        text: String,
    },
}

impl Cell {
    pub fn code(input: impl Into<String>) -> Self {
        Cell::Code {
            input: input.into(),
            output: None,
            display: None,
            error: None,
        }
    }

    pub fn prose(text: impl Into<String>) -> Self {
        Cell::Prose { text: text.into() }
    }

    pub fn new(kind: CellKind, input: impl Into<String>) -> Self {
        match kind {
            CellKind::Code => Self::code(input),
            CellKind::Prose => Self::prose(input),
        }
    }

    pub fn kind(&self) -> CellKind {
        match self {
            Cell::Code { .. } => CellKind::Code,
            Cell::Prose { .. } => CellKind::Prose,
        }
    }

    /// Raw text the user typed.
    pub fn input(&self) -> &str {
        match self {
            Cell::Code { input, .. } => input,
            Cell::Prose { text } => text,
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            Cell::Code { output, .. } => output.as_deref(),
            Cell::Prose { .. } => None,
        }
    }

    pub fn display(&self) -> Option<&str> {
        match self {
            Cell::Code { display, .. } => display.as_deref(),
            Cell::Prose { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Cell::Code { error, .. } => error.as_deref(),
            Cell::Prose { .. } => None,
        }
    }

    /// Replace the input and drop cached results.
    pub fn set_input(&mut self, new_input: impl Into<String>) {
        match self {
            Cell::Code {
                input,
                output,
                display,
                error,
            } => {
                *input = new_input.into();
                *output = None;
                *display = None;
                *error = None;
            }
            Cell::Prose { text } => *text = new_input.into(),
        }
    }

    pub(crate) fn record_success(&mut self, result: String, shown: String) {
        if let Cell::Code {
            output,
            display,
            error,
            ..
        } = self
        {
            *output = Some(result);
            *display = Some(shown);
            *error = None;
        }
    }

    pub(crate) fn record_failure(&mut self, message: String) {
        if let Cell::Code {
            output,
            display,
            error,
            ..
        } = self
        {
            *output = None;
            *display = None;
            *error = Some(message);
        }
    }

    /// Code cell whose last evaluation did not fail.
    pub fn is_replayable(&self) -> bool {
        matches!(self, Cell::Code { error: None, .. })
    }
}
