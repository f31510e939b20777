//! Versioned notebook persistence.
//!
//! The record is `{ "version": 1, "cells": [{ id, kind, input, output,
//! display-form, error }] }`. Where the text is kept is up to the [`Store`]
//! implementation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::NOTEBOOK_RECORD_VERSION;
use crate::error::{FlowError, Result};

use super::cell::{Cell, CellId, CellKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookRecord {
    pub version: u32,
    pub cells: Vec<CellRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: CellId,
    pub kind: CellKind,
    pub input: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default, rename = "display-form")]
    pub display_form: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CellRecord {
    pub fn from_cell(id: &CellId, cell: &Cell) -> Self {
        Self {
            id: id.clone(),
            kind: cell.kind(),
            input: cell.input().to_string(),
            output: cell.output().map(str::to_string),
            display_form: cell.display().map(str::to_string),
            error: cell.error().map(str::to_string),
        }
    }

    pub fn into_cell(self) -> (CellId, Cell) {
        let cell = match self.kind {
            CellKind::Code => Cell::Code {
                input: self.input,
                output: self.output,
                display: self.display_form,
                error: self.error,
            },
            CellKind::Prose => Cell::Prose { text: self.input },
        };
        (self.id, cell)
    }
}

impl NotebookRecord {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| FlowError::Persistence {
            message: e.to_string(),
        })
    }

    /// Decode a record, rejecting any version other than the current one.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
            FlowError::Persistence {
                message: e.to_string(),
            }
        })?;
        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| FlowError::Persistence {
                message: "record has no numeric `version` field".to_string(),
            })?;
        if found != NOTEBOOK_RECORD_VERSION as u64 {
            return Err(FlowError::UnsupportedVersion {
                found: found.min(u32::MAX as u64) as u32,
                expected: NOTEBOOK_RECORD_VERSION,
            });
        }
        serde_json::from_value(value).map_err(|e| FlowError::Persistence {
            message: e.to_string(),
        })
    }
}

/// Key-value text storage the notebook saves into.
pub trait Store {
    fn save(&mut self, key: &str, contents: &str) -> Result<()>;

    fn load(&self, key: &str) -> Result<Option<String>>;
}

/// In-process store, used by tests and the headless demo.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Store for MemoryStore {
    fn save(&mut self, key: &str, contents: &str) -> Result<()> {
        self.entries.insert(key.to_string(), contents.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }
}
