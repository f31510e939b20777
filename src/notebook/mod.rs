//! Notebook
//!
//! An ordered list of cells that is the single source of user definitions.
//! Every mutation marks the context dirty; every outbound CAS call first runs
//! [`Notebook::ensure_context`], which replays the code cells in order.

pub mod cell;
pub mod store;

use bevy::log::{debug, warn};
use indexmap::IndexMap;

use crate::cas::{Capabilities, CasEngine, MatrixInverse};
use crate::config::NOTEBOOK_RECORD_VERSION;
use crate::error::{FlowError, Result};
use crate::expr::{Expr, FunctionDef, FunctionTable, Statement, parse_statement};

pub use cell::{Cell, CellId, CellKind};
pub use store::{CellRecord, MemoryStore, NotebookRecord, Store};

pub struct Notebook {
    cells: IndexMap<CellId, Cell>,
    dirty: bool,
    cas: Box<dyn CasEngine>,
    /// Definitions installed by the last replay or evaluation.
    functions: FunctionTable,
    next_id: u64,
    replays: u64,
}

impl Notebook {
    pub fn new(cas: Box<dyn CasEngine>) -> Self {
        Self {
            cells: IndexMap::new(),
            dirty: false,
            cas,
            functions: FunctionTable::new(),
            next_id: 1,
            replays: 0,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.cas.capabilities()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of context replays performed so far.
    pub fn replay_count(&self) -> u64 {
        self.replays
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellId, &Cell)> {
        self.cells.iter()
    }

    pub fn cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn position(&self, id: &CellId) -> Option<usize> {
        self.cells.get_index_of(id)
    }

    fn fresh_id(&mut self) -> CellId {
        loop {
            let id = CellId::new(format!("cell-{}", self.next_id));
            self.next_id += 1;
            if !self.cells.contains_key(&id) {
                return id;
            }
        }
    }

    fn unknown(id: &CellId) -> FlowError {
        FlowError::UnknownCell { id: id.to_string() }
    }

    /// Append a cell and return its id.
    pub fn add_cell(&mut self, kind: CellKind, input: impl Into<String>) -> CellId {
        let id = self.fresh_id();
        self.cells.insert(id.clone(), Cell::new(kind, input));
        self.dirty = true;
        id
    }

    /// Insert a cell at `index` (clamped to the end).
    pub fn insert_cell(&mut self, index: usize, kind: CellKind, input: impl Into<String>) -> CellId {
        let id = self.add_cell(kind, input);
        let last = self.cells.len() - 1;
        self.cells.move_index(last, index.min(last));
        id
    }

    pub fn delete_cell(&mut self, id: &CellId) -> Result<Cell> {
        let cell = self.cells.shift_remove(id).ok_or_else(|| Self::unknown(id))?;
        self.dirty = true;
        Ok(cell)
    }

    /// Move a cell to `index` (clamped to the end).
    pub fn move_cell(&mut self, id: &CellId, index: usize) -> Result<()> {
        let from = self.position(id).ok_or_else(|| Self::unknown(id))?;
        let to = index.min(self.cells.len() - 1);
        self.cells.move_index(from, to);
        self.dirty = true;
        Ok(())
    }

    pub fn edit_cell(&mut self, id: &CellId, input: impl Into<String>) -> Result<()> {
        let cell = self.cells.get_mut(id).ok_or_else(|| Self::unknown(id))?;
        cell.set_input(input);
        self.dirty = true;
        Ok(())
    }

    /// Clear the CAS cache. The context is considered dirty afterwards since a
    /// non-persistent backend forgets every definition.
    pub fn clear_cache(&mut self) {
        self.cas.clear_cache();
        self.dirty = true;
    }

    /// Wipe the CAS definitions and re-install every replayable code cell, in
    /// order, if the context is dirty. The flag is cleared before replaying so
    /// re-entry is a no-op.
    pub fn ensure_context(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.replays += 1;
        // Cells are the only source of definitions: start from an empty context.
        self.cas.clear_definitions();

        let mut table = FunctionTable::new();
        for (id, cell) in &self.cells {
            if !cell.is_replayable() {
                continue;
            }
            let def = match parse_statement(cell.input()) {
                Ok(Statement::Function { name, params, body }) => FunctionDef::new(name, params, body),
                Ok(Statement::Assignment { name, body }) => FunctionDef::new(name, Vec::new(), body),
                Ok(Statement::Expression(_)) => continue,
                Err(error) => {
                    warn!("Skipping cell {} during context replay: {}", id, error);
                    continue;
                }
            };
            let installed = if def.is_constant() {
                self.cas.set_variable(&def.name, def.body.clone())
            } else {
                self.cas.set_function(def.clone())
            };
            match installed {
                Ok(()) => table.insert(def),
                Err(error) => warn!("Skipping cell {} during context replay: {}", id, error),
            }
        }
        debug!("Replayed notebook context: {} definition(s)", table.len());
        self.functions = table;
    }

    /// Evaluate one cell, caching its result or error on the cell.
    pub fn evaluate_cell(&mut self, id: &CellId) -> Result<()> {
        let input = match self.cells.get(id).ok_or_else(|| Self::unknown(id))? {
            Cell::Code { input, .. } => input.clone(),
            Cell::Prose { .. } => return Ok(()),
        };
        self.ensure_context();

        match self.run_statement(&input) {
            Ok((result, shown)) => {
                if let Some(cell) = self.cells.get_mut(id) {
                    cell.record_success(result, shown);
                }
                Ok(())
            }
            Err(error) => {
                if let Some(cell) = self.cells.get_mut(id) {
                    cell.record_failure(error.to_string());
                }
                // Replay on next use drops any body this cell installed before.
                self.dirty = true;
                Err(error)
            }
        }
    }

    /// Evaluate every cell in order. Returns the failures; evaluation does not
    /// stop at the first one.
    pub fn evaluate_all(&mut self) -> Vec<(CellId, FlowError)> {
        let ids: Vec<CellId> = self.cells.keys().cloned().collect();
        ids.into_iter()
            .filter_map(|id| self.evaluate_cell(&id).err().map(|error| (id, error)))
            .collect()
    }

    fn run_statement(&mut self, input: &str) -> Result<(String, String)> {
        match parse_statement(input)? {
            Statement::Function { name, params, body } => {
                let def = FunctionDef::new(name, params, body);
                self.cas.set_function(def.clone())?;
                let shown = format!(
                    "{}({}) = {}",
                    def.name,
                    def.params.join(", "),
                    self.cas.to_display(&def.body)
                );
                let result = def.to_string();
                self.functions.insert(def);
                Ok((result, shown))
            }
            Statement::Assignment { name, body } => {
                let value = self.cas.evaluate(&body)?;
                self.cas.set_variable(&name, body.clone())?;
                let shown = format!("{} = {}", name, self.cas.to_display(&value));
                self.functions.insert(FunctionDef::new(name, Vec::new(), body));
                Ok((value.to_string(), shown))
            }
            Statement::Expression(expr) => {
                let value = self.cas.evaluate(&expr)?;
                Ok((value.to_string(), self.cas.to_display(&value)))
            }
        }
    }

    /// User definitions, replaying the context first if needed.
    pub fn functions(&mut self) -> &FunctionTable {
        self.ensure_context();
        &self.functions
    }

    /// Inline user functions, but only if one is actually referenced.
    pub fn expand(&mut self, expr: &Expr) -> Result<Expr> {
        self.ensure_context();
        if self.functions.is_referenced_by(expr) {
            self.functions.expand(expr)
        } else {
            Ok(expr.clone())
        }
    }

    pub fn parse(&mut self, source: &str) -> Result<Expr> {
        self.ensure_context();
        self.cas.parse(source)
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Expr> {
        self.ensure_context();
        self.cas.evaluate(expr)
    }

    pub fn differentiate(&mut self, expr: &Expr, variable: &str) -> Result<Expr> {
        self.ensure_context();
        self.cas.differentiate(expr, variable)
    }

    pub fn simplify(&mut self, expr: &Expr) -> Result<Expr> {
        self.ensure_context();
        self.cas.simplify(expr)
    }

    pub fn solve(&mut self, expr: &Expr, variable: &str) -> Result<Vec<Expr>> {
        self.ensure_context();
        self.cas.solve(expr, variable)
    }

    pub fn invert_matrix(&mut self, matrix: &[Vec<Expr>]) -> Result<MatrixInverse> {
        self.ensure_context();
        self.cas.invert_matrix(matrix)
    }

    /// Bind a notebook constant, appending it as a `name = value` cell.
    pub fn set_variable(&mut self, name: &str, value: &str) -> Result<CellId> {
        let id = self.add_cell(CellKind::Code, format!("{name} = {value}"));
        if let Err(error) = self.evaluate_cell(&id) {
            self.cells.shift_remove(&id);
            return Err(error);
        }
        Ok(id)
    }

    /// Names the CAS currently has installed.
    pub fn installed_names(&self) -> Vec<String> {
        self.cas.functions().iter().map(|def| def.to_string()).collect()
    }

    pub fn to_record(&self) -> NotebookRecord {
        NotebookRecord {
            version: NOTEBOOK_RECORD_VERSION,
            cells: self
                .cells
                .iter()
                .map(|(id, cell)| CellRecord::from_cell(id, cell))
                .collect(),
        }
    }

    /// Replace every cell with the record's cells.
    pub fn restore(&mut self, record: NotebookRecord) -> Result<()> {
        if record.version != NOTEBOOK_RECORD_VERSION {
            return Err(FlowError::UnsupportedVersion {
                found: record.version,
                expected: NOTEBOOK_RECORD_VERSION,
            });
        }
        self.cells = record.cells.into_iter().map(CellRecord::into_cell).collect();
        self.clear_cache();
        Ok(())
    }

    pub fn save(&self, store: &mut dyn Store, key: &str) -> Result<()> {
        store.save(key, &self.to_record().to_json()?)
    }

    /// Load the notebook saved under `key`. Returns `false` if nothing was saved.
    pub fn load(&mut self, store: &dyn Store, key: &str) -> Result<bool> {
        match store.load(key)? {
            Some(text) => {
                self.restore(NotebookRecord::from_json(&text)?)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::SymbolicCas;
    use crate::expr::parse;

    fn notebook(volatile: bool) -> Notebook {
        if volatile {
            Notebook::new(Box::new(SymbolicCas::volatile()))
        } else {
            Notebook::new(Box::new(SymbolicCas::separating()))
        }
    }

    #[test]
    fn test_mutations_mark_dirty() {
        let mut nb = notebook(false);
        let id = nb.add_cell(CellKind::Code, "g(u) = u + 1");
        assert!(nb.is_dirty());
        nb.ensure_context();
        assert!(!nb.is_dirty());
        nb.edit_cell(&id, "g(u) = u + 2").unwrap();
        assert!(nb.is_dirty());
        nb.ensure_context();
        let other = nb.add_cell(CellKind::Prose, "notes");
        nb.ensure_context();
        nb.move_cell(&other, 0).unwrap();
        assert!(nb.is_dirty());
        assert_eq!(nb.position(&other), Some(0));
        nb.ensure_context();
        nb.delete_cell(&other).unwrap();
        assert!(nb.is_dirty());
        assert!(nb.delete_cell(&other).is_err());
    }

    #[test]
    fn test_ensure_context_is_idempotent() {
        let mut nb = notebook(true);
        nb.add_cell(CellKind::Code, "g(u) = sin(u)^2 + cos(u)^2");
        nb.add_cell(CellKind::Code, "k = 3");
        nb.clear_cache();
        nb.ensure_context();
        let once = nb.installed_names();
        let replays = nb.replay_count();
        nb.ensure_context();
        assert_eq!(nb.installed_names(), once);
        assert_eq!(nb.replay_count(), replays);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_volatile_backend_recovers_after_clear() {
        let mut nb = notebook(true);
        let id = nb.add_cell(CellKind::Code, "sq(a) = a*a");
        nb.evaluate_cell(&id).unwrap();
        nb.clear_cache();
        let derivative = nb.differentiate(&parse("sq(x)").unwrap(), "x").unwrap();
        assert_eq!(derivative.to_string(), "2*x");
    }

    #[test]
    fn test_deleted_function_leaves_context() {
        for volatile in [false, true] {
            let mut nb = notebook(volatile);
            let id = nb.add_cell(CellKind::Code, "sq(a) = a*a");
            nb.evaluate_cell(&id).unwrap();
            assert_eq!(nb.evaluate(&parse("sq(2)").unwrap()).unwrap(), Expr::num(4.0));

            nb.delete_cell(&id).unwrap();
            let err = nb.evaluate(&parse("sq(2)").unwrap()).unwrap_err();
            assert_eq!(err.kind(), "unresolved-identifier");
            assert!(nb.installed_names().is_empty());
            let derivative = nb
                .differentiate(&parse("sq(x)").unwrap(), "x")
                .map(|d| d.to_string());
            assert_ne!(derivative.ok().as_deref(), Some("2*x"));
        }
    }

    #[test]
    fn test_failed_edit_unbinds_variable() {
        for volatile in [false, true] {
            let mut nb = notebook(volatile);
            let id = nb.add_cell(CellKind::Code, "k = 3");
            nb.evaluate_cell(&id).unwrap();
            assert_eq!(nb.evaluate(&parse("k + 1").unwrap()).unwrap(), Expr::num(4.0));

            nb.edit_cell(&id, "k = (").unwrap();
            assert!(nb.evaluate_cell(&id).is_err());
            let value = nb.evaluate(&parse("k + 1").unwrap()).unwrap();
            assert_ne!(value, Expr::num(4.0));
            assert!(!nb.installed_names().iter().any(|name| name.starts_with("k")));
        }
    }

    #[test]
    fn test_edited_function_replaces_body() {
        for volatile in [false, true] {
            let mut nb = notebook(volatile);
            let id = nb.add_cell(CellKind::Code, "g(u) = u + 1");
            nb.evaluate_cell(&id).unwrap();
            nb.edit_cell(&id, "g(u) = 3*u").unwrap();
            let derivative = nb.differentiate(&parse("g(x)").unwrap(), "x").unwrap();
            assert_eq!(derivative.to_string(), "3");
            assert_eq!(nb.installed_names(), vec!["g(u) = 3*u".to_string()]);
        }
    }

    #[test]
    fn test_failed_cells_are_skipped_on_replay() {
        let mut nb = notebook(true);
        nb.add_cell(CellKind::Code, "f(a) = a +");
        nb.add_cell(CellKind::Code, "g(a) = 2*a");
        nb.ensure_context();
        assert!(nb.functions().contains("g"));
        assert!(!nb.functions().contains("f"));
    }

    #[test]
    fn test_evaluate_cells() {
        let mut nb = notebook(false);
        let def = nb.add_cell(CellKind::Code, "g(u) = sin(u)^2 + cos(u)^2");
        let expr = nb.add_cell(CellKind::Code, "2*pi/2");
        let bad = nb.add_cell(CellKind::Code, "q(1)");
        let failures = nb.evaluate_all();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, bad);
        assert_eq!(nb.cell(&def).unwrap().output(), Some("g(u) = sin(u)^2 + cos(u)^2"));
        assert_eq!(nb.cell(&expr).unwrap().display(), Some("π"));
        assert!(nb.cell(&bad).unwrap().error().is_some());
    }

    #[test]
    fn test_expand_only_when_referenced() {
        let mut nb = notebook(false);
        nb.add_cell(CellKind::Code, "g(u) = u*u");
        let plain = parse("x + 1").unwrap();
        assert_eq!(nb.expand(&plain).unwrap(), plain);
        let expanded = nb.expand(&parse("g(x) + g(y)").unwrap()).unwrap();
        assert_eq!(expanded.to_string(), "x*x + y*y");
    }

    #[test]
    fn test_save_and_load() {
        let mut nb = notebook(false);
        nb.add_cell(CellKind::Prose, "Lorenz helpers");
        let id = nb.add_cell(CellKind::Code, "sigma = 10");
        nb.evaluate_cell(&id).unwrap();
        let mut store = MemoryStore::new();
        nb.save(&mut store, "session").unwrap();

        let mut restored = notebook(true);
        assert!(restored.load(&store, "session").unwrap());
        assert_eq!(restored.to_record(), nb.to_record());
        assert!(restored.functions().contains("sigma"));
        assert!(!restored.load(&store, "missing").unwrap());
    }
}
