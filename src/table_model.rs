// Editable table model: streamed-in rows, inline edits, undo, and the original
// snapshot a commit is diffed against.

use crate::error::Result;
use crate::handler::TableChangeHandler;
use crate::model::{Row, TableDescriptor, Value};
use crate::scheduler::{DiffSummary, DiffTable, MultiTableDiff};
use crate::snapshot::{RowSource, StaticRows};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Progress of the background load feeding a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Paused,
    Complete,
}

impl LoadState {
    const fn in_progress(self) -> bool {
        matches!(self, Self::Loading | Self::Paused)
    }
}

#[derive(Clone, Debug)]
struct CellEdit {
    row: usize,
    column: usize,
    value: Value,
}

#[derive(Clone, Debug)]
enum Edit {
    Set { row: usize, column: usize, previous: Value },
    Insert { row: usize },
    Delete { row: usize, removed: Row },
}

#[derive(Debug)]
struct ModelState {
    original: Vec<Row>,
    rows: Vec<Row>,
    // Each entry carries a sequence number so a commit can tell which edits
    // it reconciled.
    undo: Vec<(u64, Edit)>,
    next_edit: u64,
    pending_edit: Option<CellEdit>,
    load: LoadState,
}

/// The rows a commit reconciles, taken in one critical section.
#[derive(Debug)]
pub struct CommitPoint {
    original: StaticRows,
    edited: StaticRows,
    last_edit: u64,
}

impl CommitPoint {
    pub fn original(&self) -> &[Row] {
        &self.original.0
    }

    pub fn edited(&self) -> &[Row] {
        &self.edited.0
    }
}

impl ModelState {
    fn push_undo(&mut self, edit: Edit) {
        self.next_edit += 1;
        self.undo.push((self.next_edit, edit));
    }

    fn apply_pending_edit(&mut self) {
        let Some(edit) = self.pending_edit.take() else {
            return;
        };
        let Some(row) = self.rows.get_mut(edit.row) else {
            return;
        };
        if let Some(previous) = row.set(edit.column, edit.value) {
            self.push_undo(Edit::Set {
                row: edit.row,
                column: edit.column,
                previous,
            });
        }
    }
}

/// A table whose rows are loaded in the background and edited in place.
///
/// Rows that arrive from the loader are part of both the original snapshot and
/// the edited rows; only user edits make the two differ.
pub struct EditableTable {
    descriptor: TableDescriptor,
    state: Mutex<ModelState>,
    changed: Condvar,
}

impl EditableTable {
    pub fn new(descriptor: TableDescriptor) -> Self {
        Self {
            descriptor,
            state: Mutex::new(ModelState {
                original: Vec::new(),
                rows: Vec::new(),
                undo: Vec::new(),
                next_edit: 0,
                pending_edit: None,
                load: LoadState::Idle,
            }),
            changed: Condvar::new(),
        }
    }

    /// A table whose rows are already fully loaded.
    pub fn with_rows(descriptor: TableDescriptor, rows: Vec<Row>) -> Self {
        let table = Self::new(descriptor);
        {
            let mut state = table.lock();
            state.original = rows.clone();
            state.rows = rows;
            state.load = LoadState::Complete;
        }
        table
    }

    pub const fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a background load; rows are handed in through the returned handle.
    pub fn begin_load(self: &Arc<Self>) -> LoadHandle {
        self.lock().load = LoadState::Loading;
        LoadHandle {
            table: Arc::clone(self),
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.lock().load
    }

    /// Hold the loader at its next batch. Returns whether a load was paused.
    pub fn pause_loading(&self) -> bool {
        let mut state = self.lock();
        if state.load == LoadState::Loading {
            state.load = LoadState::Paused;
            return true;
        }
        false
    }

    pub fn resume_loading(&self) {
        let mut state = self.lock();
        if state.load == LoadState::Paused {
            state.load = LoadState::Loading;
            self.changed.notify_all();
        }
    }

    /// Block until the background load has finished. A paused load keeps the
    /// caller blocked until someone resumes it.
    pub fn wait_for_load(&self) {
        let guard = self.lock();
        let _guard = self
            .changed
            .wait_while(guard, |s| s.load.in_progress())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Start (or replace) an inline cell edit. It only reaches the rows once
    /// editing halts.
    pub fn set_cell(&self, row: usize, column: usize, value: Value) {
        let mut state = self.lock();
        state.apply_pending_edit();
        state.pending_edit = Some(CellEdit { row, column, value });
    }

    pub fn halt_editing(&self) {
        self.lock().apply_pending_edit();
    }

    pub fn cancel_editing(&self) {
        self.lock().pending_edit = None;
    }

    pub fn insert_row(&self, row: Row) -> Result<usize> {
        self.descriptor.check_row(&row)?;
        let mut state = self.lock();
        state.apply_pending_edit();
        state.rows.push(row);
        let idx = state.rows.len() - 1;
        state.push_undo(Edit::Insert { row: idx });
        Ok(idx)
    }

    pub fn delete_row(&self, idx: usize) -> Option<Row> {
        let mut state = self.lock();
        state.apply_pending_edit();
        if idx >= state.rows.len() {
            return None;
        }
        let removed = state.rows.remove(idx);
        state.push_undo(Edit::Delete {
            row: idx,
            removed: removed.clone(),
        });
        Some(removed)
    }

    /// Revert the most recent edit. A pending inline edit is dropped first.
    pub fn undo(&self) -> bool {
        let mut state = self.lock();
        if state.pending_edit.take().is_some() {
            return true;
        }
        let Some((_, edit)) = state.undo.pop() else {
            return false;
        };
        match edit {
            Edit::Set {
                row,
                column,
                previous,
            } => {
                if let Some(r) = state.rows.get_mut(row) {
                    r.set(column, previous);
                }
            }
            Edit::Insert { row } => {
                if row < state.rows.len() {
                    state.rows.remove(row);
                }
            }
            Edit::Delete { row, removed } => {
                let at = row.min(state.rows.len());
                state.rows.insert(at, removed);
            }
        }
        true
    }

    pub fn rows(&self) -> Vec<Row> {
        self.lock().rows.clone()
    }

    pub fn original_rows(&self) -> Vec<Row> {
        self.lock().original.clone()
    }

    pub fn has_changes(&self) -> bool {
        let state = self.lock();
        !state.undo.is_empty() || state.pending_edit.is_some()
    }

    /// Apply any inline edit and capture the original and edited rows together.
    pub fn capture(&self) -> CommitPoint {
        let mut state = self.lock();
        state.apply_pending_edit();
        CommitPoint {
            original: StaticRows(state.original.clone()),
            edited: StaticRows(state.rows.clone()),
            last_edit: state.next_edit,
        }
    }

    /// Accept the captured edited rows as the new original snapshot.
    ///
    /// Rows streamed in after the capture stay part of the original, and edits
    /// made after it keep their undo entries so the next commit still sees them.
    pub fn mark_committed(&self, point: CommitPoint) {
        let mut state = self.lock();
        let captured = point.original.0.len().min(state.original.len());
        let loaded_since = state.original.split_off(captured);
        let mut original = point.edited.0;
        original.extend(loaded_since);
        state.original = original;
        state.undo.retain(|(seq, _)| *seq > point.last_edit);
    }

    /// Drop every edit, restoring the original snapshot.
    pub fn revert(&self) {
        let mut state = self.lock();
        state.rows = state.original.clone();
        state.undo.clear();
        state.pending_edit = None;
    }
}

impl RowSource for EditableTable {
    fn halt_editing(&self) {
        Self::halt_editing(self);
    }

    fn wait_for_load(&self) {
        Self::wait_for_load(self);
    }

    fn current_rows(&self) -> Vec<Row> {
        self.rows()
    }
}

/// Producer side of a background load.
///
/// Dropping the handle marks the load complete so waiters never hang on a
/// loader that went away.
pub struct LoadHandle {
    table: Arc<EditableTable>,
}

impl LoadHandle {
    /// Append a batch, blocking while the load is paused.
    pub fn push_rows(&self, rows: Vec<Row>) -> Result<()> {
        for row in &rows {
            self.table.descriptor.check_row(row)?;
        }
        let guard = self.table.lock();
        let mut state = self
            .table
            .changed
            .wait_while(guard, |s| s.load == LoadState::Paused)
            .unwrap_or_else(PoisonError::into_inner);
        state.original.extend(rows.iter().cloned());
        state.rows.extend(rows);
        Ok(())
    }

    pub fn finish(self) {}
}

impl Drop for LoadHandle {
    fn drop(&mut self) {
        let mut state = self.table.lock();
        if state.load.in_progress() {
            state.load = LoadState::Complete;
        }
        self.table.changed.notify_all();
    }
}

/// Commit the edits of several tables through one reconciliation.
///
/// Loads are paused while the original and edited rows are captured, so no
/// streamed row can land between the two captures, and resumed before the
/// reconciliation runs. On success every table takes the rows it reconciled as
/// the new original snapshot; edits made while the handler ran stay pending.
/// On failure the edits stay in place.
pub fn commit_tables(
    tables: &[&EditableTable],
    handler: &mut dyn TableChangeHandler,
) -> Result<DiffSummary> {
    let paused: Vec<bool> = tables.iter().map(|t| t.pause_loading()).collect();
    let points: Vec<CommitPoint> = tables.iter().map(|t| t.capture()).collect();
    for (table, was_paused) in tables.iter().zip(paused) {
        if was_paused {
            table.resume_loading();
        }
    }

    let old = tables
        .iter()
        .zip(&points)
        .map(|(t, p)| DiffTable::new(t.descriptor(), &p.original))
        .collect();
    let new = tables
        .iter()
        .zip(&points)
        .map(|(t, p)| DiffTable::new(t.descriptor(), &p.edited))
        .collect();
    let summary = MultiTableDiff::compare(old, new).run(handler)?;

    for (table, point) in tables.iter().zip(points) {
        table.mark_committed(point);
    }
    debug!(tables = tables.len(), operations = summary.total(), "edits committed");
    Ok(summary)
}
