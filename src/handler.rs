// The sink side of a reconciliation.

use crate::error::BoxError;
use crate::model::{Key, Row, TableDescriptor};

/// Receives the ordered row operations of a reconciliation.
///
/// Implementations either execute the operations (see `SqliteExecutor`) or
/// render them (see `ScriptEmitter`). Any error aborts the whole run.
pub trait TableChangeHandler {
    fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<(), BoxError>;

    fn update_row(&mut self, table: &TableDescriptor, old: &Row, new: &Row)
        -> Result<(), BoxError>;

    /// `key` holds the values at `key_columns(table)`.
    fn delete_row(&mut self, table: &TableDescriptor, key: &Key) -> Result<(), BoxError>;

    /// Asked once, when a full pass made no progress. `true` lets the remaining
    /// operations through without foreign-key ordering.
    fn continue_after_error(&mut self) -> bool;

    /// Everything emitted after this call may violate referential integrity.
    fn postmortem_started(&mut self) {}
}

/// Column positions a delete key refers to: the primary key, or every column
/// for keyless tables.
pub fn key_columns(table: &TableDescriptor) -> Vec<usize> {
    if table.is_keyless() {
        (0..table.columns.len()).collect()
    } else {
        table.primary_key.clone()
    }
}

/// One recorded handler call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedChange {
    Insert { table: String, row: Row },
    Update { table: String, old: Row, new: Row },
    Delete { table: String, key: Key },
    PostmortemStarted,
}

/// Handler that keeps every call in memory; useful for dry runs.
#[derive(Clone, Debug, Default)]
pub struct ChangeLog {
    pub changes: Vec<RecordedChange>,
    pub allow_postmortem: bool,
    pub stall_queries: usize,
}

impl ChangeLog {
    pub fn new(allow_postmortem: bool) -> Self {
        Self {
            allow_postmortem,
            ..Self::default()
        }
    }
}

impl TableChangeHandler for ChangeLog {
    fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<(), BoxError> {
        self.changes.push(RecordedChange::Insert {
            table: table.name.name.clone(),
            row: row.clone(),
        });
        Ok(())
    }

    fn update_row(
        &mut self,
        table: &TableDescriptor,
        old: &Row,
        new: &Row,
    ) -> Result<(), BoxError> {
        self.changes.push(RecordedChange::Update {
            table: table.name.name.clone(),
            old: old.clone(),
            new: new.clone(),
        });
        Ok(())
    }

    fn delete_row(&mut self, table: &TableDescriptor, key: &Key) -> Result<(), BoxError> {
        self.changes.push(RecordedChange::Delete {
            table: table.name.name.clone(),
            key: key.clone(),
        });
        Ok(())
    }

    fn continue_after_error(&mut self) -> bool {
        self.stall_queries += 1;
        self.allow_postmortem
    }

    fn postmortem_started(&mut self) {
        self.changes.push(RecordedChange::PostmortemStarted);
    }
}
