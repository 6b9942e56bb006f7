// Foreign-key safety checks against the in-progress working set.

use crate::error::{DiffError, Result};
use crate::model::{Key, Row, TableDescriptor, Value};
use crate::snapshot::Snapshot;
use tracing::debug;

/// Position of a table in the reconciled set. Handles are compared by value,
/// never by descriptor identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub usize);

/// Mutable per-table snapshots the scheduler applies operations to.
#[derive(Clone, Debug, Default)]
pub struct WorkingSet {
    tables: Vec<Snapshot>,
}

impl WorkingSet {
    pub const fn new(tables: Vec<Snapshot>) -> Self {
        Self { tables }
    }

    pub fn get(&self, id: TableId) -> &Snapshot {
        &self.tables[id.0]
    }

    pub fn get_mut(&mut self, id: TableId) -> &mut Snapshot {
        &mut self.tables[id.0]
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableId, &Snapshot)> {
        self.tables.iter().enumerate().map(|(i, s)| (TableId(i), s))
    }
}

/// A foreign key with both ends resolved inside the set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKeyLink {
    pub name: Option<String>,
    pub from: TableId,
    pub columns: Vec<usize>,
    pub to: TableId,
    pub referenced_columns: Vec<usize>,
}

impl ForeignKeyLink {
    fn matches(&self, row: &Row, values: &[Value]) -> bool {
        self.columns
            .iter()
            .zip(values)
            .all(|(&col, value)| row.get(col) == Some(value))
    }
}

/// Answers "is this operation safe right now" for the tables in one set.
///
/// Only foreign keys between tables of the set are considered; keys pointing
/// outside it are the caller's concern.
#[derive(Clone, Debug, Default)]
pub struct ConstraintOracle {
    links: Vec<ForeignKeyLink>,
}

impl ConstraintOracle {
    /// Resolve every outbound foreign key of `tables` against the set itself.
    pub fn resolve(tables: &[&TableDescriptor]) -> Result<Self> {
        let mut links = Vec::new();
        for (from, table) in tables.iter().enumerate() {
            table.validate()?;
            for fk in &table.foreign_keys {
                let Some(to) = tables.iter().position(|t| t.name.refers_to(&fk.referenced)) else {
                    debug!(
                        table = %table.name,
                        referenced = %fk.referenced,
                        "foreign key leaves the table set; ignored"
                    );
                    continue;
                };
                let width = tables[to].columns.len();
                if let Some(bad) = fk.referenced_columns.iter().find(|&&i| i >= width) {
                    return Err(DiffError::invalid_descriptor(
                        &table.name,
                        format!(
                            "foreign key references column position {bad} of {} ({width} columns)",
                            fk.referenced
                        ),
                    ));
                }
                links.push(ForeignKeyLink {
                    name: fk.name.clone(),
                    from: TableId(from),
                    columns: fk.columns.clone(),
                    to: TableId(to),
                    referenced_columns: fk.referenced_columns.clone(),
                });
            }
        }
        Ok(Self { links })
    }

    pub fn links(&self) -> &[ForeignKeyLink] {
        &self.links
    }

    /// A delete is safe unless a present row still references the row being
    /// deleted. A row referencing itself does not block its own deletion.
    pub fn can_delete_key(&self, working: &WorkingSet, table: TableId, key: &Key) -> bool {
        let snap = working.get(table);
        let Ok(target_idx) = snap.search(key) else {
            return true;
        };
        let target = &snap.rows()[target_idx];

        self.links.iter().filter(|link| link.to == table).all(|link| {
            let values = target.project(&link.referenced_columns);
            if values.iter().any(Value::is_null) {
                return true;
            }
            let referencing = working.get(link.from).rows().iter().enumerate().any(|(idx, row)| {
                let is_target = link.from == table && idx == target_idx;
                !is_target && link.matches(row, &values)
            });
            !referencing
        })
    }

    /// An insert needs a fresh non-null key (primary-keyed tables only) and
    /// every referenced row present.
    pub fn can_insert_row(&self, working: &WorkingSet, table: TableId, row: &Row) -> bool {
        let snap = working.get(table);
        if snap.order().is_primary_key() {
            let key = snap.key_of(row);
            if key.has_null() || snap.contains_key(&key) {
                return false;
            }
        }
        self.references_present(working, table, row)
    }

    /// An update needs its key present and every referenced row present.
    pub fn can_update_row(&self, working: &WorkingSet, table: TableId, row: &Row) -> bool {
        let snap = working.get(table);
        snap.contains_key(&snap.key_of(row)) && self.references_present(working, table, row)
    }

    fn references_present(&self, working: &WorkingSet, table: TableId, row: &Row) -> bool {
        self.links.iter().filter(|link| link.from == table).all(|link| {
            let values = row.project(&link.columns);
            if values.iter().any(Value::is_null) {
                return true;
            }
            if link.to == table && row.project(&link.referenced_columns) == values {
                return true;
            }
            contains_values(working.get(link.to), &link.referenced_columns, &values)
        })
    }
}

fn contains_values(snap: &Snapshot, columns: &[usize], values: &[Value]) -> bool {
    if snap.order().positions() == Some(columns) {
        return snap.contains_key(&Key::new(values.to_vec()));
    }
    snap.rows().iter().any(|row| {
        columns
            .iter()
            .zip(values)
            .all(|(&col, value)| row.get(col) == Some(value))
    })
}
