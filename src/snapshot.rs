// Row sources and key-sorted snapshots.

use crate::error::Result;
use crate::key::KeyOrder;
use crate::model::{Key, Row, TableDescriptor};
use std::cmp::Ordering;
use std::ops::Range;
use tracing::debug;

/// Where a table's rows come from.
///
/// A live editable model overrides `halt_editing` and `wait_for_load`; static
/// data only needs `current_rows`.
pub trait RowSource: Send + Sync {
    /// Commit or cancel an in-progress inline edit so the rows are stable.
    fn halt_editing(&self) {}

    /// Block until any background load of this table has finished.
    fn wait_for_load(&self) {}

    /// All rows available right now.
    fn current_rows(&self) -> Vec<Row>;
}

/// Rows that are fully known up front.
#[derive(Clone, Debug, Default)]
pub struct StaticRows(pub Vec<Row>);

impl RowSource for StaticRows {
    fn current_rows(&self) -> Vec<Row> {
        self.0.clone()
    }
}

impl RowSource for Vec<Row> {
    fn current_rows(&self) -> Vec<Row> {
        self.clone()
    }
}

/// A table's rows at one instant, sorted by the table's key.
///
/// Every mutation keeps the rows sorted so later lookups can binary search.
#[derive(Clone, Debug)]
pub struct Snapshot {
    order: KeyOrder,
    rows: Vec<Row>,
}

impl Snapshot {
    pub const fn empty(order: KeyOrder) -> Self {
        Self {
            order,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(order: KeyOrder, mut rows: Vec<Row>) -> Self {
        rows.sort_by(|a, b| order.cmp_rows(a, b));
        Self { order, rows }
    }

    /// Capture a table's rows.
    ///
    /// With `use_empty` the snapshot is empty regardless of the source, which is
    /// how a table is diffed against "nothing". Otherwise any inline edit is
    /// halted, the background load is optionally awaited, and every available
    /// row is taken. Blocking on the load can take arbitrarily long, so callers
    /// requesting `wait_for_completion` should not be on an interactive thread.
    pub fn extract(
        table: &TableDescriptor,
        source: &dyn RowSource,
        wait_for_completion: bool,
        use_empty: bool,
    ) -> Result<Self> {
        let order = KeyOrder::for_table(table);
        if use_empty {
            return Ok(Self::empty(order));
        }
        source.halt_editing();
        if wait_for_completion {
            source.wait_for_load();
        }
        let rows = source.current_rows();
        for row in &rows {
            table.check_row(row)?;
        }
        debug!(table = %table.name, rows = rows.len(), "snapshot extracted");
        Ok(Self::from_rows(order, rows))
    }

    pub const fn order(&self) -> &KeyOrder {
        &self.order
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    pub fn key_of(&self, row: &Row) -> Key {
        self.order.key_of(row)
    }

    /// Binary search for `key`; `Err` carries the insertion point.
    pub fn search(&self, key: &Key) -> std::result::Result<usize, usize> {
        self.rows
            .binary_search_by(|probe| self.order.cmp_row_key(probe, key))
    }

    /// All positions whose key equals `key` (more than one only for keyless
    /// tables holding duplicate rows).
    pub fn equal_range(&self, key: &Key) -> Range<usize> {
        let start = self
            .rows
            .partition_point(|probe| self.order.cmp_row_key(probe, key) == Ordering::Less);
        let end = self
            .rows
            .partition_point(|probe| self.order.cmp_row_key(probe, key) != Ordering::Greater);
        start..end
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.search(key).is_ok()
    }

    pub fn find(&self, key: &Key) -> Option<&Row> {
        self.search(key).ok().map(|idx| &self.rows[idx])
    }

    /// Insert keeping key order; equal keys are placed after existing ones.
    pub fn insert(&mut self, row: Row) {
        let at = self
            .rows
            .partition_point(|probe| self.order.cmp_rows(probe, &row) != Ordering::Greater);
        self.rows.insert(at, row);
    }

    /// Remove one row with `key`, returning it.
    pub fn remove(&mut self, key: &Key) -> Option<Row> {
        let idx = self.search(key).ok()?;
        Some(self.rows.remove(idx))
    }

    /// Replace the row with the same key as `row`, returning the previous one.
    /// Falls back to an ordered insert when the key is absent.
    pub fn replace(&mut self, row: Row) -> Option<Row> {
        let key = self.order.key_of(&row);
        match self.search(&key) {
            Ok(idx) => Some(std::mem::replace(&mut self.rows[idx], row)),
            Err(idx) => {
                self.rows.insert(idx, row);
                None
            }
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ColumnType, TableName, Value};
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    fn table() -> TableDescriptor {
        TableDescriptor::new(
            TableName::new("items"),
            vec![
                Column::new("id", ColumnType::Integer),
                Column::new("label", ColumnType::Text),
            ],
        )
        .with_primary_key(vec![0])
    }

    fn row(id: i64, label: &str) -> Row {
        Row::new(vec![id.into(), label.into()])
    }

    #[derive(Default)]
    struct Probe {
        halted: AtomicBool,
        waited: AtomicBool,
    }

    impl RowSource for Probe {
        fn halt_editing(&self) {
            self.halted.store(true, AtomicOrdering::SeqCst);
        }

        fn wait_for_load(&self) {
            self.waited.store(true, AtomicOrdering::SeqCst);
        }

        fn current_rows(&self) -> Vec<Row> {
            vec![row(2, "b"), row(1, "a")]
        }
    }

    #[test]
    fn extract_sorts_by_key_and_honors_flags() {
        let probe = Probe::default();
        let snap = Snapshot::extract(&table(), &probe, false, false).unwrap();
        assert_eq!(snap.rows(), &[row(1, "a"), row(2, "b")]);
        assert!(probe.halted.load(AtomicOrdering::SeqCst));
        assert!(!probe.waited.load(AtomicOrdering::SeqCst));

        Snapshot::extract(&table(), &probe, true, false).unwrap();
        assert!(probe.waited.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn use_empty_ignores_source() {
        let snap = Snapshot::extract(&table(), &StaticRows(vec![row(1, "a")]), true, true).unwrap();
        assert!(snap.is_empty());
    }

    #[test]
    fn extract_rejects_wrong_arity() {
        let bad = StaticRows(vec![Row::new(vec![Value::Integer(1)])]);
        assert!(Snapshot::extract(&table(), &bad, false, false).is_err());
    }

    #[test]
    fn mutations_keep_key_order() {
        let mut snap =
            Snapshot::from_rows(KeyOrder::columns(vec![0]), vec![row(5, "e"), row(1, "a")]);
        snap.insert(row(3, "c"));
        assert_eq!(snap.rows(), &[row(1, "a"), row(3, "c"), row(5, "e")]);

        let key = snap.key_of(&row(3, "zzz"));
        assert_eq!(snap.replace(row(3, "C")), Some(row(3, "c")));
        assert_eq!(snap.find(&key), Some(&row(3, "C")));

        assert_eq!(snap.remove(&key), Some(row(3, "C")));
        assert!(!snap.contains_key(&key));
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn equal_range_spans_duplicates() {
        let dup = row(1, "a");
        let snap = Snapshot::from_rows(
            KeyOrder::whole_row(),
            vec![dup.clone(), row(0, "z"), dup.clone()],
        );
        let key = snap.key_of(&dup);
        assert_eq!(snap.equal_range(&key), 1..3);
    }
}
