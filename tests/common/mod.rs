// Shared builders and handlers for the integration tests.
#![allow(dead_code)]

use tablediff::{
    key_columns, BoxError, ChangeLog, Column, ColumnType, ForeignKey, Key, RecordedChange, Row,
    TableChangeHandler, TableDescriptor, TableName, Value,
};

pub fn init() {
    tablediff::logger::init_for_tests();
}

/// Integer-keyed table `name(id, <cols>...)` with primary key `id`.
pub fn table(name: &str, cols: &[&str]) -> TableDescriptor {
    let mut columns = vec![Column::new("id", ColumnType::Integer)];
    columns.extend(cols.iter().map(|c| Column::new(*c, ColumnType::Integer)));
    TableDescriptor::new(TableName::new(name), columns).with_primary_key(vec![0])
}

/// Declare `child.column -> parent.id` on both descriptors.
pub fn link(child: &mut TableDescriptor, column: usize, parent: &mut TableDescriptor) {
    let fk = ForeignKey::new(child.name.clone(), vec![column], parent.name.clone(), vec![0]);
    parent.referenced_by.push(fk.clone());
    child.foreign_keys.push(fk);
}

pub fn row(values: &[Option<i64>]) -> Row {
    values.iter().map(|v| Value::from(*v)).collect()
}

pub fn ids(values: &[i64]) -> Vec<Row> {
    values.iter().map(|&v| row(&[Some(v)])).collect()
}

/// Handler that replays every operation on an in-memory copy of the tables
/// and checks every foreign key after each one.
pub struct IntegrityCheck {
    pub tables: Vec<TableDescriptor>,
    pub state: Vec<Vec<Row>>,
    pub log: ChangeLog,
    pub violations: Vec<String>,
    pub checking: bool,
}

impl IntegrityCheck {
    pub fn new(tables: &[&TableDescriptor], state: Vec<Vec<Row>>, allow_postmortem: bool) -> Self {
        let mut check = Self {
            tables: tables.iter().map(|t| (*t).clone()).collect(),
            state,
            log: ChangeLog::new(allow_postmortem),
            violations: Vec::new(),
            checking: true,
        };
        check.verify("initial state");
        check
    }

    pub fn changes(&self) -> &[RecordedChange] {
        &self.log.changes
    }

    /// Rows of every table, sorted, for order-insensitive comparison.
    pub fn sorted_state(&self) -> Vec<Vec<Row>> {
        self.state
            .iter()
            .map(|rows| {
                let mut rows = rows.clone();
                rows.sort();
                rows
            })
            .collect()
    }

    fn index(&self, table: &TableDescriptor) -> Result<usize, BoxError> {
        self.tables
            .iter()
            .position(|t| t.name == table.name)
            .ok_or_else(|| format!("unknown table {}", table.name).into())
    }

    fn position_of(&self, idx: usize, key: &Key) -> Result<usize, BoxError> {
        let cols = key_columns(&self.tables[idx]);
        self.state[idx]
            .iter()
            .position(|r| r.project(&cols) == key.values())
            .ok_or_else(|| format!("no row {key} in {}", self.tables[idx].name).into())
    }

    fn verify(&mut self, after: &str) {
        if !self.checking {
            return;
        }
        for (from, table) in self.tables.iter().enumerate() {
            for fk in &table.foreign_keys {
                let Some(to) = self.tables.iter().position(|t| t.name == fk.referenced) else {
                    continue;
                };
                for child in &self.state[from] {
                    let values = child.project(&fk.columns);
                    if values.iter().any(Value::is_null) {
                        continue;
                    }
                    let present = self.state[to]
                        .iter()
                        .any(|parent| parent.project(&fk.referenced_columns) == values);
                    if !present {
                        self.violations
                            .push(format!("{} row {:?} dangles after {after}", table.name, child));
                    }
                }
            }
        }
    }
}

impl TableChangeHandler for IntegrityCheck {
    fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<(), BoxError> {
        let idx = self.index(table)?;
        self.log.insert_row(table, row)?;
        self.state[idx].push(row.clone());
        self.verify(&format!("insert into {}", table.name));
        Ok(())
    }

    fn update_row(
        &mut self,
        table: &TableDescriptor,
        old: &Row,
        new: &Row,
    ) -> Result<(), BoxError> {
        let idx = self.index(table)?;
        self.log.update_row(table, old, new)?;
        let key = Key::new(old.project(&key_columns(table)));
        let pos = self.position_of(idx, &key)?;
        self.state[idx][pos] = new.clone();
        self.verify(&format!("update of {}", table.name));
        Ok(())
    }

    fn delete_row(&mut self, table: &TableDescriptor, key: &Key) -> Result<(), BoxError> {
        let idx = self.index(table)?;
        self.log.delete_row(table, key)?;
        let pos = self.position_of(idx, key)?;
        self.state[idx].remove(pos);
        self.verify(&format!("delete from {}", table.name));
        Ok(())
    }

    fn continue_after_error(&mut self) -> bool {
        self.log.continue_after_error()
    }

    fn postmortem_started(&mut self) {
        self.log.postmortem_started();
        // Nothing is promised past this point.
        self.checking = false;
    }
}

/// Short labels (`"delete child"`) of the recorded calls, in order.
pub fn labels(changes: &[RecordedChange]) -> Vec<String> {
    changes
        .iter()
        .map(|c| match c {
            RecordedChange::Insert { table, .. } => format!("insert {table}"),
            RecordedChange::Update { table, .. } => format!("update {table}"),
            RecordedChange::Delete { table, .. } => format!("delete {table}"),
            RecordedChange::PostmortemStarted => "postmortem".to_string(),
        })
        .collect()
}
