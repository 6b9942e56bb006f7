// Live execution of reconciliation output against SQLite.

use crate::error::BoxError;
use crate::handler::{key_columns, TableChangeHandler};
use crate::model::{Key, Row, TableDescriptor, TableName, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Transaction};
use tracing::{debug, warn};

/// Handler that executes every operation with a prepared statement inside one
/// transaction spanning the whole reconciliation.
///
/// Nothing is committed until [`SqliteExecutor::commit`]; dropping the executor
/// rolls the transaction back.
pub struct SqliteExecutor<'c> {
    tx: Transaction<'c>,
    allow_postmortem: bool,
    executed: usize,
}

impl<'c> SqliteExecutor<'c> {
    pub fn begin(conn: &'c mut Connection) -> rusqlite::Result<Self> {
        let tx = conn.transaction()?;
        Ok(Self {
            tx,
            allow_postmortem: false,
            executed: 0,
        })
    }

    /// Whether to keep executing after a stall. Off by default: a stalled set
    /// would otherwise be written without integrity ordering.
    #[must_use]
    pub const fn allow_postmortem(mut self, allow: bool) -> Self {
        self.allow_postmortem = allow;
        self
    }

    pub const fn executed(&self) -> usize {
        self.executed
    }

    pub fn commit(self) -> rusqlite::Result<()> {
        debug!(statements = self.executed, "committing reconciliation");
        self.tx.commit()
    }

    pub fn rollback(self) -> rusqlite::Result<()> {
        self.tx.rollback()
    }

    fn execute(&mut self, sql: &str, params: Vec<SqlValue>) -> Result<usize, BoxError> {
        let mut stmt = self.tx.prepare_cached(sql)?;
        let affected = stmt.execute(params_from_iter(params))?;
        self.executed += 1;
        Ok(affected)
    }
}

impl TableChangeHandler for SqliteExecutor<'_> {
    fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<(), BoxError> {
        let cols: Vec<String> = table.column_names().map(quote_ident).collect();
        let marks: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_table(&table.name),
            cols.join(", "),
            marks.join(", ")
        );
        self.execute(&sql, row.values().iter().map(to_sql_value).collect())?;
        Ok(())
    }

    fn update_row(
        &mut self,
        table: &TableDescriptor,
        old: &Row,
        new: &Row,
    ) -> Result<(), BoxError> {
        let changed = old.changed_columns(new);
        if changed.is_empty() {
            return Ok(());
        }
        let mut params = Vec::with_capacity(changed.len() + table.primary_key.len());
        let mut set_parts = Vec::with_capacity(changed.len());
        for &idx in &changed {
            params.push(to_sql_value(new.get(idx).unwrap_or(&Value::Null)));
            let col = quote_ident(column_name(table, idx)?);
            set_parts.push(format!("{col} = ?{}", params.len()));
        }
        let key = Key::new(old.project(&key_columns(table)));
        let where_clause = where_clause(table, &key, &mut params)?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_table(&table.name),
            set_parts.join(", "),
            where_clause
        );
        expect_one_row(self.execute(&sql, params)?, "update", &table.name)
    }

    fn delete_row(&mut self, table: &TableDescriptor, key: &Key) -> Result<(), BoxError> {
        let mut params = Vec::with_capacity(key.len());
        let where_clause = where_clause(table, key, &mut params)?;
        let name = quote_table(&table.name);
        // Keyless tables may hold identical rows; remove exactly one of them.
        let sql = if table.is_keyless() {
            format!(
                "DELETE FROM {name} WHERE rowid = \
                 (SELECT rowid FROM {name} WHERE {where_clause} LIMIT 1)"
            )
        } else {
            format!("DELETE FROM {name} WHERE {where_clause}")
        };
        expect_one_row(self.execute(&sql, params)?, "delete", &table.name)
    }

    fn continue_after_error(&mut self) -> bool {
        if !self.allow_postmortem {
            warn!("refusing to apply operations without foreign key ordering");
        }
        self.allow_postmortem
    }

    fn postmortem_started(&mut self) {
        warn!("applying remaining operations without foreign key ordering");
    }
}

fn expect_one_row(affected: usize, what: &str, table: &TableName) -> Result<(), BoxError> {
    if affected == 0 {
        return Err(format!("{what} on {table} matched no row").into());
    }
    Ok(())
}

fn column_name(table: &TableDescriptor, idx: usize) -> Result<&str, BoxError> {
    table
        .columns
        .get(idx)
        .map(|c| c.name.as_str())
        .ok_or_else(|| format!("{}: no column at position {idx}", table.name).into())
}

// Key comparison with IS so NULL key parts still match.
fn where_clause(
    table: &TableDescriptor,
    key: &Key,
    params: &mut Vec<SqlValue>,
) -> Result<String, BoxError> {
    let mut parts = Vec::with_capacity(key.len());
    for (&idx, value) in key_columns(table).iter().zip(key.values()) {
        params.push(to_sql_value(value));
        parts.push(format!("{} IS ?{}", quote_ident(column_name(table, idx)?), params.len()));
    }
    Ok(parts.join(" AND "))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// SQLite has no catalogs; a schema maps to an attached database name.
fn quote_table(name: &TableName) -> String {
    match &name.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&name.name)),
        None => quote_ident(&name.name),
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Date(v) => SqlValue::Text(v.to_string()),
        Value::Bytes(v) => SqlValue::Blob(v.clone()),
    }
}

/// Read a SQLite value back into a row value.
pub fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(v),
        SqlValue::Real(v) => Value::Real(v),
        SqlValue::Text(v) => Value::Text(v),
        SqlValue::Blob(v) => Value::Bytes(v),
    }
}

/// Load every row of `table` from `conn`, in column order.
pub fn load_rows(conn: &Connection, table: &TableDescriptor) -> rusqlite::Result<Vec<Row>> {
    let cols: Vec<String> = table.column_names().map(quote_ident).collect();
    let sql = format!("SELECT {} FROM {}", cols.join(", "), quote_table(&table.name));
    let mut stmt = conn.prepare(&sql)?;
    let width = cols.len();
    let rows = stmt.query_map([], |r| {
        (0..width)
            .map(|i| r.get::<_, SqlValue>(i).map(from_sql_value))
            .collect::<rusqlite::Result<Row>>()
    })?;
    rows.collect()
}
