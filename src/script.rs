// SQL script rendering of reconciliation output.
// Statements use the MySQL dialect the dumps are written in: backtick
// identifiers, and string literals escaped the way `unquote_literal` reads them.

use crate::error::BoxError;
use crate::handler::{key_columns, TableChangeHandler};
use crate::model::{Key, Row, TableDescriptor, TableName, Value};
use std::io::{self, Write};
use tracing::warn;

/// Handler that writes one SQL statement per operation.
///
/// Statements emitted after a stall are written commented out, since their
/// order no longer guarantees referential integrity.
pub struct ScriptEmitter<W: Write> {
    out: W,
    allow_postmortem: bool,
    postmortem: bool,
    statements: usize,
    commented: usize,
    deferred_error: Option<io::Error>,
}

impl<W: Write> ScriptEmitter<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out,
            allow_postmortem: true,
            postmortem: false,
            statements: 0,
            commented: 0,
            deferred_error: None,
        }
    }

    /// Whether a stalled reconciliation may finish with commented-out statements.
    #[must_use]
    pub const fn allow_postmortem(mut self, allow: bool) -> Self {
        self.allow_postmortem = allow;
        self
    }

    pub fn write_header(&mut self, title: &str) -> std::io::Result<()> {
        writeln!(self.out, "-- {title}")?;
        writeln!(self.out)
    }

    pub fn write_footer(&mut self) -> std::io::Result<()> {
        writeln!(
            self.out,
            "-- End of script: {} statements ({} commented out)",
            self.statements, self.commented
        )
    }

    /// Number of statements written, commented-out ones included.
    pub const fn statements(&self) -> usize {
        self.statements
    }

    pub const fn commented_statements(&self) -> usize {
        self.commented
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }

    // Every line of a comment gets its own marker, so no value can end one.
    fn write_commented(&mut self, text: &str) -> io::Result<()> {
        for line in text.split(['\n', '\r']) {
            writeln!(self.out, "-- {line}")?;
        }
        Ok(())
    }

    fn write_block(&mut self, comments: &[String], statement: &str) -> Result<(), BoxError> {
        if let Some(err) = self.deferred_error.take() {
            return Err(err.into());
        }
        for comment in comments {
            self.write_commented(comment)?;
        }
        if self.postmortem {
            self.write_commented(statement)?;
            self.commented += 1;
        } else {
            writeln!(self.out, "{statement}")?;
        }
        writeln!(self.out)?;
        self.statements += 1;
        Ok(())
    }
}

impl<W: Write> TableChangeHandler for ScriptEmitter<W> {
    fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<(), BoxError> {
        let comment = format!("NEW RECORD IN {}", table.name);
        self.write_block(&[comment], &build_insert_statement(table, row))
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
        let mut comments = vec![format!("TABLE {}", table.name)];
        for &idx in &changed {
            let value = old.get(idx).map_or_else(|| "NULL".to_string(), format_sql_value);
            comments.push(format!("{} old value: {value}", column_name(table, idx)));
        }
        let key = Key::new(old.project(&key_columns(table)));
        let statement = build_update_statement(table, new, &changed, &key);
        self.write_block(&comments, &statement)
    }

    fn delete_row(&mut self, table: &TableDescriptor, key: &Key) -> Result<(), BoxError> {
        let shown: Vec<String> = key.values().iter().map(format_sql_value).collect();
        let comment = format!("DELETED FROM {}: ({})", table.name, shown.join(", "));
        self.write_block(&[comment], &build_delete_statement(table, key))
    }

    fn continue_after_error(&mut self) -> bool {
        self.allow_postmortem
    }

    fn postmortem_started(&mut self) {
        self.postmortem = true;
        let banner = "-- WARNING: the statements below could not be ordered to satisfy \
                      foreign keys.\n-- They are commented out; review them before running.\n\n";
        // A failed banner write surfaces on the next statement write.
        if let Err(err) = self.out.write_all(banner.as_bytes()) {
            self.deferred_error = Some(err);
        }
    }
}

/// Quote an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn quote_table(name: &TableName) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(catalog) = &name.catalog {
        parts.push(quote_ident(catalog));
    }
    if let Some(schema) = &name.schema {
        parts.push(quote_ident(schema));
    }
    parts.push(quote_ident(&name.name));
    parts.join(".")
}

/// Render a value as a SQL literal.
pub fn format_sql_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) if v.is_finite() => v.to_string(),
        Value::Real(v) => {
            warn!(value = %v, "non-finite real written as NULL");
            "NULL".to_string()
        }
        Value::Text(v) => format!("'{}'", escape_text(v)),
        Value::Date(v) => format!("'{v}'"),
        Value::Bytes(v) => format!("X'{}'", hex::encode(v)),
    }
}

// Inverse of the escapes `unquote_literal` decodes.
fn escape_text(v: &str) -> String {
    let mut out = String::with_capacity(v.len() + 2);
    for c in v.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\u{1a}' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
    out
}

fn column_name(table: &TableDescriptor, idx: usize) -> &str {
    table.columns.get(idx).map_or("?", |c| c.name.as_str())
}

// Build INSERT SQL with every column.
fn build_insert_statement(table: &TableDescriptor, row: &Row) -> String {
    let cols: Vec<String> = table.column_names().map(quote_ident).collect();
    let vals: Vec<String> = row.values().iter().map(format_sql_value).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_table(&table.name),
        cols.join(", "),
        vals.join(", ")
    )
}

// Build UPDATE SQL setting only the changed columns.
fn build_update_statement(
    table: &TableDescriptor,
    row: &Row,
    changed: &[usize],
    key: &Key,
) -> String {
    let set_parts: Vec<String> = changed
        .iter()
        .map(|&idx| {
            let value = row.get(idx).unwrap_or(&Value::Null);
            format!("{}={}", quote_ident(column_name(table, idx)), format_sql_value(value))
        })
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {};",
        quote_table(&table.name),
        set_parts.join(", "),
        build_where_clause(table, key)
    )
}

fn build_delete_statement(table: &TableDescriptor, key: &Key) -> String {
    format!(
        "DELETE FROM {} WHERE {};",
        quote_table(&table.name),
        build_where_clause(table, key)
    )
}

// WHERE clause over the key columns; NULL key parts use IS NULL.
fn build_where_clause(table: &TableDescriptor, key: &Key) -> String {
    key_columns(table)
        .iter()
        .zip(key.values())
        .map(|(&idx, value)| {
            let col = quote_ident(column_name(table, idx));
            if value.is_null() {
                format!("{col} IS NULL")
            } else {
                format!("{col}={}", format_sql_value(value))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
