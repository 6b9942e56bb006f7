// Dump catalog: table descriptors and row sets read from one SQL dump.
// Schema and INSERT parsing are two streaming passes over the same file.

use crate::model::{Column, ColumnType, ForeignKey, Row, TableDescriptor, TableName, Value};
use crate::parser::insert::InsertParser;
use crate::parser::schema::{SchemaParser, TableSchema};
use crate::parser::{hex_literal, unquote_literal, InsertRow, ParseError};
use crate::progress::ProgressManager;
use crate::scheduler::DiffTable;
use crate::snapshot::StaticRows;
use ahash::{AHashMap, AHashSet};
use std::io::{BufRead, Cursor};
use tracing::debug;

/// Every table of a dump with its rows, in `CREATE TABLE` order.
#[derive(Debug, Default)]
pub struct DumpCatalog {
    tables: Vec<TableDescriptor>,
    rows: Vec<StaticRows>,
}

impl DumpCatalog {
    /// Parse the dump at `path`, one progress bar per pass.
    pub fn load(path: &str, progress: &ProgressManager) -> Result<Self, ParseError> {
        let schema_bar = progress.new_file_bar(path, "Schema");
        let schemas = SchemaParser::new().parse_tables(path, schema_bar.as_ref())?;
        let mut catalog = Self::from_schemas(&schemas);

        let insert_bar = progress.new_file_bar(path, "Rows");
        let mut loader = RowLoader::new(&catalog);
        InsertParser::new().parse_inserts_stream(path, insert_bar.as_ref(), |row| {
            loader.accept(row)
        })?;
        loader.finish(&mut catalog);
        Ok(catalog)
    }

    /// Parse a dump already held in memory or behind any reader.
    pub fn from_reader<R: BufRead>(mut reader: R, label: &str) -> Result<Self, ParseError> {
        // Both passes need the text; buffer it once.
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let schemas = SchemaParser::new().parse_tables_from(Cursor::new(text.as_bytes()), None)?;
        let mut catalog = Self::from_schemas(&schemas);
        let mut loader = RowLoader::new(&catalog);
        InsertParser::new().parse_inserts_from(Cursor::new(text.as_bytes()), None, label, |row| {
            loader.accept(row)
        })?;
        loader.finish(&mut catalog);
        Ok(catalog)
    }

    /// Build descriptors from parsed CREATE TABLE blocks.
    ///
    /// Foreign keys naming an unknown table or column are dropped; every kept
    /// key is mirrored into the referenced table's `referenced_by` list.
    pub fn from_schemas(schemas: &[TableSchema]) -> Self {
        let mut tables: Vec<TableDescriptor> = schemas.iter().map(describe).collect();

        let mut fks = Vec::new();
        for (schema, table) in schemas.iter().zip(&tables) {
            for clause in &schema.foreign_keys {
                let Some(target) = tables
                    .iter()
                    .find(|t| t.name.name.eq_ignore_ascii_case(&clause.referenced_table))
                else {
                    debug!(
                        "Catalog: {} references unknown table {}, ignoring key",
                        table.name, clause.referenced_table
                    );
                    continue;
                };
                let columns: Option<Vec<usize>> =
                    clause.columns.iter().map(|c| table.column_index(c)).collect();
                let referenced: Option<Vec<usize>> = clause
                    .referenced_columns
                    .iter()
                    .map(|c| target.column_index(c))
                    .collect();
                let (Some(columns), Some(referenced)) = (columns, referenced) else {
                    debug!(
                        "Catalog: {} has a foreign key on unknown columns, ignoring key",
                        table.name
                    );
                    continue;
                };
                let mut fk =
                    ForeignKey::new(table.name.clone(), columns, target.name.clone(), referenced);
                fk.name = clause.name.clone();
                fk.on_delete = clause.on_delete.clone();
                fk.on_update = clause.on_update.clone();
                fks.push(fk);
            }
        }

        for fk in fks {
            if let Some(target) = tables.iter_mut().find(|t| t.name == fk.referenced) {
                target.referenced_by.push(fk.clone());
            }
            if let Some(source) = tables.iter_mut().find(|t| t.name == fk.table) {
                source.foreign_keys.push(fk);
            }
        }

        let rows = tables.iter().map(|_| StaticRows(Vec::new())).collect();
        Self { tables, rows }
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn rows(&self, idx: usize) -> Option<&[Row]> {
        self.rows.get(idx).map(|r| r.0.as_slice())
    }

    pub fn table_index(&self, name: &str) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| t.name.name.eq_ignore_ascii_case(name))
    }

    pub fn row_count(&self) -> usize {
        self.rows.iter().map(|r| r.0.len()).sum()
    }

    /// Borrow every table as reconciliation input.
    pub fn diff_tables(&self) -> Vec<DiffTable<'_>> {
        self.tables
            .iter()
            .zip(&self.rows)
            .map(|(descriptor, rows)| DiffTable::new(descriptor, rows))
            .collect()
    }
}

fn describe(schema: &TableSchema) -> TableDescriptor {
    let mut name = TableName::new(schema.name.clone());
    if let Some(s) = &schema.schema {
        name = name.with_schema(s.clone());
    }
    let columns: Vec<Column> = schema
        .columns
        .iter()
        .map(|(col, decl)| Column::new(col.clone(), ColumnType::from_sql(decl)))
        .collect();
    let mut table = TableDescriptor::new(name, columns);
    let pk: Option<Vec<usize>> = schema
        .primary_key
        .iter()
        .map(|c| table.column_index(c))
        .collect();
    match pk {
        Some(pk) => table.primary_key = pk,
        None => debug!("Catalog: {} primary key names unknown columns", table.name),
    }
    table
}

// Routes parsed INSERT rows to their table and converts literals.
struct RowLoader {
    index: AHashMap<String, usize>,
    columns: Vec<Vec<(String, ColumnType)>>,
    rows: Vec<Vec<Row>>,
    missing_tables: AHashSet<String>,
    seen_tables: AHashSet<String>,
    skipped: usize,
}

impl RowLoader {
    fn new(catalog: &DumpCatalog) -> Self {
        let mut index = AHashMap::new();
        for (i, t) in catalog.tables.iter().enumerate() {
            index.entry(t.name.name.to_ascii_lowercase()).or_insert(i);
        }
        Self {
            index,
            columns: catalog
                .tables
                .iter()
                .map(|t| t.columns.iter().map(|c| (c.name.clone(), c.ty)).collect())
                .collect(),
            rows: vec![Vec::new(); catalog.tables.len()],
            missing_tables: AHashSet::new(),
            seen_tables: AHashSet::new(),
            skipped: 0,
        }
    }

    fn accept(&mut self, insert: InsertRow) {
        let key = insert.table.to_ascii_lowercase();
        let Some(&idx) = self.index.get(&key) else {
            self.missing_tables.insert(insert.table);
            return;
        };
        self.seen_tables.insert(key);
        match convert_row(&self.columns[idx], &insert) {
            Some(row) => self.rows[idx].push(row),
            None => {
                self.skipped += 1;
                debug!(
                    "Catalog: skip row for {} ({} values for {} columns)",
                    insert.table,
                    insert.values.len(),
                    self.columns[idx].len()
                );
            }
        }
    }

    fn finish(self, catalog: &mut DumpCatalog) {
        for table in &self.missing_tables {
            debug!("Catalog: INSERT into {} without CREATE TABLE, rows ignored", table);
        }
        debug!(
            "Catalog: rows for {} of {} tables, {} rows skipped",
            self.seen_tables.len(),
            catalog.tables.len(),
            self.skipped
        );
        catalog.rows = self.rows.into_iter().map(StaticRows).collect();
    }
}

// Place INSERT values at their schema positions; unnamed columns become NULL.
fn convert_row(columns: &[(String, ColumnType)], insert: &InsertRow) -> Option<Row> {
    if insert.columns.is_empty() {
        if insert.values.len() != columns.len() {
            return None;
        }
        let values = columns
            .iter()
            .zip(&insert.values)
            .map(|((_, ty), raw)| convert_literal(*ty, raw))
            .collect();
        return Some(Row::new(values));
    }

    let mut values = vec![Value::Null; columns.len()];
    for (name, raw) in insert.columns.iter().zip(&insert.values) {
        let idx = columns
            .iter()
            .position(|(col, _)| col.eq_ignore_ascii_case(name))?;
        values[idx] = convert_literal(columns[idx].1, raw);
    }
    Some(Row::new(values))
}

fn convert_literal(ty: ColumnType, raw: &str) -> Value {
    if ty == ColumnType::Bytes {
        if let Some(bytes) = hex_literal(raw) {
            return Value::Bytes(bytes);
        }
    }
    match unquote_literal(raw) {
        None => Value::Null,
        Some(text) => ty.parse_literal(&text),
    }
}
