use crate::error::{DiffError, Result};
use crate::model::value::{Row, Value};
use std::fmt;
use time::macros::format_description;
use time::Date;

/// Possibly-qualified table identity. Catalog and schema are optional.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct TableName {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Case-insensitive comparison of the unqualified name only.
    pub fn same_unqualified(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }

    /// Name match used to resolve a foreign key target. Qualifiers only have to
    /// agree when both sides carry them.
    pub fn refers_to(&self, other: &Self) -> bool {
        fn part_matches(a: &Option<String>, b: &Option<String>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => true,
            }
        }
        self.same_unqualified(other)
            && part_matches(&self.schema, &other.schema)
            && part_matches(&self.catalog, &other.catalog)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{catalog}.")?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{schema}.")?;
        }
        f.write_str(&self.name)
    }
}

/// Declared storage class of a column; drives literal conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ColumnType {
    Integer,
    Real,
    #[default]
    Text,
    Date,
    Bytes,
}

impl ColumnType {
    /// Map a SQL type name (`bigint`, `varchar`, `date`, ...) to a column type.
    pub fn from_sql(decl: &str) -> Self {
        let lower = decl.to_ascii_lowercase();
        let base = lower.split(&['(', ' '][..]).next().unwrap_or_default();
        match base {
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "mediumint" | "serial" => {
                Self::Integer
            }
            "float" | "double" | "real" => Self::Real,
            "date" => Self::Date,
            "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" | "bytea" => {
                Self::Bytes
            }
            // DECIMAL/NUMERIC stay textual to keep exact digits.
            _ => Self::Text,
        }
    }

    /// Convert an unquoted literal (already stripped of SQL quoting) to a value.
    /// Literals that do not fit the declared type are kept as text.
    pub fn parse_literal(self, raw: &str) -> Value {
        match self {
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map_or_else(|_| Value::Text(raw.to_string()), Value::Integer),
            Self::Real => raw
                .trim()
                .parse::<f64>()
                .map_or_else(|_| Value::Text(raw.to_string()), Value::Real),
            Self::Date => Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
                .map_or_else(|_| Value::Text(raw.to_string()), Value::Date),
            Self::Bytes => Value::Bytes(raw.as_bytes().to_vec()),
            Self::Text => Value::Text(raw.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A foreign key from `table.columns` to `referenced.referenced_columns`.
///
/// Column lists hold positions in the respective table's column list. The same
/// struct describes both directions: outbound keys live on the referencing
/// table, inbound ("referencing") keys on the referenced one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub table: TableName,
    pub columns: Vec<usize>,
    pub referenced: TableName,
    pub referenced_columns: Vec<usize>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

impl ForeignKey {
    pub fn new(
        table: TableName,
        columns: Vec<usize>,
        referenced: TableName,
        referenced_columns: Vec<usize>,
    ) -> Self {
        Self {
            name: None,
            table,
            columns,
            referenced,
            referenced_columns,
            on_update: None,
            on_delete: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Table metadata as read from the metadata provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: TableName,
    pub columns: Vec<Column>,
    pub primary_key: Vec<usize>,
    pub foreign_keys: Vec<ForeignKey>,
    pub referenced_by: Vec<ForeignKey>,
}

impl TableDescriptor {
    pub fn new(name: TableName, columns: Vec<Column>) -> Self {
        Self {
            name,
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            referenced_by: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, positions: Vec<usize>) -> Self {
        self.primary_key = positions;
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn is_keyless(&self) -> bool {
        self.primary_key.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Check that every declared position exists.
    pub fn validate(&self) -> Result<()> {
        let width = self.columns.len();
        if let Some(bad) = self.primary_key.iter().find(|&&i| i >= width) {
            return Err(DiffError::invalid_descriptor(
                &self.name,
                format!("primary key position {bad} out of range ({width} columns)"),
            ));
        }
        for fk in &self.foreign_keys {
            if fk.columns.is_empty() || fk.columns.len() != fk.referenced_columns.len() {
                return Err(DiffError::invalid_descriptor(
                    &self.name,
                    format!(
                        "foreign key to {} maps {} columns onto {}",
                        fk.referenced,
                        fk.columns.len(),
                        fk.referenced_columns.len()
                    ),
                ));
            }
            if let Some(bad) = fk.columns.iter().find(|&&i| i >= width) {
                return Err(DiffError::invalid_descriptor(
                    &self.name,
                    format!("foreign key column position {bad} out of range"),
                ));
            }
        }
        Ok(())
    }

    pub fn check_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(DiffError::RowArity {
                table: self.name.to_string(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_type_from_sql_declarations() {
        assert_eq!(ColumnType::from_sql("bigint(20)"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql("DOUBLE"), ColumnType::Real);
        assert_eq!(ColumnType::from_sql("decimal(10,2)"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql("date"), ColumnType::Date);
        assert_eq!(ColumnType::from_sql("varbinary(16)"), ColumnType::Bytes);
        assert_eq!(ColumnType::from_sql("varchar(255)"), ColumnType::Text);
    }

    #[test]
    fn literals_fall_back_to_text() {
        assert_eq!(ColumnType::Integer.parse_literal("42"), Value::Integer(42));
        assert_eq!(
            ColumnType::Integer.parse_literal("4x"),
            Value::Text("4x".into())
        );
        assert!(matches!(
            ColumnType::Date.parse_literal("2024-02-29"),
            Value::Date(_)
        ));
        assert_eq!(
            ColumnType::Date.parse_literal("0000-00-00"),
            Value::Text("0000-00-00".into())
        );
    }

    #[test]
    fn qualified_names_match_when_qualifiers_agree() {
        let plain = TableName::new("Orders");
        let qualified = TableName::new("orders").with_schema("shop");
        let other_schema = TableName::new("orders").with_schema("archive");
        assert!(plain.refers_to(&qualified));
        assert!(!qualified.refers_to(&other_schema));
        assert!(qualified.same_unqualified(&other_schema));
        assert_eq!(qualified.to_string(), "shop.orders");
    }

    #[test]
    fn validate_rejects_out_of_range_key() {
        let desc = TableDescriptor::new(
            TableName::new("t"),
            vec![Column::new("id", ColumnType::Integer)],
        )
        .with_primary_key(vec![1]);
        assert!(matches!(
            desc.validate(),
            Err(DiffError::InvalidDescriptor { .. })
        ));
    }
}
