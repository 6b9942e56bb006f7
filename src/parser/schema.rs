// Schema parser: extracts columns, PRIMARY KEY and FOREIGN KEY clauses from CREATE TABLE.
// Favors speed over a full SQL grammar; dumps put one column or constraint per line.

use super::ParseError;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::debug;

/// Foreign key clause with column names as written in the dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

/// One CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub schema: Option<String>,
    pub name: String,
    /// Column name and declared type, in declaration order.
    pub columns: Vec<(String, String)>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeySpec>,
}

pub struct SchemaParser {
    create_table_re: Regex,
    primary_key_re: Regex,
    column_re: Regex,
    foreign_key_re: Regex,
}

impl Default for SchemaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaParser {
    // Build regexes once for reuse.
    pub fn new() -> Self {
        let create_table_re = Regex::new(
            r#"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:[`"]?([^`"\s(.]+)[`"]?\.)?[`"]?([^`"\s(]+)[`"]?"#,
        )
        .expect("valid create table regex");
        let primary_key_re =
            Regex::new(r"(?i)PRIMARY\s+KEY\s*\(([^)]*)\)").expect("valid primary key regex");
        let column_re =
            Regex::new(r#"^\s*[`"](\w+)[`"]\s+(\w+)"#).expect("valid column regex");
        let foreign_key_re = Regex::new(
            r#"(?i)(?:CONSTRAINT\s+[`"]?(\w+)[`"]?\s+)?FOREIGN\s+KEY\s*\(([^)]*)\)\s*REFERENCES\s+(?:[`"]?(\w+)[`"]?\.)?[`"]?(\w+)[`"]?\s*\(([^)]*)\)(?:\s+ON\s+DELETE\s+(RESTRICT|CASCADE|SET\s+NULL|SET\s+DEFAULT|NO\s+ACTION))?(?:\s+ON\s+UPDATE\s+(RESTRICT|CASCADE|SET\s+NULL|SET\s+DEFAULT|NO\s+ACTION))?"#,
        )
        .expect("valid foreign key regex");
        Self {
            create_table_re,
            primary_key_re,
            column_re,
            foreign_key_re,
        }
    }

    // Parse every CREATE TABLE block of a dump file, in file order.
    pub fn parse_tables(
        &self,
        filename: &str,
        bar: Option<&indicatif::ProgressBar>,
    ) -> Result<Vec<TableSchema>, ParseError> {
        debug!("ParseTables: Opening file {}", filename);
        let file = File::open(filename)?;
        self.parse_tables_from(BufReader::new(file), bar)
    }

    pub fn parse_tables_from<R: BufRead>(
        &self,
        mut reader: R,
        bar: Option<&indicatif::ProgressBar>,
    ) -> Result<Vec<TableSchema>, ParseError> {
        let mut tables = Vec::new();
        let mut current: Option<TableSchema> = None;
        let mut table_buf = String::new();

        let mut line = String::new();
        while reader.read_line(&mut line)? > 0 {
            if let Some(b) = bar {
                b.inc(line.len() as u64);
            }

            if let Some(cap) = self.create_table_re.captures(&line) {
                if let Some(table) = cap.get(2) {
                    debug!("ParseTables: Found CREATE TABLE for {}", table.as_str());
                    let mut schema = TableSchema {
                        schema: cap.get(1).map(|m| m.as_str().to_string()),
                        name: table.as_str().to_string(),
                        ..TableSchema::default()
                    };
                    table_buf.clear();
                    // Single-line definitions close on the same line; keys only.
                    let rest = &line[table.end()..];
                    if rest.trim_end().ends_with(';') {
                        self.finish_table(&mut schema, rest);
                        tables.push(schema);
                        current = None;
                    } else {
                        current = Some(schema);
                    }
                }
            } else if let Some(table) = current.as_mut() {
                table_buf.push_str(&line);
                let trimmed = line.trim();
                if let Some(col) = self.parse_column_line(trimmed) {
                    table.columns.push(col);
                }
                if trimmed.ends_with(';') {
                    self.finish_table(table, &table_buf);
                    if let Some(done) = current.take() {
                        tables.push(done);
                    }
                }
            }

            line.clear();
        }

        if let Some(b) = bar {
            b.finish();
        }

        debug!(
            "ParseTables: Processed {} tables, {} with PK",
            tables.len(),
            tables.iter().filter(|t| !t.primary_key.is_empty()).count()
        );
        Ok(tables)
    }

    // Column definition lines start with a quoted identifier; key and
    // constraint lines do not.
    fn parse_column_line(&self, trimmed: &str) -> Option<(String, String)> {
        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("PRIMARY KEY")
            || upper.starts_with("KEY ")
            || upper.starts_with("UNIQUE")
            || upper.starts_with("CONSTRAINT")
            || upper.starts_with("FOREIGN KEY")
            || upper.starts_with("FULLTEXT")
            || upper.starts_with("INDEX")
            || trimmed.starts_with(')')
        {
            return None;
        }
        let cap = self.column_re.captures(trimmed)?;
        Some((cap.get(1)?.as_str().to_string(), cap.get(2)?.as_str().to_string()))
    }

    // Extract PK and FK clauses from a complete CREATE TABLE body.
    fn finish_table(&self, table: &mut TableSchema, body: &str) {
        if let Some(pk_list) = self.primary_key_re.captures(body).and_then(|c| c.get(1)) {
            table.primary_key = split_identifiers(pk_list.as_str());
        }
        // Inline `id INT PRIMARY KEY` column definitions.
        if table.primary_key.is_empty() {
            for l in body.lines() {
                let upper = l.to_ascii_uppercase();
                if upper.contains("PRIMARY KEY") && !upper.trim_start().starts_with("PRIMARY KEY") {
                    if let Some((name, _)) = self.parse_column_line(l.trim()) {
                        table.primary_key.push(name);
                    }
                }
            }
        }
        for cap in self.foreign_key_re.captures_iter(body) {
            let (Some(columns), Some(referenced_table), Some(referenced_columns)) =
                (cap.get(2), cap.get(4), cap.get(5))
            else {
                continue;
            };
            table.foreign_keys.push(ForeignKeySpec {
                name: cap.get(1).map(|m| m.as_str().to_string()),
                columns: split_identifiers(columns.as_str()),
                referenced_schema: cap.get(3).map(|m| m.as_str().to_string()),
                referenced_table: referenced_table.as_str().to_string(),
                referenced_columns: split_identifiers(referenced_columns.as_str()),
                on_delete: cap.get(6).map(|m| normalize_rule(m.as_str())),
                on_update: cap.get(7).map(|m| normalize_rule(m.as_str())),
            });
        }
        debug!(
            "ParseTables: Table {} has {} columns, PK {:?}, {} foreign keys",
            table.name,
            table.columns.len(),
            table.primary_key,
            table.foreign_keys.len()
        );
    }
}

fn split_identifiers(list: &str) -> Vec<String> {
    list.split(',')
        .map(|part| part.trim().trim_matches(&['`', '"', '\''][..]).trim().to_string())
        .filter(|col| !col.is_empty())
        .collect()
}

fn normalize_rule(rule: &str) -> String {
    rule.split_whitespace()
        .map(str::to_ascii_uppercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DUMP: &str = "\
CREATE TABLE `customers` (
  `id` int NOT NULL,
  `name` varchar(64) DEFAULT NULL,
  PRIMARY KEY (`id`)
) ENGINE=InnoDB;

CREATE TABLE IF NOT EXISTS `shop`.`orders` (
  `id` bigint NOT NULL,
  `customer_id` int DEFAULT NULL,
  `placed` date NOT NULL,
  PRIMARY KEY (`id`),
  KEY `fk_customer` (`customer_id`),
  CONSTRAINT `fk_customer` FOREIGN KEY (`customer_id`) REFERENCES `customers` (`id`) ON DELETE CASCADE ON UPDATE NO   ACTION
) ENGINE=InnoDB;

CREATE TABLE `audit` (
  `at` datetime,
  `msg` text
);
";

    #[test]
    fn parses_columns_keys_and_foreign_keys() {
        let tables = SchemaParser::new()
            .parse_tables_from(Cursor::new(DUMP), None)
            .unwrap();
        assert_eq!(tables.len(), 3);

        let customers = &tables[0];
        assert_eq!(customers.name, "customers");
        assert_eq!(
            customers.columns,
            vec![
                ("id".to_string(), "int".to_string()),
                ("name".to_string(), "varchar".to_string())
            ]
        );
        assert_eq!(customers.primary_key, vec!["id"]);

        let orders = &tables[1];
        assert_eq!(orders.schema.as_deref(), Some("shop"));
        assert_eq!(orders.name, "orders");
        assert_eq!(orders.columns.len(), 3);
        assert_eq!(orders.foreign_keys.len(), 1);
        let fk = &orders.foreign_keys[0];
        assert_eq!(fk.name.as_deref(), Some("fk_customer"));
        assert_eq!(fk.columns, vec!["customer_id"]);
        assert_eq!(fk.referenced_table, "customers");
        assert_eq!(fk.referenced_columns, vec!["id"]);
        assert_eq!(fk.on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(fk.on_update.as_deref(), Some("NO ACTION"));

        let audit = &tables[2];
        assert!(audit.primary_key.is_empty());
        assert_eq!(audit.columns.len(), 2);
    }

    #[test]
    fn single_line_table_does_not_swallow_the_next_one() {
        let dump = "CREATE TABLE `a` (`id` int, PRIMARY KEY (`id`));\n\
                    CREATE TABLE `b` (\n  `x` int\n);\n";
        let tables = SchemaParser::new()
            .parse_tables_from(Cursor::new(dump), None)
            .unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].primary_key, vec!["id"]);
        assert_eq!(tables[1].columns.len(), 1);
    }

    #[test]
    fn inline_primary_key() {
        let dump = "CREATE TABLE \"t\" (\n  \"id\" integer PRIMARY KEY,\n  \"v\" text\n);\n";
        let tables = SchemaParser::new()
            .parse_tables_from(Cursor::new(dump), None)
            .unwrap();
        assert_eq!(tables[0].primary_key, vec!["id"]);
    }
}
