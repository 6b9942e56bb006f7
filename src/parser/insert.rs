// INSERT parser: streams INSERT statements and expands them into row objects.
// Parsing stays simple (no full SQL grammar) for speed.

use super::{InsertRow, ParseError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{debug, enabled, Level};

#[derive(Default)]
pub struct InsertParser;

impl InsertParser {
    pub const fn new() -> Self {
        Self
    }

    // Parse INSERT statements from a file, streaming rows to the caller.
    // If a progress bar is provided, it is advanced by bytes read.
    pub fn parse_inserts_stream<F>(
        &self,
        filename: &str,
        bar: Option<&indicatif::ProgressBar>,
        on_row: F,
    ) -> Result<usize, ParseError>
    where
        F: FnMut(InsertRow),
    {
        debug!("ParseInsertsStream: Opening file {}", filename);
        let file = File::open(filename)?;
        self.parse_inserts_from(BufReader::new(file), bar, filename, on_row)
    }

    /// Same as [`InsertParser::parse_inserts_stream`] over any reader.
    /// Returns the number of complete statements seen.
    pub fn parse_inserts_from<R, F>(
        &self,
        mut reader: R,
        bar: Option<&indicatif::ProgressBar>,
        label: &str,
        mut on_row: F,
    ) -> Result<usize, ParseError>
    where
        R: BufRead,
        F: FnMut(InsertRow),
    {
        let mut acc = InsertAccumulator::new();
        let mut bytes_read: u64 = 0;
        let mut last_logged: u64 = 0;

        let mut line = String::new();
        while reader.read_line(&mut line)? > 0 {
            let line_len = line.len() as u64;
            bytes_read += line_len;
            if let Some(b) = bar {
                b.inc(line_len);
            } else if enabled!(Level::DEBUG) && bytes_read - last_logged > 100 * 1024 * 1024 {
                debug!("ParseInsertsStream: {} bytes read for {}", bytes_read, label);
                last_logged = bytes_read;
            }

            for stmt in acc.process_line(&line) {
                self.emit_rows(&stmt, &mut on_row);
            }

            line.clear();
        }

        // Flush any pending statement at EOF.
        for stmt in acc.finalize() {
            self.emit_rows(&stmt, &mut on_row);
        }

        if let Some(b) = bar {
            b.finish();
        }

        debug!(
            "ParseInsertsStream: processed {} statements for {}",
            acc.statements_processed, label
        );
        Ok(acc.statements_processed)
    }

    fn emit_rows<F: FnMut(InsertRow)>(&self, stmt: &str, on_row: &mut F) {
        match self.expand_insert(stmt) {
            Ok(rows) => rows.into_iter().for_each(|row| on_row(row)),
            Err(e) => debug!("ParseInsertsStream: failed to expand INSERT: {}", e),
        }
    }

    // Expand a single INSERT statement into one InsertRow per value group.
    // An empty column list means the statement relies on schema column order.
    pub fn expand_insert(&self, insert_stmt: &str) -> Result<Vec<InsertRow>, ParseError> {
        let stmt = insert_stmt.trim();
        let upper = stmt.to_ascii_uppercase();
        let insert_idx = upper
            .find("INSERT INTO")
            .ok_or_else(|| malformed("not an INSERT statement"))?;
        let rest = stmt[insert_idx + "INSERT INTO".len()..].trim_start();

        let (table, rest) = parse_table_name(rest)?;
        debug!("ExpandInsert: table {}", table);

        // Parse explicit columns if present.
        let mut columns: Vec<String> = Vec::new();
        let mut rest = rest.trim_start();
        if rest.starts_with('(') {
            let end = matching_paren(rest).ok_or_else(|| malformed("invalid column list"))?;
            for col in rest[1..end].split(',') {
                let col = col.trim().trim_matches(&['`', '\'', '"'][..]);
                if !col.is_empty() {
                    columns.push(col.to_string());
                }
            }
            rest = rest[end + 1..].trim_start();
        }

        // Find VALUES keyword.
        let values_pos = rest
            .to_ascii_uppercase()
            .find("VALUES")
            .ok_or_else(|| malformed("no VALUES clause"))?;
        let mut values_part = rest[values_pos + "VALUES".len()..].trim();
        if let Some(stripped) = values_part.strip_suffix(';') {
            values_part = stripped.trim_end();
        }

        let groups = split_value_groups_with_quotes(values_part);
        debug!("ExpandInsert: {} has {} value groups", table, groups.len());

        let mut rows = Vec::with_capacity(groups.len());
        for group in groups {
            let mut group = group.trim();
            if group.starts_with('(') && group.ends_with(')') {
                group = &group[1..group.len() - 1];
            }
            let values = parse_values_with_quotes(group);
            if !columns.is_empty() && values.len() != columns.len() {
                debug!(
                    "ExpandInsert: skip row (expected {}, got {})",
                    columns.len(),
                    values.len()
                );
                continue;
            }
            rows.push(InsertRow {
                table: table.clone(),
                columns: columns.clone(),
                values,
            });
        }

        Ok(rows)
    }
}

fn malformed(reason: &str) -> ParseError {
    ParseError::Malformed(reason.to_string())
}

// Table name with an optional `schema.` qualifier, which is dropped.
fn parse_table_name(rest: &str) -> Result<(String, &str), ParseError> {
    let mut rest = rest;
    loop {
        let (part, tail) = match rest.chars().next() {
            Some(q @ ('`' | '"')) => {
                let end = rest[1..]
                    .find(q)
                    .ok_or_else(|| malformed("invalid table name"))?
                    + 1;
                (&rest[1..end], &rest[end + 1..])
            }
            Some(_) => {
                let end = rest
                    .find(|c: char| c == '(' || c == '.' || c.is_whitespace())
                    .unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            }
            None => return Err(malformed("invalid table name")),
        };
        if part.is_empty() {
            return Err(malformed("invalid table name"));
        }
        match tail.strip_prefix('.') {
            Some(next) => rest = next,
            None => return Ok((part.to_string(), tail)),
        }
    }
}

// Byte index of the parenthesis closing the one `s` starts with.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        if c == '(' {
            depth += 1;
        } else if c == ')' {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

// Tracks an INSERT statement across multiple lines.
struct InsertAccumulator {
    buffer: String,
    in_single_quote: bool,
    in_double_quote: bool,
    escape_next: bool,
    paren_depth: i32,
    in_insert: bool,
    statements_processed: usize,
}

impl InsertAccumulator {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            in_single_quote: false,
            in_double_quote: false,
            escape_next: false,
            paren_depth: 0,
            in_insert: false,
            statements_processed: 0,
        }
    }

    // Process a single line and return any complete INSERT statements found.
    fn process_line(&mut self, line: &str) -> Vec<String> {
        let mut results = Vec::new();
        if !self.in_insert && line.to_uppercase().contains("INSERT INTO") {
            self.buffer.clear();
            self.buffer.push_str(line);
            self.in_insert = true;
            self.reset_state();
            self.process_line_content(line);
            if line.trim_end().ends_with(';') && self.paren_depth == 0 {
                results.push(self.buffer.clone());
                self.buffer.clear();
                self.in_insert = false;
                self.statements_processed += 1;
            }
            return results;
        }

        if self.in_insert {
            self.buffer.push_str(line);
            self.process_line_content(line);
            if line.trim_end().ends_with(';') && self.paren_depth == 0 {
                results.push(self.buffer.clone());
                self.buffer.clear();
                self.in_insert = false;
                self.statements_processed += 1;
            }
        }
        results
    }

    // Scan characters to keep track of quotes and parenthesis depth.
    fn process_line_content(&mut self, line: &str) {
        for c in line.chars() {
            if self.escape_next {
                self.escape_next = false;
                continue;
            }
            if c == '\\' {
                self.escape_next = true;
                continue;
            }
            if c == '\'' && !self.in_double_quote {
                self.in_single_quote = !self.in_single_quote;
            } else if c == '"' && !self.in_single_quote {
                self.in_double_quote = !self.in_double_quote;
            } else if !self.in_single_quote && !self.in_double_quote {
                if c == '(' {
                    self.paren_depth += 1;
                } else if c == ')' {
                    self.paren_depth -= 1;
                }
            }
        }
    }

    // Flush remaining buffer at EOF (best effort).
    fn finalize(&mut self) -> Vec<String> {
        let mut results = Vec::new();
        if self.in_insert && !self.buffer.is_empty() {
            results.push(self.buffer.clone());
            self.buffer.clear();
            self.statements_processed += 1;
        }
        results
    }

    fn reset_state(&mut self) {
        self.in_single_quote = false;
        self.in_double_quote = false;
        self.escape_next = false;
        self.paren_depth = 0;
    }
}

// Split value groups: (...),(...),... while respecting quotes.
fn split_value_groups_with_quotes(values_part: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut buf = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    let mut paren_depth = 0i32;

    for c in values_part.chars() {
        if escape {
            buf.push(c);
            escape = false;
            continue;
        }
        if c == '\\' {
            buf.push(c);
            escape = true;
            continue;
        }
        if c == '\'' && !in_double {
            buf.push(c);
            in_single = !in_single;
            continue;
        }
        if c == '"' && !in_single {
            buf.push(c);
            in_double = !in_double;
            continue;
        }
        if !in_single && !in_double {
            if c == '(' {
                paren_depth += 1;
                buf.push(c);
                continue;
            }
            if c == ')' {
                paren_depth -= 1;
                buf.push(c);
                if paren_depth == 0 {
                    groups.push(buf.clone());
                    buf.clear();
                }
                continue;
            }
            if c == ',' && paren_depth == 0 {
                // Separator between groups; skip.
                continue;
            }
        }
        buf.push(c);
    }

    if !buf.trim().is_empty() {
        groups.push(buf.trim().to_string());
    }
    groups
}

// Parse comma-separated values within a single group, respecting quotes.
// Quotes stay in the value; NULL and string literals are told apart later.
fn parse_values_with_quotes(values_str: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut buf = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    let mut depth = 0i32;

    for c in values_str.chars() {
        if escape {
            buf.push(c);
            escape = false;
            continue;
        }
        if c == '\\' {
            buf.push(c);
            escape = true;
            continue;
        }
        if c == '\'' && !in_double && depth == 0 {
            buf.push(c);
            in_single = !in_single;
            continue;
        }
        if c == '"' && !in_single && depth == 0 {
            buf.push(c);
            in_double = !in_double;
            continue;
        }
        if !in_single && !in_double {
            if c == '(' {
                depth += 1;
            } else if c == ')' {
                depth -= 1;
            }
        }
        if !in_single && !in_double && depth == 0 && c == ',' {
            values.push(buf.trim().to_string());
            buf.clear();
        } else {
            buf.push(c);
        }
    }

    values.push(buf.trim().to_string());
    values
}
