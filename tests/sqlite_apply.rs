mod common;

use common::{link, row, table};
use rusqlite::Connection;
use tablediff::sqlite::load_rows;
use tablediff::{
    DiffError, DiffTable, MultiTableDiff, Row, SqliteExecutor, StaticRows, TableDescriptor,
};

const SCHEMA: &str = "
    CREATE TABLE parent (id INTEGER PRIMARY KEY);
    CREATE TABLE child (
        id INTEGER PRIMARY KEY,
        parent_id INTEGER REFERENCES parent (id)
    );
";

fn schema() -> (TableDescriptor, TableDescriptor) {
    let mut parent = table("parent", &[]);
    let mut child = table("child", &["parent_id"]);
    link(&mut child, 1, &mut parent);
    (parent, child)
}

fn open(dir: &tempfile::TempDir, setup: &str) -> Connection {
    let conn = Connection::open(dir.path().join("state.db")).unwrap();
    // The bundled SQLite enables foreign keys by default; seed with them off.
    conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
    conn.execute_batch(setup).unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    conn
}

fn sorted(conn: &Connection, table: &TableDescriptor) -> Vec<Row> {
    let mut rows = load_rows(conn, table).unwrap();
    rows.sort();
    rows
}

/// Reconcile the database contents of `tables` toward `target`.
fn apply(
    conn: &mut Connection,
    tables: &[&TableDescriptor],
    target: Vec<Vec<Row>>,
    allow_postmortem: bool,
) -> Result<usize, DiffError> {
    let live: Vec<StaticRows> = tables
        .iter()
        .map(|t| StaticRows(load_rows(conn, t).unwrap()))
        .collect();
    let wanted: Vec<StaticRows> = target.into_iter().map(StaticRows).collect();
    let old = tables.iter().zip(&live).map(|(t, r)| DiffTable::new(t, r)).collect();
    let new = tables.iter().zip(&wanted).map(|(t, r)| DiffTable::new(t, r)).collect();

    let mut exec = SqliteExecutor::begin(conn).unwrap().allow_postmortem(allow_postmortem);
    let summary = MultiTableDiff::compare(old, new).run(&mut exec)?;
    assert_eq!(exec.executed(), summary.total());
    exec.commit().unwrap();
    Ok(summary.total())
}

#[test]
fn delta_applies_with_foreign_keys_enforced() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let mut conn = open(
        &dir,
        &format!(
            "{SCHEMA}
            INSERT INTO parent VALUES (1), (2);
            INSERT INTO child VALUES (10, 2), (11, 1);"
        ),
    );
    let (parent, child) = schema();

    // Parent first: row 2 must wait for its child, row 3 must exist before 12.
    let target = vec![
        vec![row(&[Some(1)]), row(&[Some(3)])],
        vec![row(&[Some(11), Some(3)]), row(&[Some(12), Some(3)])],
    ];
    let applied = apply(&mut conn, &[&parent, &child], target.clone(), false).unwrap();
    assert_eq!(applied, 5);

    assert_eq!(sorted(&conn, &parent), target[0]);
    assert_eq!(sorted(&conn, &child), target[1]);
    let violations: i64 = conn
        .query_row("SELECT count(*) FROM pragma_foreign_key_check", [], |r| r.get(0))
        .unwrap();
    assert_eq!(violations, 0);
}

#[test]
fn second_run_is_a_no_op() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let mut conn = open(&dir, &format!("{SCHEMA} INSERT INTO parent VALUES (1);"));
    let (parent, child) = schema();
    let target = vec![vec![row(&[Some(1)])], vec![row(&[Some(5), Some(1)])]];
    assert_eq!(apply(&mut conn, &[&parent, &child], target.clone(), false).unwrap(), 1);
    assert_eq!(apply(&mut conn, &[&parent, &child], target, false).unwrap(), 0);
}

#[test]
fn refused_stall_rolls_back() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let mut conn = open(
        &dir,
        "CREATE TABLE a (id INTEGER PRIMARY KEY, b_id INTEGER REFERENCES b (id));
         CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a (id));
         CREATE TABLE solo (id INTEGER PRIMARY KEY);
         INSERT INTO a VALUES (1, 1);
         INSERT INTO b VALUES (1, 1);
         INSERT INTO solo VALUES (7);",
    );
    let mut a = table("a", &["b_id"]);
    let mut b = table("b", &["a_id"]);
    link(&mut a, 1, &mut b);
    link(&mut b, 1, &mut a);
    let solo = table("solo", &[]);

    // The solo delete goes through before the cycle stalls; it must not stick.
    let err = apply(&mut conn, &[&solo, &a, &b], vec![vec![], vec![], vec![]], false).unwrap_err();
    assert!(matches!(err, DiffError::StallRefused { pending: 2 }));

    assert_eq!(sorted(&conn, &solo), vec![row(&[Some(7)])]);
    assert_eq!(sorted(&conn, &a).len(), 1);
    assert_eq!(sorted(&conn, &b).len(), 1);
}

#[test]
fn handler_error_names_the_table() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    // The database lacks the child table entirely.
    let mut conn = open(&dir, "CREATE TABLE parent (id INTEGER PRIMARY KEY);");
    let (parent, child) = schema();
    let live = [StaticRows(vec![]), StaticRows(vec![])];
    let wanted = [
        StaticRows(vec![row(&[Some(1)])]),
        StaticRows(vec![row(&[Some(2), Some(1)])]),
    ];
    let old = vec![DiffTable::new(&parent, &live[0]), DiffTable::new(&child, &live[1])];
    let new = vec![DiffTable::new(&parent, &wanted[0]), DiffTable::new(&child, &wanted[1])];

    let mut exec = SqliteExecutor::begin(&mut conn).unwrap();
    let err = MultiTableDiff::compare(old, new).run(&mut exec).unwrap_err();
    assert!(matches!(err, DiffError::Handler { .. }));
    assert!(err.to_string().starts_with("insert on table child failed"));
    drop(exec);
    assert!(sorted(&conn, &parent).is_empty());
}
