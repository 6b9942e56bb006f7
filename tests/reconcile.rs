mod common;

use common::{ids, labels, link, row, table, IntegrityCheck};
use tablediff::{
    Column, ColumnType, DiffError, DiffTable, Key, MultiTableDiff, RecordedChange, Row,
    StaticRows, TableDescriptor, TableName, Value,
};

fn parent_child() -> (TableDescriptor, TableDescriptor) {
    let mut parent = table("parent", &[]);
    let mut child = table("child", &["parent_id"]);
    link(&mut child, 1, &mut parent);
    (parent, child)
}

fn pair(id: i64, parent: Option<i64>) -> Row {
    row(&[Some(id), parent])
}

/// Run a compare over `tables` (in the given order) and replay it on a checker.
fn reconcile(
    tables: &[&TableDescriptor],
    old: Vec<Vec<Row>>,
    new: Vec<Vec<Row>>,
    allow_postmortem: bool,
) -> (Result<tablediff::DiffSummary, DiffError>, IntegrityCheck) {
    let old_rows: Vec<StaticRows> = old.iter().cloned().map(StaticRows).collect();
    let new_rows: Vec<StaticRows> = new.iter().cloned().map(StaticRows).collect();
    let old_tables = tables
        .iter()
        .zip(&old_rows)
        .map(|(t, r)| DiffTable::new(t, r))
        .collect();
    let new_tables = tables
        .iter()
        .zip(&new_rows)
        .map(|(t, r)| DiffTable::new(t, r))
        .collect();
    let mut check = IntegrityCheck::new(tables, old, allow_postmortem);
    let result = MultiTableDiff::compare(old_tables, new_tables).run(&mut check);
    (result, check)
}

fn sorted(mut tables: Vec<Vec<Row>>) -> Vec<Vec<Row>> {
    for rows in &mut tables {
        rows.sort();
    }
    tables
}

#[test]
fn identical_snapshots_emit_nothing() {
    common::init();
    let (parent, child) = parent_child();
    let state = vec![ids(&[1, 2, 3]), vec![pair(10, Some(1)), pair(11, None)]];
    let (result, check) = reconcile(&[&parent, &child], state.clone(), state, false);
    let summary = result.unwrap();
    assert_eq!(summary.total(), 0);
    assert_eq!(summary.passes, 0);
    assert!(check.changes().is_empty());
}

#[test]
fn child_delete_precedes_parent_delete() {
    common::init();
    let (parent, child) = parent_child();
    let (result, check) = reconcile(
        &[&child, &parent],
        vec![vec![pair(10, Some(1))], ids(&[1, 2])],
        vec![vec![], ids(&[1])],
        false,
    );
    result.unwrap();
    assert_eq!(labels(check.changes()), ["delete child", "delete parent"]);
    assert_eq!(
        check.changes()[0],
        RecordedChange::Delete {
            table: "child".into(),
            key: Key::new(vec![10.into()]),
        }
    );
    assert_eq!(
        check.changes()[1],
        RecordedChange::Delete {
            table: "parent".into(),
            key: Key::new(vec![2.into()]),
        }
    );
}

#[test]
fn referenced_parent_waits_for_its_child() {
    common::init();
    let (parent, child) = parent_child();
    // Parent is visited first but row 2 stays referenced until the child goes.
    let (result, check) = reconcile(
        &[&parent, &child],
        vec![ids(&[1, 2]), vec![pair(10, Some(2))]],
        vec![ids(&[1]), vec![]],
        false,
    );
    let summary = result.unwrap();
    assert_eq!(labels(check.changes()), ["delete child", "delete parent"]);
    assert_eq!(summary.passes, 2);
    assert!(check.violations.is_empty(), "{:?}", check.violations);
}

#[test]
fn parent_insert_precedes_child_insert() {
    common::init();
    let (parent, child) = parent_child();
    // Child first in the set, so its insert has to wait a pass.
    let (result, check) = reconcile(
        &[&child, &parent],
        vec![vec![], vec![]],
        vec![vec![pair(10, Some(1))], ids(&[1])],
        false,
    );
    result.unwrap();
    assert_eq!(
        check.changes(),
        &[
            RecordedChange::Insert {
                table: "parent".into(),
                row: row(&[Some(1)]),
            },
            RecordedChange::Insert {
                table: "child".into(),
                row: pair(10, Some(1)),
            },
        ]
    );
    assert!(check.violations.is_empty());
}

#[test]
fn changed_value_is_one_update() {
    common::init();
    let notes = TableDescriptor::new(
        TableName::new("notes"),
        vec![
            Column::new("id", ColumnType::Integer),
            Column::new("body", ColumnType::Text),
        ],
    )
    .with_primary_key(vec![0]);
    let old = Row::new(vec![1.into(), "a".into()]);
    let new = Row::new(vec![1.into(), "b".into()]);
    let (result, check) =
        reconcile(&[&notes], vec![vec![old.clone()]], vec![vec![new.clone()]], false);
    let summary = result.unwrap();
    assert_eq!((summary.insert_count, summary.update_count, summary.delete_count), (0, 1, 0));
    assert_eq!(
        check.changes(),
        &[RecordedChange::Update {
            table: "notes".into(),
            old,
            new,
        }]
    );
}

#[test]
fn repointed_child_waits_for_new_parent() {
    common::init();
    let (parent, child) = parent_child();
    let (result, check) = reconcile(
        &[&child, &parent],
        vec![vec![pair(10, Some(1))], ids(&[1])],
        vec![vec![pair(10, Some(2))], ids(&[2])],
        false,
    );
    result.unwrap();
    assert_eq!(
        labels(check.changes()),
        ["insert parent", "update child", "delete parent"]
    );
    assert!(check.violations.is_empty(), "{:?}", check.violations);
}

#[test]
fn primary_key_change_is_delete_and_insert() {
    common::init();
    let (parent, _) = parent_child();
    let (result, check) = reconcile(&[&parent], vec![ids(&[1])], vec![ids(&[2])], false);
    let summary = result.unwrap();
    assert_eq!(summary.update_count, 0);
    assert_eq!(labels(check.changes()), ["delete parent", "insert parent"]);
}

#[test]
fn mixed_changes_conserve_rows_and_stay_safe() {
    common::init();
    let mut region = table("region", &[]);
    let (mut parent, child) = parent_child();
    parent.columns.push(Column::new("region_id", ColumnType::Integer));
    link(&mut parent, 1, &mut region);
    let tables = [&child, &parent, &region];

    let old = vec![
        vec![pair(10, Some(1)), pair(11, Some(2)), pair(12, None), pair(13, Some(3))],
        vec![pair(1, Some(100)), pair(2, Some(100)), pair(3, Some(101))],
        ids(&[100, 101]),
    ];
    let new = vec![
        vec![pair(10, Some(4)), pair(12, Some(1)), pair(14, Some(4)), pair(15, None)],
        vec![pair(1, Some(102)), pair(4, Some(102))],
        ids(&[102]),
    ];
    let (result, check) = reconcile(&tables, old.clone(), new.clone(), false);
    let summary = result.unwrap();

    assert!(check.violations.is_empty(), "{:?}", check.violations);
    assert!(!summary.postmortem);
    assert_eq!(check.sorted_state(), sorted(new.clone()));

    let old_total: usize = old.iter().map(Vec::len).sum();
    let new_total: usize = new.iter().map(Vec::len).sum();
    assert_eq!(
        new_total as isize - old_total as isize,
        summary.insert_count as isize - summary.delete_count as isize
    );
    assert_eq!(summary.total(), check.changes().len());
}

#[test]
fn self_referencing_rows_insert_in_dependency_order() {
    common::init();
    let mut staff = table("staff", &["manager_id"]);
    let fk = tablediff::ForeignKey::new(staff.name.clone(), vec![1], staff.name.clone(), vec![0]);
    staff.referenced_by.push(fk.clone());
    staff.foreign_keys.push(fk);

    let new = vec![vec![pair(1, Some(3)), pair(2, None), pair(3, Some(2)), pair(4, Some(4))]];
    let (result, check) = reconcile(&[&staff], vec![vec![]], new.clone(), false);
    let summary = result.unwrap();
    assert_eq!(summary.insert_count, 4);
    assert!(check.violations.is_empty(), "{:?}", check.violations);
    assert_eq!(check.sorted_state(), sorted(new.clone()));

    // And back to empty: a row pointing at itself does not block its own delete.
    let (result, check) = reconcile(&[&staff], new, vec![vec![]], false);
    assert_eq!(result.unwrap().delete_count, 4);
    assert!(check.violations.is_empty(), "{:?}", check.violations);
}

fn mutual_cycle() -> (TableDescriptor, TableDescriptor) {
    let mut a = table("a", &["b_id"]);
    let mut b = table("b", &["a_id"]);
    link(&mut a, 1, &mut b);
    link(&mut b, 1, &mut a);
    (a, b)
}

#[test]
fn mutual_cycle_finishes_in_postmortem() {
    common::init();
    let (a, b) = mutual_cycle();
    let (result, check) = reconcile(
        &[&a, &b],
        vec![vec![pair(1, Some(1))], vec![pair(1, Some(1))]],
        vec![vec![], vec![]],
        true,
    );
    let summary = result.unwrap();
    assert_eq!(check.log.stall_queries, 1);
    assert!(summary.postmortem);
    assert_eq!(summary.postmortem_operations, 2);
    assert_eq!(summary.delete_count, 2);
    assert_eq!(labels(check.changes()), ["postmortem", "delete a", "delete b"]);
    assert!(check.state.iter().all(Vec::is_empty));
}

#[test]
fn refused_stall_is_an_internal_error() {
    common::init();
    let (a, b) = mutual_cycle();
    let (result, check) = reconcile(
        &[&a, &b],
        vec![vec![pair(1, Some(1))], vec![pair(1, Some(1))]],
        vec![vec![], vec![]],
        false,
    );
    let err = result.unwrap_err();
    assert!(matches!(err, DiffError::StallRefused { pending: 2 }));
    assert!(err.to_string().contains("retry with smaller change sets"));
    assert_eq!(check.log.stall_queries, 1);
    assert!(check.changes().is_empty());
}

#[test]
fn stall_after_progress_keeps_earlier_operations_ordered() {
    common::init();
    let (a, b) = mutual_cycle();
    let mut extra = table("extra", &["a_id"]);
    let mut a = a;
    link(&mut extra, 1, &mut a);
    let (result, check) = reconcile(
        &[&a, &b, &extra],
        vec![vec![pair(1, Some(1))], vec![pair(1, Some(1))], vec![pair(5, Some(1))]],
        vec![vec![], vec![], vec![]],
        true,
    );
    let summary = result.unwrap();
    assert_eq!(
        labels(check.changes()),
        ["delete extra", "postmortem", "delete a", "delete b"]
    );
    assert_eq!(summary.passes, 3);
    assert_eq!(summary.postmortem_operations, 2);
}

#[test]
fn keyless_rows_match_on_every_column() {
    common::init();
    let log = TableDescriptor::new(
        TableName::new("log"),
        vec![
            Column::new("at", ColumnType::Integer),
            Column::new("msg", ColumnType::Text),
        ],
    );
    let old = vec![vec![
        Row::new(vec![1.into(), "start".into()]),
        Row::new(vec![2.into(), "tick".into()]),
        Row::new(vec![2.into(), "tick".into()]),
    ]];
    let new = vec![vec![
        Row::new(vec![1.into(), "begin".into()]),
        Row::new(vec![2.into(), "tick".into()]),
    ]];
    let (result, check) = reconcile(&[&log], old, new.clone(), false);
    let summary = result.unwrap();
    assert_eq!(summary.update_count, 0);
    assert_eq!(summary.delete_count, 2);
    assert_eq!(summary.insert_count, 1);
    assert!(check.changes().contains(&RecordedChange::Delete {
        table: "log".into(),
        key: Key::new(vec![1.into(), "start".into()]),
    }));
    assert_eq!(check.sorted_state(), sorted(new));
}

#[test]
fn foreign_keys_leaving_the_set_are_ignored() {
    common::init();
    let (mut parent, _) = parent_child();
    let mut outside = table("outside", &[]);
    parent.columns.push(Column::new("outside_id", ColumnType::Integer));
    link(&mut parent, 1, &mut outside);
    let (result, check) = reconcile(
        &[&parent],
        vec![vec![]],
        vec![vec![Row::new(vec![1.into(), Value::Integer(99)])]],
        false,
    );
    assert_eq!(result.unwrap().insert_count, 1);
    assert_eq!(labels(check.changes()), ["insert parent"]);
}
