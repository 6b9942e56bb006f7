//! Foreign-key aware reconciliation of related tables.
//!
//! Given an old and a new state of a set of tables, [`MultiTableDiff`] computes
//! the row inserts, updates and deletes that turn one into the other and hands
//! them to a [`TableChangeHandler`] in an order that never breaks a foreign key
//! between tables of the set. Sets whose keys cannot be ordered (reference
//! cycles) finish in a degraded "postmortem" pass if the handler allows it.
//!
//! Handlers shipped with the crate render a SQL script ([`ScriptEmitter`]) or
//! execute against SQLite inside one transaction ([`SqliteExecutor`]).

pub mod catalog;
pub mod changeset;
pub mod error;
pub mod handler;
pub mod key;
pub mod logger;
pub mod model;
pub mod oracle;
pub mod parser;
pub mod progress;
pub mod scheduler;
pub mod script;
pub mod snapshot;
pub mod sqlite;
pub mod table_model;

pub use changeset::{ChangeSet, RowUpdate};
pub use error::{BoxError, DiffError, Operation, Result};
pub use handler::{key_columns, ChangeLog, RecordedChange, TableChangeHandler};
pub use key::KeyOrder;
pub use model::{Column, ColumnType, ForeignKey, Key, Row, TableDescriptor, TableName, Value};
pub use oracle::{ConstraintOracle, TableId, WorkingSet};
pub use scheduler::{DiffMode, DiffOptions, DiffSummary, DiffTable, MultiTableDiff};
pub use script::ScriptEmitter;
pub use snapshot::{RowSource, Snapshot, StaticRows};
pub use sqlite::SqliteExecutor;
pub use table_model::{commit_tables, CommitPoint, EditableTable, LoadHandle};
