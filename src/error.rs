use std::fmt;
use thiserror::Error;

/// Boxed error returned across the change-handler and parser boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used by the reconciliation engine.
pub type Result<T> = std::result::Result<T, DiffError>;

/// Row-level operation kinds emitted to a change handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// Failure modes of a reconciliation run.
///
/// Handler failures and refused stalls both abort the run. The engine never
/// rolls anything back itself: a handler that executes statements owns the
/// surrounding transaction and decides what to do with partial work.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The change handler rejected an emitted operation.
    #[error("{operation} on table {table} failed: {source}")]
    Handler {
        operation: Operation,
        table: String,
        #[source]
        source: BoxError,
    },

    /// A full pass made no progress and the handler declined postmortem mode.
    #[error(
        "internal error: reconciliation stalled with {pending} pending operations \
         (foreign key cycle or ordering bug); retry with smaller change sets"
    )]
    StallRefused { pending: usize },

    /// A row does not have one value per declared column.
    #[error("table {table}: row has {actual} values, expected {expected}")]
    RowArity {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// A descriptor refers to a column position that does not exist.
    #[error("table {table}: {reason}")]
    InvalidDescriptor { table: String, reason: String },
}

impl DiffError {
    pub(crate) fn handler(
        operation: Operation,
        table: impl fmt::Display,
        source: BoxError,
    ) -> Self {
        Self::Handler {
            operation,
            table: table.to_string(),
            source,
        }
    }

    pub(crate) fn invalid_descriptor(table: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}
