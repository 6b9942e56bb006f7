// Key derivation and ordering for one table.

use crate::model::{Key, Row, TableDescriptor, Value};
use std::cmp::Ordering;

/// How rows of one table are keyed and ordered.
///
/// Tables with a primary key use the values at the declared positions, in
/// declared order. Keyless tables use the whole row, so two rows only match when
/// every column is equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyOrder {
    positions: Option<Vec<usize>>,
}

impl KeyOrder {
    pub fn for_table(table: &TableDescriptor) -> Self {
        if table.is_keyless() {
            Self::whole_row()
        } else {
            Self::columns(table.primary_key.clone())
        }
    }

    pub const fn whole_row() -> Self {
        Self { positions: None }
    }

    pub const fn columns(positions: Vec<usize>) -> Self {
        Self {
            positions: Some(positions),
        }
    }

    /// True when the key is a declared primary key rather than the whole row.
    pub const fn is_primary_key(&self) -> bool {
        self.positions.is_some()
    }

    pub fn positions(&self) -> Option<&[usize]> {
        self.positions.as_deref()
    }

    pub fn key_of(&self, row: &Row) -> Key {
        match &self.positions {
            Some(positions) => Key::new(row.project(positions)),
            None => Key::new(row.values().to_vec()),
        }
    }

    /// Compare a row's key against `key` without materializing the row key.
    pub fn cmp_row_key(&self, row: &Row, key: &Key) -> Ordering {
        match &self.positions {
            Some(positions) => {
                let lhs = positions.iter().map(|&i| row.get(i).unwrap_or(&Value::Null));
                lhs.cmp(key.values().iter())
            }
            None => row.values().iter().cmp(key.values().iter()),
        }
    }

    pub fn cmp_rows(&self, a: &Row, b: &Row) -> Ordering {
        match &self.positions {
            Some(positions) => {
                for &i in positions {
                    let ord = a
                        .get(i)
                        .unwrap_or(&Value::Null)
                        .cmp(b.get(i).unwrap_or(&Value::Null));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
            None => a.values().cmp(b.values()),
        }
    }
}
