// Per-table change computation: which keys disappear, which rows change, which appear.

use crate::model::{Key, Row};
use crate::snapshot::Snapshot;

/// An update pairs the matched old row with its new value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowUpdate {
    pub old: Row,
    pub new: Row,
}

/// Candidate operations turning one old snapshot into one new snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub deleted_keys: Vec<Key>,
    pub updated_rows: Vec<RowUpdate>,
    pub inserted_rows: Vec<Row>,
}

impl ChangeSet {
    /// Match rows by key.
    ///
    /// Every old row is looked up in `new`: a miss becomes a delete, a hit whose
    /// row differs in any column becomes an update. New rows that no old row
    /// claimed become inserts. A changed primary key is therefore a delete plus
    /// an insert, never an update.
    ///
    /// Keyless tables may hold duplicate rows; each old row claims the first
    /// still-unclaimed equal row so the row multiset is conserved.
    pub fn build(old: &Snapshot, new: &Snapshot) -> Self {
        let mut changes = Self::default();
        let mut claimed = vec![false; new.len()];

        for old_row in old.rows() {
            let key = old.key_of(old_row);
            let slot = new.equal_range(&key).find(|&idx| !claimed[idx]);
            match slot {
                None => changes.deleted_keys.push(key),
                Some(idx) => {
                    claimed[idx] = true;
                    let new_row = &new.rows()[idx];
                    if new_row != old_row {
                        changes.updated_rows.push(RowUpdate {
                            old: old_row.clone(),
                            new: new_row.clone(),
                        });
                    }
                }
            }
        }

        changes.inserted_rows = new
            .rows()
            .iter()
            .zip(&claimed)
            .filter(|&(_, &was_claimed)| !was_claimed)
            .map(|(row, _)| row.clone())
            .collect();
        changes
    }

    pub fn len(&self) -> usize {
        self.deleted_keys.len() + self.updated_rows.len() + self.inserted_rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
