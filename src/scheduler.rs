// Multi-table reconciliation: fixed-point draining of change sets in foreign-key order.

use crate::changeset::{ChangeSet, RowUpdate};
use crate::error::{DiffError, Operation, Result};
use crate::handler::TableChangeHandler;
use crate::model::{Key, Row, TableDescriptor};
use crate::oracle::{ConstraintOracle, TableId, WorkingSet};
use crate::snapshot::{RowSource, Snapshot};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What the old and new sides of a reconciliation are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize)]
pub enum DiffMode {
    /// Old tables against their name-matched new tables.
    #[default]
    Compare,
    /// Nothing against the tables: every row becomes an insert.
    Populate,
    /// The tables against nothing: every row becomes a delete.
    Truncate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub mode: DiffMode,
    /// Block on background loads while extracting snapshots.
    pub wait_for_completion: bool,
    /// Report operations against the new table instead of the old one.
    pub return_new_table_identity: bool,
}

/// A table and where its rows come from.
#[derive(Clone, Copy)]
pub struct DiffTable<'a> {
    pub descriptor: &'a TableDescriptor,
    pub rows: &'a dyn RowSource,
}

impl<'a> DiffTable<'a> {
    pub fn new(descriptor: &'a TableDescriptor, rows: &'a dyn RowSource) -> Self {
        Self { descriptor, rows }
    }
}

/// Totals of one reconciliation run.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct DiffSummary {
    pub tables: usize,
    pub insert_count: usize,
    pub update_count: usize,
    pub delete_count: usize,
    pub passes: usize,
    pub postmortem: bool,
    pub postmortem_operations: usize,
}

impl DiffSummary {
    pub const fn total(&self) -> usize {
        self.insert_count + self.update_count + self.delete_count
    }
}

/// One table of the reconciled set with its still-pending operations.
struct TablePlan<'a> {
    id: TableId,
    identity: &'a TableDescriptor,
    pending: ChangeSet,
}

/// Computes and emits the operations that turn a set of old tables into the
/// corresponding new tables without breaking foreign keys along the way.
///
/// Change sets are computed once. Passes then visit the tables in the order
/// given, draining each table's deletes, updates and inserts that the
/// `ConstraintOracle` allows against the working set, and applying them to the
/// working set so later checks see their effect. The loop repeats while passes
/// make progress. A pass that makes none means the remaining operations depend
/// on each other (typically a foreign key cycle): the handler is asked once
/// whether to continue, and if so every remaining operation is emitted
/// unconditionally in one final pass.
pub struct MultiTableDiff<'a> {
    old: Vec<DiffTable<'a>>,
    new: Vec<DiffTable<'a>>,
    options: DiffOptions,
}

impl<'a> MultiTableDiff<'a> {
    pub fn compare(old: Vec<DiffTable<'a>>, new: Vec<DiffTable<'a>>) -> Self {
        Self {
            old,
            new,
            options: DiffOptions::default(),
        }
    }

    pub fn populate(tables: Vec<DiffTable<'a>>) -> Self {
        Self {
            old: tables,
            new: Vec::new(),
            options: DiffOptions {
                mode: DiffMode::Populate,
                ..DiffOptions::default()
            },
        }
    }

    pub fn truncate(tables: Vec<DiffTable<'a>>) -> Self {
        Self {
            old: tables,
            new: Vec::new(),
            options: DiffOptions {
                mode: DiffMode::Truncate,
                ..DiffOptions::default()
            },
        }
    }

    #[must_use]
    pub const fn wait_for_completion(mut self, wait: bool) -> Self {
        self.options.wait_for_completion = wait;
        self
    }

    #[must_use]
    pub const fn return_new_table_identity(mut self, enabled: bool) -> Self {
        self.options.return_new_table_identity = enabled;
        self
    }

    pub const fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// Run the reconciliation, emitting every operation to `handler`.
    pub fn run(&self, handler: &mut dyn TableChangeHandler) -> Result<DiffSummary> {
        let start = Instant::now();
        let pairs = self.pair_tables();
        let members: Vec<&TableDescriptor> = pairs.iter().map(|(old, _)| old.descriptor).collect();
        let oracle = ConstraintOracle::resolve(&members)?;

        let mut snapshots = Vec::with_capacity(pairs.len());
        let mut plans = Vec::with_capacity(pairs.len());
        for (idx, (old, new)) in pairs.iter().enumerate() {
            let (old_snap, new_snap) = self.extract_pair(old, new)?;
            let pending = ChangeSet::build(&old_snap, &new_snap);
            debug!(
                table = %old.descriptor.name,
                deletes = pending.deleted_keys.len(),
                updates = pending.updated_rows.len(),
                inserts = pending.inserted_rows.len(),
                "change set computed"
            );
            let identity = if self.options.return_new_table_identity {
                new.descriptor
            } else {
                old.descriptor
            };
            plans.push(TablePlan {
                id: TableId(idx),
                identity,
                pending,
            });
            snapshots.push(old_snap);
        }

        let mut scheduler = Scheduler {
            oracle: &oracle,
            working: WorkingSet::new(snapshots),
            handler,
            summary: DiffSummary {
                tables: plans.len(),
                ..DiffSummary::default()
            },
        };
        scheduler.drain(&mut plans)?;

        info!(
            inserts = scheduler.summary.insert_count,
            updates = scheduler.summary.update_count,
            deletes = scheduler.summary.delete_count,
            passes = scheduler.summary.passes,
            postmortem = scheduler.summary.postmortem,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "reconciliation finished"
        );
        Ok(scheduler.summary)
    }

    /// Old tables paired with their counterparts.
    ///
    /// In compare mode the first new table with the same unqualified name
    /// (case-insensitive) wins; old tables without a counterpart are left out of
    /// the set entirely.
    fn pair_tables(&self) -> Vec<(DiffTable<'a>, DiffTable<'a>)> {
        if self.options.mode != DiffMode::Compare {
            return self.old.iter().map(|t| (*t, *t)).collect();
        }
        let mut pairs = Vec::with_capacity(self.old.len());
        for old in &self.old {
            let mut matches = self
                .new
                .iter()
                .filter(|new| new.descriptor.name.same_unqualified(&old.descriptor.name));
            let Some(first) = matches.next() else {
                debug!(table = %old.descriptor.name, "no counterpart in new tables; skipped");
                continue;
            };
            if let Some(other) = matches.next() {
                warn!(
                    table = %old.descriptor.name,
                    chosen = %first.descriptor.name,
                    ignored = %other.descriptor.name,
                    "ambiguous table correspondence; first match wins"
                );
            }
            pairs.push((*old, *first));
        }
        pairs
    }

    fn extract_pair(
        &self,
        old: &DiffTable<'_>,
        new: &DiffTable<'_>,
    ) -> Result<(Snapshot, Snapshot)> {
        let wait = self.options.wait_for_completion;
        let (old_empty, new_empty) = match self.options.mode {
            DiffMode::Compare => (false, false),
            DiffMode::Populate => (true, false),
            DiffMode::Truncate => (false, true),
        };
        let old_snap = Snapshot::extract(old.descriptor, old.rows, wait, old_empty)?;
        // Rows of the new side are keyed the same way as the old side.
        let new_rows = if new_empty {
            Vec::new()
        } else {
            new.rows.halt_editing();
            if wait {
                new.rows.wait_for_load();
            }
            new.rows.current_rows()
        };
        for row in &new_rows {
            old.descriptor.check_row(row)?;
        }
        let new_snap = Snapshot::from_rows(old_snap.order().clone(), new_rows);
        Ok((old_snap, new_snap))
    }
}

struct Scheduler<'o, 'h> {
    oracle: &'o ConstraintOracle,
    working: WorkingSet,
    handler: &'h mut dyn TableChangeHandler,
    summary: DiffSummary,
}

impl Scheduler<'_, '_> {
    fn drain(&mut self, plans: &mut [TablePlan<'_>]) -> Result<()> {
        loop {
            let before = pending_count(plans);
            if before == 0 {
                return Ok(());
            }
            self.summary.passes += 1;
            let applied = self.pass(plans, false)?;
            let remaining = pending_count(plans);
            debug!(pass = self.summary.passes, applied, remaining, "pass complete");
            if remaining == 0 {
                return Ok(());
            }
            if applied == 0 {
                return self.postmortem(plans, remaining);
            }
        }
    }

    fn postmortem(&mut self, plans: &mut [TablePlan<'_>], remaining: usize) -> Result<()> {
        warn!(remaining, "no progress possible under foreign key ordering");
        if !self.handler.continue_after_error() {
            return Err(DiffError::StallRefused { pending: remaining });
        }
        self.handler.postmortem_started();
        self.summary.postmortem = true;
        self.summary.passes += 1;
        let applied = self.pass(plans, true)?;
        self.summary.postmortem_operations = applied;
        warn!(applied, "postmortem pass emitted operations without integrity ordering");
        Ok(())
    }

    /// One visit of every table: deletes, then updates, then inserts. With
    /// `force` the oracle is bypassed.
    fn pass(&mut self, plans: &mut [TablePlan<'_>], force: bool) -> Result<usize> {
        let mut applied = 0;
        for plan in plans.iter_mut() {
            applied += self.drain_deletes(plan, force)?;
            applied += self.drain_updates(plan, force)?;
            applied += self.drain_inserts(plan, force)?;
        }
        Ok(applied)
    }

    fn drain_deletes(&mut self, plan: &mut TablePlan<'_>, force: bool) -> Result<usize> {
        let mut applied = 0;
        for key in std::mem::take(&mut plan.pending.deleted_keys) {
            if !force && !self.oracle.can_delete_key(&self.working, plan.id, &key) {
                plan.pending.deleted_keys.push(key);
                continue;
            }
            self.emit_delete(plan, &key)?;
            self.working.get_mut(plan.id).remove(&key);
            self.summary.delete_count += 1;
            applied += 1;
        }
        Ok(applied)
    }

    fn drain_updates(&mut self, plan: &mut TablePlan<'_>, force: bool) -> Result<usize> {
        let mut applied = 0;
        for update in std::mem::take(&mut plan.pending.updated_rows) {
            if !force && !self.oracle.can_update_row(&self.working, plan.id, &update.new) {
                plan.pending.updated_rows.push(update);
                continue;
            }
            self.emit_update(plan, &update)?;
            self.working.get_mut(plan.id).replace(update.new);
            self.summary.update_count += 1;
            applied += 1;
        }
        Ok(applied)
    }

    fn drain_inserts(&mut self, plan: &mut TablePlan<'_>, force: bool) -> Result<usize> {
        let mut applied = 0;
        for row in std::mem::take(&mut plan.pending.inserted_rows) {
            if !force && !self.oracle.can_insert_row(&self.working, plan.id, &row) {
                plan.pending.inserted_rows.push(row);
                continue;
            }
            self.emit_insert(plan, &row)?;
            self.working.get_mut(plan.id).insert(row);
            self.summary.insert_count += 1;
            applied += 1;
        }
        Ok(applied)
    }

    fn emit_delete(&mut self, plan: &TablePlan<'_>, key: &Key) -> Result<()> {
        self.handler
            .delete_row(plan.identity, key)
            .map_err(|e| DiffError::handler(Operation::Delete, &plan.identity.name, e))
    }

    fn emit_update(&mut self, plan: &TablePlan<'_>, update: &RowUpdate) -> Result<()> {
        let snap = self.working.get(plan.id);
        let old = snap.find(&snap.key_of(&update.new)).unwrap_or(&update.old).clone();
        self.handler
            .update_row(plan.identity, &old, &update.new)
            .map_err(|e| DiffError::handler(Operation::Update, &plan.identity.name, e))
    }

    fn emit_insert(&mut self, plan: &TablePlan<'_>, row: &Row) -> Result<()> {
        self.handler
            .insert_row(plan.identity, row)
            .map_err(|e| DiffError::handler(Operation::Insert, &plan.identity.name, e))
    }
}

fn pending_count(plans: &[TablePlan<'_>]) -> usize {
    plans.iter().map(|p| p.pending.len()).sum()
}
