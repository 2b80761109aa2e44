use tracing::debug;

use rowsync_core::{Row, RowOperation, Scope, TableDescriptor};
use rowsync_storage::ChangeStore;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { affected: usize },
    NotApplied,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Issues one row's insert, update or delete against the local store.
///
/// Updates and deletes are guarded by the scope's watermark unless
/// `force_write` is set. Rows the store refuses (zero rows affected, or an
/// execution failure such as a constraint violation) come back as
/// [`ApplyOutcome::NotApplied`]; malformed rows and configuration problems
/// are errors.
pub struct ChangeApplier<'a> {
    table: &'a TableDescriptor,
    scope: &'a Scope,
}

impl<'a> ChangeApplier<'a> {
    pub fn new(table: &'a TableDescriptor, scope: &'a Scope) -> Self {
        Self { table, scope }
    }

    pub fn apply<S: ChangeStore>(
        &self,
        store: &mut S,
        row: &Row,
        force_write: bool,
    ) -> Result<ApplyOutcome, EngineError> {
        self.apply_as(store, row, row.operation(), force_write)
    }

    /// Applies `row` as `operation`, which may differ from the row's own
    /// operation when a conflict resolution reroutes it.
    pub fn apply_as<S: ChangeStore>(
        &self,
        store: &mut S,
        row: &Row,
        operation: RowOperation,
        force_write: bool,
    ) -> Result<ApplyOutcome, EngineError> {
        let watermark = self.scope.last_timestamp;
        let result = match operation {
            RowOperation::Insert => store.insert_row(self.table, row, force_write),
            RowOperation::Update => store.update_row(self.table, row, watermark, force_write),
            RowOperation::Delete => store.delete_row(self.table, row, watermark, force_write),
        };

        match result {
            Ok(affected) if affected > 0 => Ok(ApplyOutcome::Applied { affected }),
            // A forced delete leaves the row absent whether or not it was there.
            Ok(affected) if force_write && operation == RowOperation::Delete => {
                Ok(ApplyOutcome::Applied { affected })
            }
            Ok(_) => Ok(ApplyOutcome::NotApplied),
            Err(e) if e.is_execution_failure() => {
                debug!(
                    table = self.table.name(),
                    operation = %operation,
                    error = %e,
                    "row rejected by store"
                );
                Ok(ApplyOutcome::NotApplied)
            }
            Err(e) => Err(e.into()),
        }
    }
}
