use rowsync_core::{ConflictType, PrimaryKey, RowOperation};

use crate::resolver::RollbackReason;

/// Per-table, per-operation counters for one pass.
///
/// `applied_count` counts rows now reflected locally because of this pass,
/// whether applied directly or force-written during resolution.
/// `resolved_conflict_count` counts conflicts settled without aborting;
/// `failed_count` counts rows whose conflict could not be settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchApplyResult {
    pub table_name: String,
    pub operation_state: RowOperation,
    pub applied_count: usize,
    pub failed_count: usize,
    pub resolved_conflict_count: usize,
}

impl BatchApplyResult {
    pub fn new(table_name: impl Into<String>, operation_state: RowOperation) -> Self {
        Self {
            table_name: table_name.into(),
            operation_state,
            applied_count: 0,
            failed_count: 0,
            resolved_conflict_count: 0,
        }
    }
}

/// Why a table's pass was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledBack {
    pub conflict_type: ConflictType,
    pub key: PrimaryKey,
    pub reason: RollbackReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableApplyOutcome {
    pub table_name: String,
    pub results: Vec<BatchApplyResult>,
    /// Set when a conflict forced a rollback. With per-batch transactions
    /// only the failing chunk was rolled back; earlier chunks stay committed.
    pub rolled_back: Option<RolledBack>,
}

impl TableApplyOutcome {
    pub fn is_committed(&self) -> bool {
        self.rolled_back.is_none()
    }

    pub fn result(&self, operation: RowOperation) -> Option<&BatchApplyResult> {
        self.results.iter().find(|r| r.operation_state == operation)
    }

    pub fn applied_count(&self) -> usize {
        self.results.iter().map(|r| r.applied_count).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().map(|r| r.failed_count).sum()
    }

    pub fn resolved_conflict_count(&self) -> usize {
        self.results.iter().map(|r| r.resolved_conflict_count).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub tables: Vec<TableApplyOutcome>,
}

impl SyncSummary {
    pub fn is_committed(&self) -> bool {
        self.tables.iter().all(TableApplyOutcome::is_committed)
    }

    pub fn table(&self, name: &str) -> Option<&TableApplyOutcome> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    pub fn applied_count(&self) -> usize {
        self.tables.iter().map(TableApplyOutcome::applied_count).sum()
    }

    pub fn resolved_conflict_count(&self) -> usize {
        self.tables
            .iter()
            .map(TableApplyOutcome::resolved_conflict_count)
            .sum()
    }
}
