use std::fmt;

use tracing::{debug, warn};

use rowsync_core::{ApplyAction, Conflict, ConflictType, Row, RowOperation, Scope, TableDescriptor};
use rowsync_storage::ChangeStore;

use crate::applier::ChangeApplier;
use crate::error::EngineError;
use crate::metadata::MetadataWriter;
use crate::policy::ConflictPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    KeptLocal,
    ForceWrite,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReason {
    /// The policy asked for it.
    Requested,
    /// Continue with nothing local to keep.
    NoLocalRow,
    /// Continue found no tracking row to refresh.
    MissingMetadata,
    /// The forced write still did not apply.
    ForceWriteFailed,
}

impl RollbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::NoLocalRow => "no_local_row",
            Self::MissingMetadata => "missing_metadata",
            Self::ForceWriteFailed => "force_write_failed",
        }
    }
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// `final_row` is what the local store holds for the key afterwards.
    Resolved { by: ResolvedBy, final_row: Row },
    Rollback { reason: RollbackReason },
}

/// Runs one conflict through the policy and carries out the verdict.
///
/// ```text
/// Continue             -> local row kept, tracking row updated
///                         (no local row / no tracking row -> Rollback)
/// RetryWithForceWrite  -> remote row forced, tracking row inserted
///                         (still not applied -> Rollback)
/// Merge(row)           -> as RetryWithForceWrite with the supplied row
/// Rollback             -> Rollback
/// Throw                -> EngineError::ConflictRejected
/// ```
pub struct ConflictResolver<'a> {
    table: &'a TableDescriptor,
    scope: &'a Scope,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(table: &'a TableDescriptor, scope: &'a Scope) -> Self {
        Self { table, scope }
    }

    pub fn resolve<S: ChangeStore>(
        &self,
        store: &mut S,
        conflict: Conflict,
        policy: &dyn ConflictPolicy,
    ) -> Result<Resolution, EngineError> {
        let action = policy.resolve(&conflict, self.table, &*store);
        let conflict_type = conflict.conflict_type();
        debug!(
            table = self.table.name(),
            conflict_type = %conflict_type,
            action = action.as_str(),
            "resolving conflict"
        );

        let resolution = match action {
            ApplyAction::Continue => self.keep_local(store, conflict)?,
            ApplyAction::RetryWithForceWrite => {
                let (remote, _) = conflict.into_rows();
                self.force_write(store, conflict_type, remote, ResolvedBy::ForceWrite)?
            }
            ApplyAction::Merge(merged) => {
                let remote_key = conflict.remote_row().primary_key(self.table)?;
                if merged.primary_key(self.table)? != remote_key {
                    return Err(EngineError::InvalidMerge {
                        table: self.table.name().to_string(),
                        key: remote_key.to_string(),
                    });
                }
                self.force_write(store, conflict_type, merged, ResolvedBy::Merge)?
            }
            ApplyAction::Rollback => Resolution::Rollback {
                reason: RollbackReason::Requested,
            },
            ApplyAction::Throw => {
                return Err(EngineError::ConflictRejected {
                    table: self.table.name().to_string(),
                    key: conflict.remote_row().primary_key(self.table)?.to_string(),
                    conflict_type,
                });
            }
        };

        if let Resolution::Rollback { reason } = &resolution {
            warn!(
                table = self.table.name(),
                conflict_type = %conflict_type,
                reason = %reason,
                "conflict resolution escalated to rollback"
            );
        }
        Ok(resolution)
    }

    fn keep_local<S: ChangeStore>(
        &self,
        store: &mut S,
        conflict: Conflict,
    ) -> Result<Resolution, EngineError> {
        let (_, local) = conflict.into_rows();
        let Some(local) = local else {
            return Ok(Resolution::Rollback {
                reason: RollbackReason::NoLocalRow,
            });
        };
        if MetadataWriter::new(self.table, self.scope).update(store, &local)? == 0 {
            return Ok(Resolution::Rollback {
                reason: RollbackReason::MissingMetadata,
            });
        }
        Ok(Resolution::Resolved {
            by: ResolvedBy::KeptLocal,
            final_row: local,
        })
    }

    fn force_write<S: ChangeStore>(
        &self,
        store: &mut S,
        conflict_type: ConflictType,
        row: Row,
        by: ResolvedBy,
    ) -> Result<Resolution, EngineError> {
        let operation = forced_operation(conflict_type, row.operation());
        let outcome =
            ChangeApplier::new(self.table, self.scope).apply_as(store, &row, operation, true)?;
        MetadataWriter::new(self.table, self.scope).insert(store, &row)?;

        if !outcome.is_applied() {
            return Ok(Resolution::Rollback {
                reason: RollbackReason::ForceWriteFailed,
            });
        }
        Ok(Resolution::Resolved { by, final_row: row })
    }
}

/// A remote delete is forced as a delete. Otherwise a missing local row or a
/// remote insert is forced as an insert, and anything else as an update.
pub fn forced_operation(conflict_type: ConflictType, remote: RowOperation) -> RowOperation {
    match remote {
        RowOperation::Delete => RowOperation::Delete,
        _ if conflict_type.is_local_missing() => RowOperation::Insert,
        RowOperation::Insert => RowOperation::Insert,
        RowOperation::Update => RowOperation::Update,
    }
}
