use std::fmt;

use crate::row::{Row, RowOperation};

/// What the local datastore held when a remote row failed to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Missing,
    Live,
    Tombstone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictType {
    LocalNoRowRemoteInsert,
    LocalNoRowRemoteUpdate,
    LocalInsertRemoteInsert,
    LocalUpdateRemoteUpdate,
    LocalDeleteRemoteDelete,
    LocalDeleteRemoteUpdate,
    /// Never produced by [`ConflictType::classify`]; kept so policies can
    /// match on the full taxonomy.
    LocalUpdateRemoteDelete,
}

impl ConflictType {
    /// Total classification of a failed apply. A local tombstone always
    /// classifies as `LocalDeleteRemoteUpdate`, whatever the remote intended.
    pub fn classify(local: LocalState, remote: RowOperation) -> Self {
        match (local, remote) {
            (LocalState::Missing, RowOperation::Insert) => Self::LocalNoRowRemoteInsert,
            (LocalState::Missing, RowOperation::Update | RowOperation::Delete) => {
                Self::LocalNoRowRemoteUpdate
            }
            (LocalState::Tombstone, _) => Self::LocalDeleteRemoteUpdate,
            (LocalState::Live, RowOperation::Insert) => Self::LocalInsertRemoteInsert,
            (LocalState::Live, RowOperation::Update) => Self::LocalUpdateRemoteUpdate,
            (LocalState::Live, RowOperation::Delete) => Self::LocalDeleteRemoteDelete,
        }
    }

    pub fn is_local_missing(&self) -> bool {
        matches!(
            self,
            Self::LocalNoRowRemoteInsert | Self::LocalNoRowRemoteUpdate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalNoRowRemoteInsert => "local_no_row_remote_insert",
            Self::LocalNoRowRemoteUpdate => "local_no_row_remote_update",
            Self::LocalInsertRemoteInsert => "local_insert_remote_insert",
            Self::LocalUpdateRemoteUpdate => "local_update_remote_update",
            Self::LocalDeleteRemoteDelete => "local_delete_remote_delete",
            Self::LocalDeleteRemoteUpdate => "local_delete_remote_update",
            Self::LocalUpdateRemoteDelete => "local_update_remote_delete",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote row that could not be applied, paired with whatever the local
/// store held under the same key. Lives only for one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    conflict_type: ConflictType,
    remote_row: Row,
    local_row: Option<Row>,
}

impl Conflict {
    /// Classifies from the local row itself; a local row whose operation is
    /// `Delete` is a tombstone.
    pub fn new(remote_row: Row, local_row: Option<Row>) -> Self {
        let local = match &local_row {
            None => LocalState::Missing,
            Some(row) if row.is_tombstone() => LocalState::Tombstone,
            Some(_) => LocalState::Live,
        };
        Self {
            conflict_type: ConflictType::classify(local, remote_row.operation()),
            remote_row,
            local_row,
        }
    }

    pub fn conflict_type(&self) -> ConflictType {
        self.conflict_type
    }

    pub fn remote_row(&self) -> &Row {
        &self.remote_row
    }

    pub fn local_row(&self) -> Option<&Row> {
        self.local_row.as_ref()
    }

    pub fn into_rows(self) -> (Row, Option<Row>) {
        (self.remote_row, self.local_row)
    }
}

/// Verdict a conflict policy returns for one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyAction {
    /// Keep the local state; only tracking metadata is refreshed.
    Continue,
    /// Reapply the remote row, bypassing the watermark guard.
    RetryWithForceWrite,
    /// Abort the pass; nothing from it may be committed.
    Rollback,
    /// Force-write a caller-supplied row in place of the remote one.
    Merge(Row),
    /// Abort the pass with an error.
    Throw,
}

impl ApplyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::RetryWithForceWrite => "retry_with_force_write",
            Self::Rollback => "rollback",
            Self::Merge(_) => "merge",
            Self::Throw => "throw",
        }
    }
}
