use rowsync_core::{Row, Scope, TableDescriptor};
use rowsync_storage::{ChangeStore, TrackingMetadata};

use crate::error::EngineError;

/// Records the tracking row that establishes the watermark for future syncs.
/// Both timestamps are the scope's frozen `last_timestamp`; the tombstone
/// flag follows the row's operation.
pub struct MetadataWriter<'a> {
    table: &'a TableDescriptor,
    scope: &'a Scope,
}

impl<'a> MetadataWriter<'a> {
    pub fn new(table: &'a TableDescriptor, scope: &'a Scope) -> Self {
        Self { table, scope }
    }

    pub fn metadata_for(&self, row: &Row) -> TrackingMetadata {
        TrackingMetadata {
            scope_name: self.scope.name.clone(),
            tombstone: row.is_tombstone(),
            create_timestamp: self.scope.last_timestamp,
            update_timestamp: self.scope.last_timestamp,
        }
    }

    /// Insert-or-update; returns affected rows.
    pub fn insert<S: ChangeStore>(&self, store: &mut S, row: &Row) -> Result<usize, EngineError> {
        let key = row.primary_key(self.table)?;
        Ok(store.insert_metadata(self.table, &key, &self.metadata_for(row))?)
    }

    /// Update-only. Zero means no tracking row exists for the key, which
    /// callers treat as an integrity problem.
    pub fn update<S: ChangeStore>(&self, store: &mut S, row: &Row) -> Result<usize, EngineError> {
        let key = row.primary_key(self.table)?;
        Ok(store.update_metadata(self.table, &key, &self.metadata_for(row))?)
    }
}
