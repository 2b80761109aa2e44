use rowsync_core::{Conflict, Row, TableDescriptor};
use rowsync_storage::RowReader;

use crate::error::EngineError;

/// Turns a row that failed to apply into a classified [`Conflict`] by
/// reading the local row under the same key.
pub struct ConflictDetector<'a> {
    table: &'a TableDescriptor,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(table: &'a TableDescriptor) -> Self {
        Self { table }
    }

    pub fn detect<R: RowReader + ?Sized>(
        &self,
        store: &R,
        remote_row: Row,
    ) -> Result<Conflict, EngineError> {
        let key = remote_row.primary_key(self.table)?;
        let local_row = store.select_row(self.table, &key)?;
        Ok(Conflict::new(remote_row, local_row))
    }
}
