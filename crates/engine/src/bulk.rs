use tracing::debug;

use rowsync_core::{Conflict, PrimaryKey, Row, RowOperation, Scope, TableDescriptor};
use rowsync_storage::{BulkChunk, CREATE_PEER_TIMESTAMP, ChangeStore, UPDATE_PEER_TIMESTAMP};

use crate::detector::ConflictDetector;
use crate::error::EngineError;

/// Bulk commands receive the peer's timestamps under different names than
/// row-by-row commands do.
pub fn bulk_column_name(column: &str) -> Option<&'static str> {
    match column {
        "create_timestamp" => Some(CREATE_PEER_TIMESTAMP),
        "update_timestamp" => Some(UPDATE_PEER_TIMESTAMP),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct BulkApplyResult {
    pub applied: Vec<Row>,
    pub conflicts: Vec<Conflict>,
}

impl BulkApplyResult {
    pub fn len(&self) -> usize {
        self.applied.len() + self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn extend(&mut self, other: BulkApplyResult) {
        self.applied.extend(other.applied);
        self.conflicts.extend(other.conflicts);
    }
}

/// Splits same-operation rows into fixed-size chunks, hands each chunk to the
/// store's bulk command, and turns the rows the store reports as failed into
/// conflicts. Every row of a chunk ends up in exactly one of `applied` or
/// `conflicts`.
pub struct BulkBatchSplitter<'a> {
    table: &'a TableDescriptor,
    scope: &'a Scope,
    batch_size: usize,
}

impl<'a> BulkBatchSplitter<'a> {
    pub fn new(table: &'a TableDescriptor, scope: &'a Scope, batch_size: usize) -> Self {
        Self {
            table,
            scope,
            batch_size: batch_size.max(1),
        }
    }

    /// Cuts `rows` into chunks of at most `batch_size`. A chunk also ends
    /// before a key it already holds, so a failed key names exactly one row.
    pub fn chunks<'r>(&self, rows: &'r [Row]) -> Result<Vec<&'r [Row]>, EngineError> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut keys: Vec<PrimaryKey> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let key = row.primary_key(self.table)?;
            if i - start == self.batch_size || keys.contains(&key) {
                chunks.push(&rows[start..i]);
                start = i;
                keys.clear();
            }
            keys.push(key);
        }
        if start < rows.len() {
            chunks.push(&rows[start..]);
        }
        Ok(chunks)
    }

    /// Parameter schema for one chunk: the table's columns followed by any
    /// extra columns the rows carry, renamed for bulk commands.
    pub fn chunk_schema(&self, rows: &[Row]) -> Vec<String> {
        let mut schema: Vec<String> = self.table.all_columns().map(str::to_string).collect();
        for row in rows {
            for (column, _) in row.columns() {
                let name = bulk_column_name(column).unwrap_or(column);
                if !schema.iter().any(|c| c == name) {
                    schema.push(name.to_string());
                }
            }
        }
        schema
    }

    /// Snapshots `rows` into a chunk. Rows are immutable, so delete rows reach
    /// the bulk command with their full column data.
    pub fn prepare_chunk(&self, operation: RowOperation, rows: &[Row]) -> BulkChunk {
        BulkChunk {
            operation,
            schema: self.chunk_schema(rows),
            rows: rows
                .iter()
                .map(|r| r.with_operation(operation).rename_columns(bulk_column_name))
                .collect(),
        }
    }

    pub fn apply_chunk<S: ChangeStore>(
        &self,
        store: &mut S,
        operation: RowOperation,
        rows: &[Row],
    ) -> Result<BulkApplyResult, EngineError> {
        let keys = rows
            .iter()
            .map(|r| r.primary_key(self.table))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                return Err(EngineError::DuplicateChunkKey {
                    table: self.table.name().to_string(),
                    key: key.to_string(),
                });
            }
        }

        let chunk = self.prepare_chunk(operation, rows);
        let mut failed = store.apply_bulk(self.table, &chunk, self.scope.last_timestamp)?;

        let detector = ConflictDetector::new(self.table);
        let mut result = BulkApplyResult::default();
        for (row, key) in rows.iter().zip(keys) {
            match failed.iter().position(|k| *k == key) {
                Some(i) => {
                    failed.swap_remove(i);
                    result
                        .conflicts
                        .push(detector.detect(&*store, row.with_operation(operation))?);
                }
                None => result.applied.push(row.with_operation(operation)),
            }
        }

        debug!(
            table = self.table.name(),
            operation = %operation,
            rows = rows.len(),
            applied = result.applied.len(),
            conflicts = result.conflicts.len(),
            "bulk chunk applied"
        );
        Ok(result)
    }

    /// Applies every row, grouped by operation (inserts, updates, deletes) and
    /// chunked within each group.
    pub fn apply<S: ChangeStore>(
        &self,
        store: &mut S,
        rows: &[Row],
    ) -> Result<BulkApplyResult, EngineError> {
        let mut result = BulkApplyResult::default();
        for operation in RowOperation::ALL {
            let group: Vec<Row> = rows
                .iter()
                .filter(|r| r.operation() == operation)
                .cloned()
                .collect();
            for chunk in self.chunks(&group)? {
                result.extend(self.apply_chunk(store, operation, chunk)?);
            }
        }
        Ok(result)
    }
}
