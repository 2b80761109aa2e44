use rowsync_core::{PrimaryKey, Row, RowOperation, Scope, TableDescriptor, Timestamp};

use crate::error::StorageError;

/// Tracking-row values written for a synchronized row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingMetadata {
    pub scope_name: String,
    pub tombstone: bool,
    pub create_timestamp: Timestamp,
    pub update_timestamp: Timestamp,
}

/// One fixed-size slice of same-operation rows handed to a bulk command.
/// `schema` lists the parameter names the chunk binds, which for bulk
/// commands carry the peer timestamps under their bulk names.
#[derive(Debug, Clone)]
pub struct BulkChunk {
    pub operation: RowOperation,
    pub schema: Vec<String>,
    pub rows: Vec<Row>,
}

impl BulkChunk {
    pub fn binds(&self, column: &str) -> bool {
        self.schema.iter().any(|c| c == column)
    }
}

/// Read access to local rows, available to conflict policies.
pub trait RowReader {
    /// Current local row for `key`. A tombstoned row comes back with operation
    /// `Delete`; a live row with operation `Update`.
    fn select_row(
        &self,
        table: &TableDescriptor,
        key: &PrimaryKey,
    ) -> Result<Option<Row>, StorageError>;
}

/// Every datastore call an apply pass makes. All calls run on the one
/// connection and the one transaction opened by `begin_transaction`.
pub trait ChangeStore: RowReader {
    /// Returns the number of rows affected.
    fn insert_row(
        &mut self,
        table: &TableDescriptor,
        row: &Row,
        force_write: bool,
    ) -> Result<usize, StorageError>;

    /// Without `force_write`, applies only when the local row exists and its
    /// last-modified timestamp is <= `watermark`.
    fn update_row(
        &mut self,
        table: &TableDescriptor,
        row: &Row,
        watermark: Timestamp,
        force_write: bool,
    ) -> Result<usize, StorageError>;

    fn delete_row(
        &mut self,
        table: &TableDescriptor,
        row: &Row,
        watermark: Timestamp,
        force_write: bool,
    ) -> Result<usize, StorageError>;

    /// Applies a chunk and returns the keys of the rows that did not apply.
    fn apply_bulk(
        &mut self,
        table: &TableDescriptor,
        chunk: &BulkChunk,
        watermark: Timestamp,
    ) -> Result<Vec<PrimaryKey>, StorageError>;

    /// Insert-or-update of the tracking row.
    fn insert_metadata(
        &mut self,
        table: &TableDescriptor,
        key: &PrimaryKey,
        metadata: &TrackingMetadata,
    ) -> Result<usize, StorageError>;

    /// Update-only; returns 0 when no tracking row exists.
    fn update_metadata(
        &mut self,
        table: &TableDescriptor,
        key: &PrimaryKey,
        metadata: &TrackingMetadata,
    ) -> Result<usize, StorageError>;

    fn begin_transaction(&mut self) -> Result<(), StorageError>;

    fn commit_transaction(&mut self) -> Result<(), StorageError>;

    fn rollback_transaction(&mut self) -> Result<(), StorageError>;

    fn read_scope(&self, name: &str) -> Result<Option<Scope>, StorageError>;

    fn write_scope(&mut self, scope: &Scope) -> Result<(), StorageError>;
}

/// Parameter names under which bulk commands receive the peer's timestamps.
pub const CREATE_PEER_TIMESTAMP: &str = "create_peer_timestamp";
pub const UPDATE_PEER_TIMESTAMP: &str = "update_peer_timestamp";
