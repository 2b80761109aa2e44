use rowsync_core::{ConflictType, CoreError, Timestamp};
use rowsync_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid sync options: {0}")]
    InvalidOptions(String),

    #[error("conflict policy rejected {conflict_type} on {table} {key}")]
    ConflictRejected {
        table: String,
        key: String,
        conflict_type: ConflictType,
    },

    #[error("merged row for {table} {key} changes the primary key")]
    InvalidMerge { table: String, key: String },

    #[error("bulk chunk for {table} carries {key} more than once")]
    DuplicateChunkKey { table: String, key: String },

    #[error("scope watermark cannot move backwards from {current} to {requested}")]
    WatermarkRegression {
        current: Timestamp,
        requested: Timestamp,
    },
}
