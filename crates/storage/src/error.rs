use rusqlite::ErrorCode;
use thiserror::Error;

use crate::commands::CommandKind;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no {command} command registered for table {table}")]
    MissingCommand { table: String, command: CommandKind },

    #[error("core error: {0}")]
    Core(#[from] rowsync_core::CoreError),
}

impl StorageError {
    /// True for failures the datastore raised while executing a well-formed
    /// statement against particular row data. Those rows are reported as not
    /// applied; every other error is fatal to the pass.
    pub fn is_execution_failure(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch | ErrorCode::TooBig
            ),
            _ => false,
        }
    }
}
