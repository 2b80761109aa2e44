use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("missing column {column} on row for table {table}")]
    MissingColumn { table: String, column: String },

    #[error("invalid table descriptor: {0}")]
    InvalidTable(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
