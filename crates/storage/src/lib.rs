pub mod commands;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use commands::{CommandCache, CommandKind, quote};
pub use error::StorageError;
pub use sqlite::{SqliteStore, from_sql_value, to_sql_value};
pub use traits::*;
