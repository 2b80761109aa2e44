use rusqlite::Connection;

use rowsync_core::TableDescriptor;

use crate::commands::quote;
use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS scope_info (
    scope_name TEXT PRIMARY KEY,
    scope_id TEXT NOT NULL CHECK (length(scope_id) = 36),
    last_timestamp INTEGER NOT NULL DEFAULT 0 CHECK (last_timestamp >= 0)
);
";

/// DDL for the tracking table that shadows `table`. Key columns carry no
/// declared type so they compare exactly as the base table's values bind.
pub fn tracking_table_sql(table: &TableDescriptor) -> String {
    let tracking = table.tracking_table();
    let keys: Vec<String> = table.primary_keys().iter().map(|k| quote(k)).collect();
    let key_defs: String = keys.iter().map(|k| format!("    {k} NOT NULL,\n")).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {t} (
{key_defs}    create_scope_name TEXT,
    update_scope_name TEXT,
    create_timestamp INTEGER NOT NULL DEFAULT 0,
    update_timestamp INTEGER NOT NULL DEFAULT 0,
    create_peer_timestamp INTEGER,
    update_peer_timestamp INTEGER,
    sync_row_is_tombstone INTEGER NOT NULL DEFAULT 0 CHECK (sync_row_is_tombstone IN (0, 1)),
    PRIMARY KEY ({keys})
);
CREATE INDEX IF NOT EXISTS {idx} ON {t} (update_timestamp);",
        t = quote(&tracking),
        keys = keys.join(", "),
        idx = quote(&format!("{tracking}_update_timestamp")),
    )
}

pub fn create_tracking_table(
    conn: &Connection,
    table: &TableDescriptor,
) -> Result<(), StorageError> {
    conn.execute_batch(&tracking_table_sql(table))?;
    Ok(())
}
