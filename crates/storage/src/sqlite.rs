use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use tracing::debug;

use rowsync_core::{
    ColumnValue, PrimaryKey, Row, RowOperation, Scope, ScopeId, TableDescriptor, Timestamp,
};

use crate::commands::{CommandCache, CommandKind};
use crate::error::StorageError;
use crate::traits::{
    BulkChunk, CREATE_PEER_TIMESTAMP, ChangeStore, RowReader, TrackingMetadata,
    UPDATE_PEER_TIMESTAMP,
};

pub fn to_sql_value(value: &ColumnValue) -> Value {
    match value {
        ColumnValue::Null => Value::Null,
        ColumnValue::Integer(n) => Value::Integer(*n),
        ColumnValue::Real(r) => Value::Real(*r),
        ColumnValue::Text(s) => Value::Text(s.clone()),
        ColumnValue::Blob(b) => Value::Blob(b.clone()),
    }
}

pub fn from_sql_value(value: Value) -> ColumnValue {
    match value {
        Value::Null => ColumnValue::Null,
        Value::Integer(n) => ColumnValue::Integer(n),
        Value::Real(r) => ColumnValue::Real(r),
        Value::Text(s) => ColumnValue::Text(s),
        Value::Blob(b) => ColumnValue::Blob(b),
    }
}

fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

/// Every column of `row` in binding order. A missing column is a validation
/// error, never a conflict.
fn row_params(table: &TableDescriptor, row: &Row) -> Result<Vec<Value>, StorageError> {
    table
        .all_columns()
        .map(|c| row.require(table, c).map(to_sql_value).map_err(StorageError::from))
        .collect()
}

fn key_params(key: &PrimaryKey) -> Vec<Value> {
    key.values().iter().map(to_sql_value).collect()
}

pub struct SqliteStore {
    conn: Connection,
    commands: CommandCache,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            commands: CommandCache::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            commands: CommandCache::new(),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn commands(&self) -> &CommandCache {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut CommandCache {
        &mut self.commands
    }

    /// Creates the tracking table for `table` and registers its commands.
    /// The base table must already exist with a primary key matching the
    /// descriptor.
    pub fn provision_table(&mut self, table: &TableDescriptor) -> Result<(), StorageError> {
        crate::schema::create_tracking_table(&self.conn, table)?;
        self.commands.register_table(table);
        debug!(table = table.name(), "provisioned tracking table");
        Ok(())
    }

    /// Forgets every command for `table` along with compiled statements.
    pub fn evict_table(&mut self, table: &str) -> usize {
        self.conn.flush_prepared_statement_cache();
        self.commands.evict_table(table)
    }

    fn execute(
        &self,
        table: &TableDescriptor,
        kind: CommandKind,
        params: Vec<Value>,
    ) -> Result<usize, StorageError> {
        let sql = self.commands.get(table.name(), kind)?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params))?)
    }

    fn read_tracking(
        &self,
        table: &TableDescriptor,
        key: &PrimaryKey,
    ) -> Result<Option<(bool, Timestamp)>, StorageError> {
        let sql = self.commands.get(table.name(), CommandKind::SelectTracking)?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        let found = stmt
            .query_row(params_from_iter(key_params(key)), |r| {
                Ok((
                    r.get::<_, i64>(0)? != 0,
                    Timestamp::from_sql(r.get::<_, i64>(1)?),
                ))
            })
            .optional()?;
        Ok(found)
    }

    /// Last-modified timestamp recorded for `key`, if it is tracked.
    pub fn row_timestamp(
        &self,
        table: &TableDescriptor,
        key: &PrimaryKey,
    ) -> Result<Option<Timestamp>, StorageError> {
        Ok(self.read_tracking(table, key)?.map(|(_, ts)| ts))
    }

    fn write_peer_timestamps(
        &self,
        table: &TableDescriptor,
        key: &PrimaryKey,
        row: &Row,
    ) -> Result<(), StorageError> {
        let mut params = key_params(key);
        for column in [CREATE_PEER_TIMESTAMP, UPDATE_PEER_TIMESTAMP] {
            params.push(row.get(column).map_or(Value::Null, to_sql_value));
        }
        self.execute(table, CommandKind::BulkPeerTimestamps, params)?;
        Ok(())
    }
}

impl RowReader for SqliteStore {
    fn select_row(
        &self,
        table: &TableDescriptor,
        key: &PrimaryKey,
    ) -> Result<Option<Row>, StorageError> {
        let tracking = self.read_tracking(table, key)?;
        let operation = match tracking {
            Some((true, _)) => RowOperation::Delete,
            _ => RowOperation::Update,
        };

        let columns: Vec<&str> = table.all_columns().collect();
        let sql = self.commands.get(table.name(), CommandKind::SelectRow)?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        let base = stmt
            .query_row(params_from_iter(key_params(key)), |r| {
                (0..columns.len())
                    .map(|i| r.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .optional()?;

        match (base, tracking) {
            (Some(values), _) => Ok(Some(Row::from_values(
                operation,
                columns
                    .iter()
                    .copied()
                    .zip(values.into_iter().map(from_sql_value)),
            ))),
            // Deleted locally: only the tracking row survives, so the key is
            // all there is to report.
            (None, Some(_)) => {
                let mut row = Row::new(operation);
                for (name, value) in table.primary_keys().iter().zip(key.values()) {
                    row = row.with(name.as_str(), value.clone());
                }
                for name in table.columns() {
                    row = row.with(name.as_str(), ColumnValue::Null);
                }
                Ok(Some(row))
            }
            (None, None) => Ok(None),
        }
    }
}

impl ChangeStore for SqliteStore {
    fn insert_row(
        &mut self,
        table: &TableDescriptor,
        row: &Row,
        force_write: bool,
    ) -> Result<usize, StorageError> {
        let mut params = row_params(table, row)?;
        params.push(flag(force_write));
        self.execute(table, CommandKind::InsertRow, params)
    }

    fn update_row(
        &mut self,
        table: &TableDescriptor,
        row: &Row,
        watermark: Timestamp,
        force_write: bool,
    ) -> Result<usize, StorageError> {
        let mut params = row_params(table, row)?;
        params.push(flag(force_write));
        params.push(Value::Integer(watermark.to_sql()));
        self.execute(table, CommandKind::UpdateRow, params)
    }

    fn delete_row(
        &mut self,
        table: &TableDescriptor,
        row: &Row,
        watermark: Timestamp,
        force_write: bool,
    ) -> Result<usize, StorageError> {
        let mut params = key_params(&row.primary_key(table)?);
        params.push(flag(force_write));
        params.push(Value::Integer(watermark.to_sql()));
        self.execute(table, CommandKind::DeleteRow, params)
    }

    fn apply_bulk(
        &mut self,
        table: &TableDescriptor,
        chunk: &BulkChunk,
        watermark: Timestamp,
    ) -> Result<Vec<PrimaryKey>, StorageError> {
        // SQLite has no table-valued parameters; a chunk executes row by row
        // inside the caller's transaction and reports the rows that missed.
        let store_peer_timestamps =
            chunk.binds(CREATE_PEER_TIMESTAMP) || chunk.binds(UPDATE_PEER_TIMESTAMP);
        let mut failed = Vec::new();

        for row in &chunk.rows {
            let key = row.primary_key(table)?;
            let result = match chunk.operation {
                RowOperation::Insert => self.insert_row(table, row, false),
                RowOperation::Update => self.update_row(table, row, watermark, false),
                RowOperation::Delete => self.delete_row(table, row, watermark, false),
            };
            match result {
                Ok(affected) if affected > 0 => {
                    if store_peer_timestamps {
                        self.write_peer_timestamps(table, &key, row)?;
                    }
                }
                Ok(_) => failed.push(key),
                Err(e) if e.is_execution_failure() => {
                    debug!(table = table.name(), key = %key, error = %e, "bulk row rejected");
                    failed.push(key);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(failed)
    }

    fn insert_metadata(
        &mut self,
        table: &TableDescriptor,
        key: &PrimaryKey,
        metadata: &TrackingMetadata,
    ) -> Result<usize, StorageError> {
        let mut params = key_params(key);
        params.push(Value::Text(metadata.scope_name.clone()));
        params.push(flag(metadata.tombstone));
        params.push(Value::Integer(metadata.create_timestamp.to_sql()));
        params.push(Value::Integer(metadata.update_timestamp.to_sql()));
        self.execute(table, CommandKind::InsertMetadata, params)
    }

    fn update_metadata(
        &mut self,
        table: &TableDescriptor,
        key: &PrimaryKey,
        metadata: &TrackingMetadata,
    ) -> Result<usize, StorageError> {
        let mut params = key_params(key);
        params.push(Value::Text(metadata.scope_name.clone()));
        params.push(flag(metadata.tombstone));
        params.push(Value::Integer(metadata.update_timestamp.to_sql()));
        self.execute(table, CommandKind::UpdateMetadata, params)
    }

    fn begin_transaction(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn read_scope(&self, name: &str) -> Result<Option<Scope>, StorageError> {
        let found = self
            .conn
            .query_row(
                "SELECT scope_id, last_timestamp FROM scope_info WHERE scope_name = ?1",
                [name],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
            )
            .optional()?;
        found
            .map(|(id, ts)| -> Result<Scope, StorageError> {
                Ok(Scope {
                    name: name.to_string(),
                    id: id.parse::<ScopeId>()?,
                    last_timestamp: Timestamp::from_sql(ts),
                })
            })
            .transpose()
    }

    fn write_scope(&mut self, scope: &Scope) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO scope_info (scope_name, scope_id, last_timestamp) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope_name) DO UPDATE SET \
             scope_id = excluded.scope_id, last_timestamp = excluded.last_timestamp",
            rusqlite::params![scope.name, scope.id.to_string(), scope.last_timestamp.to_sql()],
        )?;
        Ok(())
    }
}
