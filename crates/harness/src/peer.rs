use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params_from_iter};

use rowsync_core::{PrimaryKey, Row, RowOperation, TableDescriptor, Timestamp};
use rowsync_engine::{EngineError, SyncEngine, SyncOptions, SyncSummary, TableChanges};
use rowsync_storage::{RowReader, SqliteStore, StorageError, from_sql_value, quote, to_sql_value};

/// A tracking row as stored, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingRecord {
    pub create_scope_name: Option<String>,
    pub update_scope_name: Option<String>,
    pub create_timestamp: Timestamp,
    pub update_timestamp: Timestamp,
    pub create_peer_timestamp: Option<i64>,
    pub update_peer_timestamp: Option<i64>,
    pub tombstone: bool,
}

/// One replica: a SQLite store behind a sync engine, plus a logical clock
/// that stamps local edits.
///
/// Scope watermarks live in this peer's clock. `cursors` remembers, per
/// remote peer, how far into that peer's clock changes were already pulled.
pub struct TestPeer {
    pub name: String,
    pub engine: SyncEngine<SqliteStore>,
    now: u64,
    cursors: HashMap<String, Timestamp>,
}

impl TestPeer {
    pub fn new(name: &str) -> Result<Self, EngineError> {
        Self::with_options(name, SyncOptions::default())
    }

    pub fn with_options(name: &str, options: SyncOptions) -> Result<Self, EngineError> {
        let store = SqliteStore::open_in_memory()?;
        Ok(Self {
            name: name.to_string(),
            engine: SyncEngine::new(store, options)?,
            now: 0,
            cursors: HashMap::new(),
        })
    }

    /// File-backed peer. The clock resumes from the highest stored watermark.
    pub fn open(name: &str, path: &str, options: SyncOptions) -> Result<Self, EngineError> {
        let store = SqliteStore::open(path)?;
        let resumed: i64 = store
            .conn()
            .query_row("SELECT COALESCE(MAX(last_timestamp), 0) FROM scope_info", [], |r| {
                r.get(0)
            })
            .map_err(StorageError::from)?;
        Ok(Self {
            name: name.to_string(),
            engine: SyncEngine::new(store, options)?,
            now: Timestamp::from_sql(resumed).value(),
            cursors: HashMap::new(),
        })
    }

    pub fn conn(&self) -> &Connection {
        self.engine.store().conn()
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::new(self.now)
    }

    fn tick(&mut self) -> Timestamp {
        self.now += 1;
        Timestamp::new(self.now)
    }

    /// Runs the base-table DDL, then provisions tracking for it.
    pub fn create_table(
        &mut self,
        table: &TableDescriptor,
        ddl: &str,
    ) -> Result<(), StorageError> {
        let store = self.engine.store_mut();
        store.conn().execute_batch(ddl)?;
        store.provision_table(table)
    }

    // ========================================================================
    // Local edits
    // ========================================================================

    pub fn local_insert(
        &mut self,
        table: &TableDescriptor,
        row: &Row,
    ) -> Result<Timestamp, StorageError> {
        let ts = self.tick();
        let columns: Vec<&str> = table.all_columns().collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table.name()),
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", "),
        );
        let params = columns
            .iter()
            .map(|c| row.require(table, c).map(to_sql_value))
            .collect::<Result<Vec<_>, _>>()?;
        self.conn().execute(&sql, params_from_iter(params))?;
        self.stamp(table, &row.primary_key(table)?, ts, false)?;
        Ok(ts)
    }

    /// Rewrites the non-key columns of an existing row.
    pub fn local_update(
        &mut self,
        table: &TableDescriptor,
        row: &Row,
    ) -> Result<Timestamp, StorageError> {
        let ts = self.tick();
        let key = row.primary_key(table)?;
        let k = table.primary_keys().len();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote(table.name()),
            table
                .columns()
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = ?{}", quote(c), k + i + 1))
                .collect::<Vec<_>>()
                .join(", "),
            key_predicate(table),
        );
        let mut params: Vec<Value> = key.values().iter().map(to_sql_value).collect();
        for column in table.columns() {
            params.push(to_sql_value(row.require(table, column)?));
        }
        self.conn().execute(&sql, params_from_iter(params))?;
        self.stamp(table, &key, ts, false)?;
        Ok(ts)
    }

    pub fn local_delete(
        &mut self,
        table: &TableDescriptor,
        key: &PrimaryKey,
    ) -> Result<Timestamp, StorageError> {
        let ts = self.tick();
        let sql = format!("DELETE FROM {} WHERE {}", quote(table.name()), key_predicate(table));
        let params: Vec<Value> = key.values().iter().map(to_sql_value).collect();
        self.conn().execute(&sql, params_from_iter(params))?;
        self.stamp(table, key, ts, true)?;
        Ok(ts)
    }

    /// Local edits leave the scope names NULL. Re-inserting a tombstoned key
    /// restarts its create timestamp.
    fn stamp(
        &self,
        table: &TableDescriptor,
        key: &PrimaryKey,
        ts: Timestamp,
        tombstone: bool,
    ) -> Result<(), StorageError> {
        let k = table.primary_keys().len();
        let keys = key_list(table);
        let sql = format!(
            "INSERT INTO {tracking} \
             ({keys}, create_timestamp, update_timestamp, sync_row_is_tombstone) \
             VALUES ({vals}, ?{ts}, ?{ts}, ?{tomb}) \
             ON CONFLICT ({keys}) DO UPDATE SET \
             create_timestamp = CASE \
             WHEN sync_row_is_tombstone = 1 AND excluded.sync_row_is_tombstone = 0 \
             THEN excluded.create_timestamp ELSE create_timestamp END, \
             create_scope_name = CASE \
             WHEN sync_row_is_tombstone = 1 AND excluded.sync_row_is_tombstone = 0 \
             THEN NULL ELSE create_scope_name END, \
             update_scope_name = NULL, \
             update_timestamp = excluded.update_timestamp, \
             sync_row_is_tombstone = excluded.sync_row_is_tombstone",
            tracking = quote(&table.tracking_table()),
            vals = (1..=k).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", "),
            ts = k + 1,
            tomb = k + 2,
        );
        let mut params: Vec<Value> = key.values().iter().map(to_sql_value).collect();
        params.push(Value::Integer(ts.to_sql()));
        params.push(Value::Integer(i64::from(tombstone)));
        self.conn().execute(&sql, params_from_iter(params))?;
        Ok(())
    }

    // ========================================================================
    // Change source
    // ========================================================================

    /// Every tracked row of `table` modified after `since`, oldest first.
    /// Rows created after `since` come out as inserts, tombstones as deletes.
    /// Each row also carries its `create_timestamp` and `update_timestamp`.
    ///
    /// A row both created and deleted after `since` is left out: a peer that
    /// pulled up to `since` never held it.
    pub fn changes_since(
        &self,
        table: &TableDescriptor,
        since: Timestamp,
    ) -> Result<TableChanges, StorageError> {
        let k = table.primary_keys().len();
        let sql = format!(
            "SELECT {keys}, create_timestamp, update_timestamp, sync_row_is_tombstone \
             FROM {tracking} WHERE update_timestamp > ?1 ORDER BY update_timestamp",
            keys = key_list(table),
            tracking = quote(&table.tracking_table()),
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let tracked = stmt
            .query_map([since.to_sql()], |r| {
                let key = (0..k)
                    .map(|i| r.get::<_, Value>(i).map(from_sql_value))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((
                    PrimaryKey::new(key),
                    r.get::<_, i64>(k)?,
                    r.get::<_, i64>(k + 1)?,
                    r.get::<_, i64>(k + 2)? != 0,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut changes = TableChanges::new(table.clone());
        for (key, created, updated, tombstone) in tracked {
            if tombstone && created > since.to_sql() {
                continue;
            }
            let Some(row) = self.engine.store().select_row(table, &key)? else {
                continue;
            };
            let operation = if tombstone {
                RowOperation::Delete
            } else if created > since.to_sql() {
                RowOperation::Insert
            } else {
                RowOperation::Update
            };
            changes.push(
                row.with_operation(operation)
                    .with("create_timestamp", created)
                    .with("update_timestamp", updated),
            );
        }
        Ok(changes)
    }

    /// How far into this peer's clock `remote` has pulled.
    pub fn cursor(&self, remote: &str) -> Timestamp {
        self.cursors.get(remote).copied().unwrap_or(Timestamp::ZERO)
    }

    /// Pulls everything `remote` changed since the last pull and applies it
    /// under the scope named after `remote`.
    ///
    /// The pass runs with the watermark set to the point in this peer's clock
    /// that `remote` has already pulled. Local edits after it are still
    /// unsent, so they conflict instead of being overwritten. The watermark
    /// and cursor are only stored when every table committed.
    pub fn pull_from(
        &mut self,
        remote: &TestPeer,
        tables: &[TableDescriptor],
    ) -> Result<SyncSummary, Box<dyn std::error::Error>> {
        let stored = self.engine.ensure_scope(&remote.name)?;
        let delivered = remote.cursor(&self.name);
        let scope = if delivered > stored.last_timestamp {
            stored.advanced_to(delivered)
        } else {
            stored.clone()
        };
        let since = self.cursor(&remote.name);
        let changes = tables
            .iter()
            .map(|t| remote.changes_since(t, since))
            .collect::<Result<Vec<_>, _>>()?;

        let summary = self.engine.apply_changes(&changes, &scope)?;
        if summary.is_committed() {
            self.engine.complete_pass(&stored, scope.last_timestamp)?;
            self.cursors.insert(remote.name.clone(), remote.now());
        }
        Ok(summary)
    }

    // ========================================================================
    // Readers
    // ========================================================================

    pub fn row(
        &self,
        table: &TableDescriptor,
        key: &PrimaryKey,
    ) -> Result<Option<Row>, StorageError> {
        self.engine.store().select_row(table, key)
    }

    pub fn count(&self, table: &TableDescriptor) -> Result<usize, StorageError> {
        let n: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM {}", quote(table.name())),
            [],
            |r| r.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    pub fn tracking(
        &self,
        table: &TableDescriptor,
        key: &PrimaryKey,
    ) -> Result<Option<TrackingRecord>, StorageError> {
        let sql = format!(
            "SELECT create_scope_name, update_scope_name, create_timestamp, update_timestamp, \
             create_peer_timestamp, update_peer_timestamp, sync_row_is_tombstone \
             FROM {} WHERE {}",
            quote(&table.tracking_table()),
            key_predicate(table),
        );
        let params: Vec<Value> = key.values().iter().map(to_sql_value).collect();
        let record = self
            .conn()
            .query_row(&sql, params_from_iter(params), |r| {
                Ok(TrackingRecord {
                    create_scope_name: r.get(0)?,
                    update_scope_name: r.get(1)?,
                    create_timestamp: Timestamp::from_sql(r.get(2)?),
                    update_timestamp: Timestamp::from_sql(r.get(3)?),
                    create_peer_timestamp: r.get(4)?,
                    update_peer_timestamp: r.get(5)?,
                    tombstone: r.get::<_, i64>(6)? != 0,
                })
            })
            .optional()?;
        Ok(record)
    }
}

fn key_list(table: &TableDescriptor) -> String {
    table.primary_keys().iter().map(|k| quote(k)).collect::<Vec<_>>().join(", ")
}

fn key_predicate(table: &TableDescriptor) -> String {
    table
        .primary_keys()
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ?{}", quote(k), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}
