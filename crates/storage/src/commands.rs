use std::collections::HashMap;
use std::fmt;

use rowsync_core::TableDescriptor;

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    InsertRow,
    UpdateRow,
    DeleteRow,
    SelectRow,
    SelectTracking,
    InsertMetadata,
    UpdateMetadata,
    BulkPeerTimestamps,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        Self::InsertRow,
        Self::UpdateRow,
        Self::DeleteRow,
        Self::SelectRow,
        Self::SelectTracking,
        Self::InsertMetadata,
        Self::UpdateMetadata,
        Self::BulkPeerTimestamps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsertRow => "insert_row",
            Self::UpdateRow => "update_row",
            Self::DeleteRow => "delete_row",
            Self::SelectRow => "select_row",
            Self::SelectTracking => "select_tracking",
            Self::InsertMetadata => "insert_metadata",
            Self::UpdateMetadata => "update_metadata",
            Self::BulkPeerTimestamps => "bulk_peer_timestamps",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Generated command text per `(table, kind)`, owned by one store and so
/// scoped to that store's connection. Compiled statements live in the
/// connection's own statement cache; this cache only decides which commands
/// exist. A lookup for a command that was never registered, or was evicted,
/// is a configuration error.
#[derive(Debug, Default)]
pub struct CommandCache {
    commands: HashMap<(String, CommandKind), String>,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&mut self, table: &TableDescriptor) {
        for kind in CommandKind::ALL {
            self.commands
                .insert((table.name().to_string(), kind), build_command(table, kind));
        }
    }

    pub fn get(&self, table: &str, kind: CommandKind) -> Result<&str, StorageError> {
        self.commands
            .get(&(table.to_string(), kind))
            .map(String::as_str)
            .ok_or_else(|| StorageError::MissingCommand {
                table: table.to_string(),
                command: kind,
            })
    }

    pub fn contains(&self, table: &str, kind: CommandKind) -> bool {
        self.commands.contains_key(&(table.to_string(), kind))
    }

    pub fn evict(&mut self, table: &str, kind: CommandKind) -> bool {
        self.commands.remove(&(table.to_string(), kind)).is_some()
    }

    /// Drops every command for `table`, returning how many were removed.
    pub fn evict_table(&mut self, table: &str) -> usize {
        let before = self.commands.len();
        self.commands.retain(|(t, _), _| t != table);
        before - self.commands.len()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// `"a" = ?1 AND "b" = ?2`, optionally qualified by `alias`.
fn key_predicate(table: &TableDescriptor, alias: Option<&str>) -> String {
    table
        .primary_keys()
        .iter()
        .enumerate()
        .map(|(i, k)| match alias {
            Some(a) => format!("{a}.{} = ?{}", quote(k), i + 1),
            None => format!("{} = ?{}", quote(k), i + 1),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn column_list(table: &TableDescriptor) -> String {
    table.all_columns().map(quote).collect::<Vec<_>>().join(", ")
}

fn placeholders(from: usize, count: usize) -> String {
    (from..from + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_list(table: &TableDescriptor) -> String {
    table
        .primary_keys()
        .iter()
        .map(|k| quote(k))
        .collect::<Vec<_>>()
        .join(", ")
}

fn excluded_assignments(table: &TableDescriptor) -> String {
    table
        .all_columns()
        .map(|c| format!("{q} = excluded.{q}", q = quote(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

// Row commands bind every column (keys first) as ?1..?n. Insert adds the
// force flag at ?n+1; update and delete add force at ?n+1 / ?k+1 and the
// watermark right after it. Metadata commands bind keys, then scope name,
// tombstone, then timestamps (create and update for insert, update only for
// update).
fn build_command(table: &TableDescriptor, kind: CommandKind) -> String {
    let name = quote(table.name());
    let tracking = quote(&table.tracking_table());
    let n = table.all_columns().count();
    let k = table.primary_keys().len();

    match kind {
        CommandKind::InsertRow => format!(
            "INSERT INTO {name} ({cols}) SELECT {vals} \
             WHERE ?{force} = 1 OR NOT EXISTS (SELECT 1 FROM {tracking} tr WHERE {tr_keys}) \
             ON CONFLICT ({keys}) DO UPDATE SET {set} WHERE ?{force} = 1",
            cols = column_list(table),
            vals = placeholders(1, n),
            force = n + 1,
            tr_keys = key_predicate(table, Some("tr")),
            keys = key_list(table),
            set = excluded_assignments(table),
        ),
        CommandKind::UpdateRow => format!(
            "INSERT INTO {name} ({cols}) SELECT {vals} \
             WHERE ?{force} = 1 OR (EXISTS (SELECT 1 FROM {name} b WHERE {b_keys}) \
             AND NOT EXISTS (SELECT 1 FROM {tracking} tr \
             WHERE {tr_keys} AND tr.update_timestamp > ?{watermark})) \
             ON CONFLICT ({keys}) DO UPDATE SET {set}",
            cols = column_list(table),
            vals = placeholders(1, n),
            force = n + 1,
            watermark = n + 2,
            b_keys = key_predicate(table, Some("b")),
            tr_keys = key_predicate(table, Some("tr")),
            keys = key_list(table),
            set = excluded_assignments(table),
        ),
        CommandKind::DeleteRow => format!(
            "DELETE FROM {name} WHERE {keys} AND (?{force} = 1 OR NOT EXISTS \
             (SELECT 1 FROM {tracking} tr WHERE {tr_keys} AND tr.update_timestamp > ?{watermark}))",
            keys = key_predicate(table, None),
            force = k + 1,
            watermark = k + 2,
            tr_keys = key_predicate(table, Some("tr")),
        ),
        CommandKind::SelectRow => format!(
            "SELECT {cols} FROM {name} WHERE {keys}",
            cols = column_list(table),
            keys = key_predicate(table, None),
        ),
        CommandKind::SelectTracking => format!(
            "SELECT sync_row_is_tombstone, update_timestamp FROM {tracking} WHERE {keys}",
            keys = key_predicate(table, None),
        ),
        CommandKind::InsertMetadata => format!(
            "INSERT INTO {tracking} ({keys}, create_scope_name, update_scope_name, \
             sync_row_is_tombstone, create_timestamp, update_timestamp) \
             VALUES ({key_vals}, ?{scope}, ?{scope}, ?{tomb}, ?{create}, ?{update}) \
             ON CONFLICT ({keys}) DO UPDATE SET \
             create_scope_name = COALESCE(create_scope_name, excluded.create_scope_name), \
             create_timestamp = CASE WHEN create_scope_name IS NULL \
             THEN excluded.create_timestamp ELSE create_timestamp END, \
             update_scope_name = excluded.update_scope_name, \
             sync_row_is_tombstone = excluded.sync_row_is_tombstone, \
             update_timestamp = excluded.update_timestamp",
            keys = key_list(table),
            key_vals = placeholders(1, k),
            scope = k + 1,
            tomb = k + 2,
            create = k + 3,
            update = k + 4,
        ),
        CommandKind::UpdateMetadata => format!(
            "UPDATE {tracking} SET update_scope_name = ?{scope}, sync_row_is_tombstone = ?{tomb}, \
             update_timestamp = ?{update} WHERE {keys}",
            scope = k + 1,
            tomb = k + 2,
            update = k + 3,
            keys = key_predicate(table, None),
        ),
        CommandKind::BulkPeerTimestamps => format!(
            "INSERT INTO {tracking} ({keys}, create_peer_timestamp, update_peer_timestamp) \
             VALUES ({key_vals}, ?{create}, ?{update}) \
             ON CONFLICT ({keys}) DO UPDATE SET \
             create_peer_timestamp = \
             COALESCE(excluded.create_peer_timestamp, create_peer_timestamp), \
             update_peer_timestamp = \
             COALESCE(excluded.update_peer_timestamp, update_peer_timestamp)",
            keys = key_list(table),
            key_vals = placeholders(1, k),
            create = k + 1,
            update = k + 2,
        ),
    }
}
