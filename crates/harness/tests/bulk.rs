use rowsync_core::{ConflictType, Row, RowOperation, TableDescriptor};
use rowsync_engine::{
    BulkBatchSplitter, ConflictResolutionPolicy, EngineError, SyncOptions, TableChanges,
    TransactionMode,
};
use rowsync_harness::fixtures::{self, item, item_key};
use rowsync_harness::{TestPeer, init_tracing};

fn peer_with_items(
    options: SyncOptions,
) -> Result<(TestPeer, TableDescriptor), Box<dyn std::error::Error>> {
    init_tracing();
    let mut peer = TestPeer::with_options("local", options)?;
    let table = fixtures::items()?;
    peer.create_table(&table, fixtures::ITEMS_DDL)?;
    Ok((peer, table))
}

/// `n` inserts with ids starting at 1; the rows at `bad` carry a negative
/// quantity, which the table's CHECK constraint rejects.
fn inserts(n: i64, bad: &[i64]) -> Vec<Row> {
    (0..n)
        .map(|i| {
            let qty = if bad.contains(&i) { -1 } else { i };
            item(RowOperation::Insert, i + 1, &format!("item-{i}"), qty)
        })
        .collect()
}

#[test]
fn one_bad_row_in_a_chunk_becomes_one_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let (mut peer, table) = peer_with_items(SyncOptions::bulk(75))?;
    let scope = peer.engine.ensure_scope("remote")?;
    let rows = inserts(75, &[40]);

    let splitter = BulkBatchSplitter::new(&table, &scope, 75);
    let result = splitter.apply_chunk(peer.engine.store_mut(), RowOperation::Insert, &rows)?;

    assert_eq!(result.applied.len(), 74);
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.remote_row(), &rows[40]);
    assert_eq!(conflict.conflict_type(), ConflictType::LocalNoRowRemoteInsert);
    assert_eq!(peer.count(&table)?, 74);
    Ok(())
}

#[test]
fn every_row_is_either_applied_or_in_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let (mut peer, table) = peer_with_items(SyncOptions::bulk(7))?;
    let scope = peer.engine.ensure_scope("remote")?;
    // A few rows already exist locally with newer edits.
    for id in [3, 9, 17] {
        peer.local_insert(&table, &item(RowOperation::Insert, id, "local", 1))?;
    }

    let mut rows = inserts(30, &[0, 12, 29]);
    rows.extend((1..=20).map(|id| item(RowOperation::Update, id, "remote", 2)));

    let splitter = BulkBatchSplitter::new(&table, &scope, 7);
    let result = splitter.apply(peer.engine.store_mut(), &rows)?;

    assert_eq!(result.len(), rows.len());
    assert_eq!(result.applied.len() + result.conflicts.len(), 50);
    // Three duplicate inserts and three constraint failures among the inserts,
    // three newer local edits and two never-inserted rows among the updates.
    assert_eq!(result.conflicts.len(), 11);
    Ok(())
}

#[test]
fn bulk_pass_commits_and_stores_peer_timestamps() -> Result<(), Box<dyn std::error::Error>> {
    let (mut peer, table) = peer_with_items(SyncOptions::bulk(4))?;
    let scope = peer.engine.ensure_scope("remote")?;
    let mut changes = TableChanges::new(table.clone());
    for id in 1..=10 {
        changes.push(
            item(RowOperation::Insert, id, "bolt", id)
                .with("create_timestamp", 100 + id)
                .with("update_timestamp", 200 + id),
        );
    }

    let outcome = peer.engine.apply_table_changes(&changes, &scope)?;

    assert!(outcome.is_committed());
    assert_eq!(outcome.applied_count(), 10);
    let tracking = peer.tracking(&table, &item_key(6))?.ok_or("tracking missing")?;
    assert_eq!(tracking.create_peer_timestamp, Some(106));
    assert_eq!(tracking.update_peer_timestamp, Some(206));
    assert_eq!(tracking.create_scope_name.as_deref(), Some("remote"));
    assert_eq!(tracking.create_timestamp, scope.last_timestamp);
    Ok(())
}

#[test]
fn bulk_conflicts_go_through_the_policy() -> Result<(), Box<dyn std::error::Error>> {
    let options =
        SyncOptions::bulk(5).with_conflict_resolution(ConflictResolutionPolicy::ClientWins);
    let (mut peer, table) = peer_with_items(options)?;
    let scope = peer.engine.ensure_scope("remote")?;
    peer.local_insert(&table, &item(RowOperation::Insert, 2, "local", 1))?;

    let mut changes = TableChanges::new(table.clone());
    for id in 1..=3 {
        changes.push(item(RowOperation::Insert, id, "remote", 5));
    }
    let outcome = peer.engine.apply_table_changes(&changes, &scope)?;

    assert!(outcome.is_committed());
    let inserts = outcome.result(RowOperation::Insert).ok_or("no insert result")?;
    assert_eq!(inserts.applied_count, 3);
    assert_eq!(inserts.resolved_conflict_count, 1);
    let row = peer.row(&table, &item_key(2))?.ok_or("row missing")?;
    assert_eq!(row.get("name").and_then(|v| v.as_text()), Some("remote"));
    Ok(())
}

#[test]
fn per_table_transaction_discards_every_chunk() -> Result<(), Box<dyn std::error::Error>> {
    let (mut peer, table) = peer_with_items(SyncOptions::bulk(10))?;
    let scope = peer.engine.ensure_scope("remote")?;
    let mut changes = TableChanges::new(table.clone());
    for row in inserts(25, &[22]) {
        changes.push(row);
    }

    let outcome = peer.engine.apply_table_changes(&changes, &scope)?;

    let rolled_back = outcome.rolled_back.as_ref().ok_or("expected rollback")?;
    assert_eq!(rolled_back.key, item_key(23));
    assert_eq!(peer.count(&table)?, 0);
    Ok(())
}

#[test]
fn per_batch_transaction_keeps_earlier_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let options = SyncOptions::bulk(10).with_transaction_mode(TransactionMode::PerBatch);
    let (mut peer, table) = peer_with_items(options)?;
    let scope = peer.engine.ensure_scope("remote")?;
    let mut changes = TableChanges::new(table.clone());
    for row in inserts(25, &[22]) {
        changes.push(row);
    }

    let outcome = peer.engine.apply_table_changes(&changes, &scope)?;

    assert!(!outcome.is_committed());
    assert_eq!(peer.count(&table)?, 20);
    assert!(peer.tracking(&table, &item_key(20))?.is_some());
    assert_eq!(peer.tracking(&table, &item_key(21))?, None);
    Ok(())
}

#[test]
fn repeated_key_conflicts_on_the_row_that_failed() -> Result<(), Box<dyn std::error::Error>> {
    let options =
        SyncOptions::bulk(75).with_conflict_resolution(ConflictResolutionPolicy::ClientWins);
    let (mut peer, table) = peer_with_items(options)?;
    let scope = peer.engine.ensure_scope("remote")?;
    let changes = TableChanges::new(table.clone())
        .with_row(item(RowOperation::Insert, 1, "first", 1))
        .with_row(item(RowOperation::Insert, 2, "other", 1))
        .with_row(item(RowOperation::Insert, 1, "second", 2));

    let outcome = peer.engine.apply_table_changes(&changes, &scope)?;

    assert!(outcome.is_committed());
    let inserts = outcome.result(RowOperation::Insert).ok_or("no insert result")?;
    assert_eq!(inserts.applied_count, 3);
    assert_eq!(inserts.resolved_conflict_count, 1);
    let row = peer.row(&table, &item_key(1))?.ok_or("row missing")?;
    assert_eq!(row.get("name").and_then(|v| v.as_text()), Some("second"));
    Ok(())
}

#[test]
fn chunk_with_repeated_key_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (mut peer, table) = peer_with_items(SyncOptions::bulk(75))?;
    let scope = peer.engine.ensure_scope("remote")?;
    let rows = vec![
        item(RowOperation::Insert, 1, "first", 1),
        item(RowOperation::Insert, 1, "second", 2),
    ];

    let splitter = BulkBatchSplitter::new(&table, &scope, 75);
    let err = splitter.apply_chunk(peer.engine.store_mut(), RowOperation::Insert, &rows);

    assert!(matches!(err, Err(EngineError::DuplicateChunkKey { .. })));
    assert_eq!(peer.count(&table)?, 0);
    Ok(())
}
