use rowsync_core::{ColumnValue, PrimaryKey, Row, RowOperation, Timestamp};
use rowsync_engine::{
    ConflictResolutionPolicy, EngineError, SyncOptions, TableChanges, TransactionMode,
};
use rowsync_harness::fixtures::{self, item, item_key};
use rowsync_harness::{TestNetwork, TestPeer, init_tracing};

fn line(order: &str, line: i64, sku: &str) -> Row {
    Row::new(RowOperation::Insert)
        .with("order_id", order)
        .with("line", line)
        .with("sku", sku)
        .with("price", 2.5)
}

// ============================================================================
// Scope watermark
// ============================================================================

#[test]
fn scope_is_created_once_and_advances() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut peer = TestPeer::new("local")?;
    assert_eq!(peer.engine.load_scope("remote")?, None);

    let scope = peer.engine.ensure_scope("remote")?;
    assert_eq!(scope.last_timestamp, Timestamp::ZERO);
    assert_eq!(peer.engine.ensure_scope("remote")?, scope);

    let advanced = peer.engine.complete_pass(&scope, Timestamp::new(12))?;
    assert_eq!(advanced.id, scope.id);
    let loaded = peer.engine.load_scope("remote")?.ok_or("scope missing")?;
    assert_eq!(loaded.last_timestamp, Timestamp::new(12));

    // Same watermark again is fine; going backwards is not.
    peer.engine.complete_pass(&loaded, Timestamp::new(12))?;
    match peer.engine.complete_pass(&loaded, Timestamp::new(11)) {
        Err(EngineError::WatermarkRegression { current, requested }) => {
            assert_eq!(current, Timestamp::new(12));
            assert_eq!(requested, Timestamp::new(11));
        }
        other => panic!("expected regression error, got {other:?}"),
    }
    Ok(())
}

// ============================================================================
// Multi-table passes
// ============================================================================

#[test]
fn pass_stops_at_first_rolled_back_table() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut peer = TestPeer::new("local")?;
    let items = fixtures::items()?;
    let lines = fixtures::line_items()?;
    peer.create_table(&items, fixtures::ITEMS_DDL)?;
    peer.create_table(&lines, fixtures::LINE_ITEMS_DDL)?;
    let scope = peer.engine.ensure_scope("remote")?;

    let changes = vec![
        TableChanges::new(lines.clone()).with_row(line("A-1", 1, "bolt")),
        TableChanges::new(items.clone()).with_row(item(RowOperation::Update, 404, "ghost", 1)),
        TableChanges::new(lines.clone()).with_row(line("A-1", 2, "nut")),
    ];
    let summary = peer.engine.apply_changes(&changes, &scope)?;

    assert!(!summary.is_committed());
    assert_eq!(summary.tables.len(), 2);
    assert!(summary.table("line_items").is_some_and(|t| t.is_committed()));
    assert!(summary.table("items").is_some_and(|t| !t.is_committed()));
    // Tables are atomic on their own: the first one stays committed.
    assert_eq!(peer.count(&lines)?, 1);
    let key = PrimaryKey::new(vec![ColumnValue::from("A-1"), ColumnValue::Integer(1)]);
    let row = peer.row(&lines, &key)?.ok_or("line missing")?;
    assert_eq!(row.get("price"), Some(&ColumnValue::Real(2.5)));
    Ok(())
}

#[test]
fn clean_pass_reports_every_table() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut peer = TestPeer::new("local")?;
    let items = fixtures::items()?;
    let lines = fixtures::line_items()?;
    peer.create_table(&items, fixtures::ITEMS_DDL)?;
    peer.create_table(&lines, fixtures::LINE_ITEMS_DDL)?;
    let scope = peer.engine.ensure_scope("remote")?;

    let changes = vec![
        TableChanges::new(items.clone())
            .with_row(item(RowOperation::Insert, 1, "bolt", 3))
            .with_row(item(RowOperation::Insert, 2, "nut", 3)),
        TableChanges::new(lines.clone()).with_row(line("A-1", 1, "bolt")),
    ];
    let summary = peer.engine.apply_changes(&changes, &scope)?;

    assert!(summary.is_committed());
    assert_eq!(summary.applied_count(), 3);
    assert_eq!(summary.resolved_conflict_count(), 0);
    Ok(())
}

// ============================================================================
// Peer to peer
// ============================================================================

#[test]
fn two_peers_converge() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut net = TestNetwork::new();
    let a = net.add_peer("a")?;
    let b = net.add_peer("b")?;
    let items = fixtures::items()?;
    net.create_table(&items, fixtures::ITEMS_DDL)?;
    let tables = [items.clone()];

    net.peer_mut(a).local_insert(&items, &item(RowOperation::Insert, 1, "bolt", 4))?;
    net.peer_mut(a).local_insert(&items, &item(RowOperation::Insert, 2, "nut", 8))?;
    net.peer_mut(b).local_insert(&items, &item(RowOperation::Insert, 3, "washer", 1))?;

    let (into_a, into_b) = net.sync(a, b, &tables)?;
    assert_eq!(into_a.applied_count(), 1);
    assert_eq!(into_b.applied_count(), 2);
    assert_eq!(net.peer(a).count(&items)?, 3);
    assert_eq!(net.peer(b).count(&items)?, 3);

    net.peer_mut(a).local_update(&items, &item(RowOperation::Update, 1, "bolt", 40))?;
    net.peer_mut(b).local_delete(&items, &item_key(2))?;

    let (into_a, into_b) = net.sync(a, b, &tables)?;
    assert!(into_a.is_committed() && into_b.is_committed());
    assert_eq!(into_a.resolved_conflict_count() + into_b.resolved_conflict_count(), 0);

    for peer in [a, b] {
        let peer = net.peer(peer);
        assert_eq!(peer.count(&items)?, 2, "{}", peer.name);
        let row = peer.row(&items, &item_key(1))?.ok_or("row 1 missing")?;
        assert_eq!(row.get("qty"), Some(&ColumnValue::Integer(40)), "{}", peer.name);
        assert!(peer.row(&items, &item_key(2))?.is_some_and(|r| r.is_tombstone()));
    }

    // Nothing left to exchange.
    let (into_a, into_b) = net.sync(a, b, &tables)?;
    assert_eq!(into_a.applied_count() + into_b.applied_count(), 0);
    Ok(())
}

#[test]
fn concurrent_edit_is_resolved_by_the_pulling_peer() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let items = fixtures::items()?;
    let tables = [items.clone()];
    let mut a = TestPeer::new("a")?;
    let client_wins =
        SyncOptions::default().with_conflict_resolution(ConflictResolutionPolicy::ClientWins);
    let mut b = TestPeer::with_options("b", client_wins)?;
    a.create_table(&items, fixtures::ITEMS_DDL)?;
    b.create_table(&items, fixtures::ITEMS_DDL)?;

    a.local_insert(&items, &item(RowOperation::Insert, 1, "bolt", 4))?;
    b.pull_from(&a, &tables)?;

    a.local_update(&items, &item(RowOperation::Update, 1, "bolt", 5))?;
    b.local_update(&items, &item(RowOperation::Update, 1, "bolt", 6))?;

    let summary = b.pull_from(&a, &tables)?;
    assert!(summary.is_committed());
    assert_eq!(summary.resolved_conflict_count(), 1);
    let row = b.row(&items, &item_key(1))?.ok_or("row missing")?;
    assert_eq!(row.get("qty"), Some(&ColumnValue::Integer(5)));
    Ok(())
}

#[test]
fn row_created_and_deleted_between_pulls_is_not_sent() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let items = fixtures::items()?;
    let tables = [items.clone()];
    let mut a = TestPeer::new("a")?;
    let mut b = TestPeer::new("b")?;
    a.create_table(&items, fixtures::ITEMS_DDL)?;
    b.create_table(&items, fixtures::ITEMS_DDL)?;

    a.local_insert(&items, &item(RowOperation::Insert, 1, "bolt", 4))?;
    a.local_insert(&items, &item(RowOperation::Insert, 5, "scrap", 1))?;
    a.local_delete(&items, &item_key(5))?;
    assert_eq!(a.changes_since(&items, Timestamp::ZERO)?.len(), 1);

    for _ in 0..3 {
        assert!(b.pull_from(&a, &tables)?.is_committed());
    }
    assert_eq!(b.count(&items)?, 1);
    assert_eq!(b.cursor("a"), a.now());

    // A row b already holds still arrives as a delete.
    a.local_delete(&items, &item_key(1))?;
    let summary = b.pull_from(&a, &tables)?;
    assert!(summary.is_committed());
    assert_eq!(summary.applied_count(), 1);
    assert_eq!(b.count(&items)?, 0);
    assert!(b.row(&items, &item_key(1))?.is_some_and(|r| r.is_tombstone()));
    Ok(())
}

#[test]
fn one_way_pull_keeps_unsent_edits_guarded() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let items = fixtures::items()?;
    let tables = [items.clone()];
    let mut a = TestPeer::new("a")?;
    let mut b = TestPeer::new("b")?;
    a.create_table(&items, fixtures::ITEMS_DDL)?;
    b.create_table(&items, fixtures::ITEMS_DDL)?;

    a.local_insert(&items, &item(RowOperation::Insert, 1, "bolt", 4))?;
    b.pull_from(&a, &tables)?;
    b.local_update(&items, &item(RowOperation::Update, 1, "bolt", 77))?;
    // Nothing new on a; b's edit has still not been sent.
    assert!(b.pull_from(&a, &tables)?.is_committed());
    assert_eq!(b.engine.load_scope("a")?.map(|s| s.last_timestamp), Some(Timestamp::ZERO));

    a.local_update(&items, &item(RowOperation::Update, 1, "bolt", 2))?;
    let summary = b.pull_from(&a, &tables)?;
    assert!(summary.is_committed());
    assert_eq!(summary.resolved_conflict_count(), 1);
    let row = b.row(&items, &item_key(1))?.ok_or("row missing")?;
    assert_eq!(row.get("qty"), Some(&ColumnValue::Integer(77)));

    // b kept its edit after seeing a's, so a takes it without a conflict.
    let summary = a.pull_from(&b, &tables)?;
    assert_eq!(summary.resolved_conflict_count(), 0);
    let row = a.row(&items, &item_key(1))?.ok_or("row missing")?;
    assert_eq!(row.get("qty"), Some(&ColumnValue::Integer(77)));
    assert_eq!(b.pull_from(&a, &tables)?.applied_count(), 0);
    Ok(())
}

#[test]
fn rolled_back_pull_keeps_the_watermark() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let items = fixtures::items()?;
    let tables = [items.clone()];
    let mut a = TestPeer::new("a")?;
    let mut b = TestPeer::new("b")?;
    a.create_table(&items, fixtures::ITEMS_DDL)?;
    // b allows no more than ten of anything.
    b.create_table(
        &items,
        "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
         qty INTEGER NOT NULL CHECK (qty BETWEEN 0 AND 10))",
    )?;
    b.local_insert(&items, &item(RowOperation::Insert, 9, "local", 1))?;
    let before = b.engine.ensure_scope("a")?;

    a.local_insert(&items, &item(RowOperation::Insert, 1, "bolt", 4))?;
    a.local_insert(&items, &item(RowOperation::Insert, 2, "crate", 500))?;

    let summary = b.pull_from(&a, &tables)?;
    assert!(!summary.is_committed());
    assert_eq!(b.engine.load_scope("a")?, Some(before));
    assert_eq!(b.count(&items)?, 1);
    Ok(())
}

// ============================================================================
// Persistence and configuration
// ============================================================================

#[test]
fn file_backed_peer_keeps_rows_and_watermark() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("peer.db");
    let path = path.to_str().ok_or("non-utf8 temp path")?;
    let items = fixtures::items()?;

    {
        let mut peer = TestPeer::open("local", path, SyncOptions::default())?;
        peer.create_table(&items, fixtures::ITEMS_DDL)?;
        let scope = peer.engine.ensure_scope("remote")?;
        let changes =
            TableChanges::new(items.clone()).with_row(item(RowOperation::Insert, 1, "bolt", 4));
        assert!(peer.engine.apply_table_changes(&changes, &scope)?.is_committed());
        peer.engine.complete_pass(&scope, Timestamp::new(7))?;
    }

    let mut peer = TestPeer::open("local", path, SyncOptions::default())?;
    peer.create_table(&items, fixtures::ITEMS_DDL)?;
    assert_eq!(peer.now(), Timestamp::new(7));
    let scope = peer.engine.load_scope("remote")?.ok_or("scope lost")?;
    assert_eq!(scope.last_timestamp, Timestamp::new(7));
    assert_eq!(peer.count(&items)?, 1);
    assert_eq!(
        peer.tracking(&items, &item_key(1))?.and_then(|t| t.create_scope_name),
        Some("remote".to_string())
    );
    Ok(())
}

#[test]
fn options_load_from_json() -> Result<(), Box<dyn std::error::Error>> {
    let options: SyncOptions = serde_json::from_str(
        r#"{
            "use_bulk_operations": true,
            "bulk_batch_size": 10,
            "transaction_mode": "per_batch",
            "conflict_resolution": "client_wins"
        }"#,
    )?;
    assert_eq!(
        options,
        SyncOptions::bulk(10)
            .with_transaction_mode(TransactionMode::PerBatch)
            .with_conflict_resolution(ConflictResolutionPolicy::ClientWins)
    );

    let defaults: SyncOptions = serde_json::from_str("{}")?;
    assert_eq!(defaults, SyncOptions::default());

    let zero: SyncOptions = serde_json::from_str(r#"{"bulk_batch_size": 0}"#)?;
    assert!(matches!(
        TestPeer::with_options("local", zero),
        Err(EngineError::InvalidOptions(_))
    ));
    Ok(())
}
