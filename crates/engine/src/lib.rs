pub mod applier;
pub mod bulk;
pub mod detector;
pub mod error;
pub mod metadata;
pub mod options;
pub mod policy;
pub mod resolver;
pub mod stats;

pub use applier::{ApplyOutcome, ChangeApplier};
pub use bulk::{BulkApplyResult, BulkBatchSplitter};
pub use detector::ConflictDetector;
pub use error::EngineError;
pub use metadata::MetadataWriter;
pub use options::{ConflictResolutionPolicy, SyncOptions, TransactionMode};
pub use policy::{ClientWins, ConflictPolicy, FnPolicy, ServerWins};
pub use resolver::{ConflictResolver, Resolution, ResolvedBy, RollbackReason};
pub use stats::{BatchApplyResult, RolledBack, SyncSummary, TableApplyOutcome};

use tracing::{info, warn};

use rowsync_core::{Conflict, Row, RowOperation, Scope, TableDescriptor, Timestamp};
use rowsync_storage::ChangeStore;

/// Rows changed on the remote peer for one table, in source order.
#[derive(Debug, Clone)]
pub struct TableChanges {
    pub table: TableDescriptor,
    pub rows: Vec<Row>,
}

impl TableChanges {
    pub fn new(table: TableDescriptor) -> Self {
        Self {
            table,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn rows_for(&self, operation: RowOperation) -> impl Iterator<Item = &Row> + '_ {
        self.rows.iter().filter(move |r| r.operation() == operation)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct SyncEngine<S: ChangeStore> {
    store: S,
    options: SyncOptions,
    policy: Box<dyn ConflictPolicy>,
}

impl<S: ChangeStore> SyncEngine<S> {
    /// Installs the built-in policy named by `options.conflict_resolution`.
    pub fn new(store: S, options: SyncOptions) -> Result<Self, EngineError> {
        options.validate()?;
        let policy = policy::builtin(options.conflict_resolution);
        Ok(Self {
            store,
            options,
            policy,
        })
    }

    pub fn with_policy<P: ConflictPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn set_policy(&mut self, policy: Box<dyn ConflictPolicy>) {
        self.policy = policy;
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    pub fn load_scope(&self, name: &str) -> Result<Option<Scope>, EngineError> {
        Ok(self.store.read_scope(name)?)
    }

    /// Loads the scope, creating it with a zero watermark on first use.
    pub fn ensure_scope(&mut self, name: &str) -> Result<Scope, EngineError> {
        if let Some(scope) = self.store.read_scope(name)? {
            return Ok(scope);
        }
        let scope = Scope::new(name);
        self.store.write_scope(&scope)?;
        Ok(scope)
    }

    /// Persists the advanced watermark. Call once, after every table of the
    /// pass committed.
    pub fn complete_pass(
        &mut self,
        scope: &Scope,
        new_timestamp: Timestamp,
    ) -> Result<Scope, EngineError> {
        if new_timestamp < scope.last_timestamp {
            return Err(EngineError::WatermarkRegression {
                current: scope.last_timestamp,
                requested: new_timestamp,
            });
        }
        let advanced = scope.advanced_to(new_timestamp);
        self.store.write_scope(&advanced)?;
        info!(scope = %advanced.name, last_timestamp = %new_timestamp, "scope watermark advanced");
        Ok(advanced)
    }

    // ========================================================================
    // Apply
    // ========================================================================

    /// Applies tables in order. Stops after the first table whose pass rolled
    /// back; later tables are not attempted.
    pub fn apply_changes(
        &mut self,
        changes: &[TableChanges],
        scope: &Scope,
    ) -> Result<SyncSummary, EngineError> {
        let mut summary = SyncSummary::default();
        for table_changes in changes {
            let outcome = self.apply_table_changes(table_changes, scope)?;
            let committed = outcome.is_committed();
            summary.tables.push(outcome);
            if !committed {
                warn!(
                    table = table_changes.table.name(),
                    remaining = changes.len() - summary.tables.len(),
                    "stopping sync pass after rollback"
                );
                break;
            }
        }
        Ok(summary)
    }

    /// Applies one table's changes: inserts, then updates, then deletes.
    /// `scope` is the frozen snapshot whose watermark guards every update and
    /// delete in the pass.
    pub fn apply_table_changes(
        &mut self,
        changes: &TableChanges,
        scope: &Scope,
    ) -> Result<TableApplyOutcome, EngineError> {
        let table_name = changes.table.name().to_string();
        info!(
            table = %table_name,
            rows = changes.len(),
            bulk = self.options.use_bulk_operations,
            watermark = %scope.last_timestamp,
            "applying table changes"
        );

        let mut results = Vec::new();
        let rolled_back = if self.options.per_batch_transactions() {
            self.apply_bulk(changes, scope, &mut results)?
        } else if self.options.use_bulk_operations {
            self.in_transaction(|engine| engine.apply_bulk(changes, scope, &mut results))?
        } else {
            self.in_transaction(|engine| engine.apply_rows(changes, scope, &mut results))?
        };

        let outcome = TableApplyOutcome {
            table_name,
            results,
            rolled_back,
        };
        match &outcome.rolled_back {
            Some(rb) => warn!(
                table = %outcome.table_name,
                key = %rb.key,
                conflict_type = %rb.conflict_type,
                reason = %rb.reason,
                "table changes rolled back"
            ),
            None => info!(
                table = %outcome.table_name,
                applied = outcome.applied_count(),
                resolved = outcome.resolved_conflict_count(),
                "table changes committed"
            ),
        }
        Ok(outcome)
    }

    /// Runs `body` in one store transaction. Commits unless the body failed
    /// or came back with a rollback.
    fn in_transaction<F>(&mut self, body: F) -> Result<Option<RolledBack>, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<Option<RolledBack>, EngineError>,
    {
        self.store.begin_transaction()?;
        match body(self) {
            Ok(None) => match self.store.commit_transaction() {
                Ok(()) => Ok(None),
                Err(e) => {
                    // A failed COMMIT leaves the transaction open.
                    let _ = self.store.rollback_transaction();
                    Err(e.into())
                }
            },
            Ok(Some(rolled_back)) => {
                self.store.rollback_transaction()?;
                Ok(Some(rolled_back))
            }
            Err(e) => {
                let _ = self.store.rollback_transaction();
                Err(e)
            }
        }
    }

    fn apply_rows(
        &mut self,
        changes: &TableChanges,
        scope: &Scope,
        results: &mut Vec<BatchApplyResult>,
    ) -> Result<Option<RolledBack>, EngineError> {
        let table = &changes.table;
        let applier = ChangeApplier::new(table, scope);
        let detector = ConflictDetector::new(table);
        let writer = MetadataWriter::new(table, scope);

        for operation in RowOperation::ALL {
            if changes.rows_for(operation).next().is_none() {
                continue;
            }
            let mut result = BatchApplyResult::new(table.name(), operation);
            for row in changes.rows_for(operation) {
                if applier.apply(&mut self.store, row, false)?.is_applied() {
                    writer.insert(&mut self.store, row)?;
                    result.applied_count += 1;
                    continue;
                }
                let conflict = detector.detect(&self.store, row.clone())?;
                if let Some(rolled_back) = self.settle(table, scope, conflict, &mut result)? {
                    results.push(result);
                    return Ok(Some(rolled_back));
                }
            }
            results.push(result);
        }
        Ok(None)
    }

    fn apply_bulk(
        &mut self,
        changes: &TableChanges,
        scope: &Scope,
        results: &mut Vec<BatchApplyResult>,
    ) -> Result<Option<RolledBack>, EngineError> {
        let table = &changes.table;
        let per_batch = self.options.per_batch_transactions();
        let splitter = BulkBatchSplitter::new(table, scope, self.options.bulk_batch_size);

        for operation in RowOperation::ALL {
            let rows: Vec<Row> = changes.rows_for(operation).cloned().collect();
            if rows.is_empty() {
                continue;
            }
            let mut result = BatchApplyResult::new(table.name(), operation);
            for chunk in splitter.chunks(&rows)? {
                let rolled_back = if per_batch {
                    self.in_transaction(|engine| {
                        engine.apply_bulk_chunk(
                            &splitter,
                            table,
                            scope,
                            operation,
                            chunk,
                            &mut result,
                        )
                    })?
                } else {
                    self.apply_bulk_chunk(&splitter, table, scope, operation, chunk, &mut result)?
                };
                if rolled_back.is_some() {
                    results.push(result);
                    return Ok(rolled_back);
                }
            }
            results.push(result);
        }
        Ok(None)
    }

    fn apply_bulk_chunk(
        &mut self,
        splitter: &BulkBatchSplitter<'_>,
        table: &TableDescriptor,
        scope: &Scope,
        operation: RowOperation,
        rows: &[Row],
        result: &mut BatchApplyResult,
    ) -> Result<Option<RolledBack>, EngineError> {
        let outcome = splitter.apply_chunk(&mut self.store, operation, rows)?;
        let writer = MetadataWriter::new(table, scope);
        for row in &outcome.applied {
            writer.insert(&mut self.store, row)?;
        }
        result.applied_count += outcome.applied.len();

        for conflict in outcome.conflicts {
            if let Some(rolled_back) = self.settle(table, scope, conflict, result)? {
                return Ok(Some(rolled_back));
            }
        }
        Ok(None)
    }

    fn settle(
        &mut self,
        table: &TableDescriptor,
        scope: &Scope,
        conflict: Conflict,
        result: &mut BatchApplyResult,
    ) -> Result<Option<RolledBack>, EngineError> {
        let conflict_type = conflict.conflict_type();
        let key = conflict.remote_row().primary_key(table)?;
        let resolver = ConflictResolver::new(table, scope);

        match resolver.resolve(&mut self.store, conflict, self.policy.as_ref()) {
            Ok(Resolution::Resolved { by, .. }) => {
                result.resolved_conflict_count += 1;
                if by != ResolvedBy::KeptLocal {
                    result.applied_count += 1;
                }
                Ok(None)
            }
            Ok(Resolution::Rollback { reason }) => {
                result.failed_count += 1;
                Ok(Some(RolledBack {
                    conflict_type,
                    key,
                    reason,
                }))
            }
            Err(e) => {
                result.failed_count += 1;
                Err(e)
            }
        }
    }
}
