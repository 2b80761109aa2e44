use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DEFAULT_BULK_BATCH_SIZE: usize = 75;

/// Built-in policy used when the host registers none. Named from the point
/// of view of the server applying client changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionPolicy {
    #[default]
    ServerWins,
    ClientWins,
}

/// Unit of atomicity for an apply pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    #[default]
    PerTable,
    /// One transaction per bulk chunk. Only meaningful with bulk operations.
    PerBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub bulk_batch_size: usize,
    pub use_bulk_operations: bool,
    pub conflict_resolution: ConflictResolutionPolicy,
    pub transaction_mode: TransactionMode,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
            use_bulk_operations: false,
            conflict_resolution: ConflictResolutionPolicy::default(),
            transaction_mode: TransactionMode::default(),
        }
    }
}

impl SyncOptions {
    pub fn bulk(batch_size: usize) -> Self {
        Self {
            bulk_batch_size: batch_size,
            use_bulk_operations: true,
            ..Self::default()
        }
    }

    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    pub fn with_conflict_resolution(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.conflict_resolution = policy;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.bulk_batch_size == 0 {
            return Err(EngineError::InvalidOptions(
                "bulk_batch_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn per_batch_transactions(&self) -> bool {
        self.use_bulk_operations && self.transaction_mode == TransactionMode::PerBatch
    }
}
