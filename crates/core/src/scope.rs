use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ScopeId;

/// Logical clock value. Compared, never interpreted as wall time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// SQLite stores integers as i64; logical clocks above i64::MAX are clamped.
    pub fn to_sql(&self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    pub fn from_sql(value: i64) -> Self {
        Self(u64::try_from(value).unwrap_or(0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One synchronization endpoint: its identity and the watermark below which
/// remote changes are considered already seen.
///
/// A `Scope` handed to an apply pass is a frozen snapshot; the watermark only
/// moves through [`Scope::advanced_to`] once the pass has succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub id: ScopeId,
    pub last_timestamp: Timestamp,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: ScopeId::new(),
            last_timestamp: Timestamp::ZERO,
        }
    }

    pub fn with_timestamp(mut self, last_timestamp: Timestamp) -> Self {
        self.last_timestamp = last_timestamp;
        self
    }

    pub fn advanced_to(&self, last_timestamp: Timestamp) -> Self {
        Self {
            name: self.name.clone(),
            id: self.id,
            last_timestamp,
        }
    }
}
