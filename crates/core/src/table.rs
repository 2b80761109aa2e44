use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Static shape of a synchronized table: its name, ordered primary key, and
/// the remaining (mutable) columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    name: String,
    primary_keys: Vec<String>,
    columns: Vec<String>,
}

impl TableDescriptor {
    pub fn new(
        name: impl Into<String>,
        primary_keys: &[&str],
        columns: &[&str],
    ) -> Result<Self, CoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::InvalidTable("table name is empty".into()));
        }
        if primary_keys.is_empty() {
            return Err(CoreError::InvalidTable(format!("{name} has no primary key")));
        }
        let primary_keys: Vec<String> = primary_keys.iter().map(|s| s.to_string()).collect();
        let columns: Vec<String> = columns.iter().map(|s| s.to_string()).collect();
        if let Some(dup) = columns.iter().find(|c| primary_keys.contains(c)) {
            return Err(CoreError::InvalidTable(format!(
                "{name}: column {dup} listed as both key and mutable column"
            )));
        }
        Ok(Self {
            name,
            primary_keys,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Non-key columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Key columns first, then mutable columns. This is the binding order used
    /// by every row-level command.
    pub fn all_columns(&self) -> impl Iterator<Item = &str> {
        self.primary_keys
            .iter()
            .chain(self.columns.iter())
            .map(String::as_str)
    }

    pub fn tracking_table(&self) -> String {
        format!("{}_tracking", self.name)
    }
}
