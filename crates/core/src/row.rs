use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::table::TableDescriptor;
use crate::value::ColumnValue;
use crate::CoreError;

/// The mutation a peer intends for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RowOperation {
    Insert,
    Update,
    Delete,
}

impl RowOperation {
    pub const ALL: [RowOperation; 3] = [Self::Insert, Self::Update, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for RowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered tuple of key column values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<ColumnValue>);

impl PrimaryKey {
    pub fn new(values: Vec<ColumnValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[ColumnValue] {
        &self.0
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match v {
                ColumnValue::Null => f.write_str("NULL")?,
                ColumnValue::Integer(n) => write!(f, "{n}")?,
                ColumnValue::Real(r) => write!(f, "{r}")?,
                ColumnValue::Text(s) => write!(f, "{s:?}")?,
                ColumnValue::Blob(b) => write!(f, "<{} bytes>", b.len())?,
            }
        }
        f.write_str(")")
    }
}

/// An immutable snapshot of one changed row: every column value captured up
/// front, tagged with the intended operation. A delete row keeps its full
/// column data; marking it deleted never discards values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    operation: RowOperation,
    values: BTreeMap<String, ColumnValue>,
}

impl Row {
    pub fn new(operation: RowOperation) -> Self {
        Self {
            operation,
            values: BTreeMap::new(),
        }
    }

    pub fn from_values<I, K, V>(operation: RowOperation, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ColumnValue>,
    {
        Self {
            operation,
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn operation(&self) -> RowOperation {
        self.operation
    }

    /// Same values, different intended operation.
    pub fn with_operation(&self, operation: RowOperation) -> Self {
        Self {
            operation,
            values: self.values.clone(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.operation == RowOperation::Delete
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.values.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Value for `column`, or a data-validation error naming the table.
    pub fn require(
        &self,
        table: &TableDescriptor,
        column: &str,
    ) -> Result<&ColumnValue, CoreError> {
        self.values.get(column).ok_or_else(|| CoreError::MissingColumn {
            table: table.name().to_string(),
            column: column.to_string(),
        })
    }

    pub fn primary_key(&self, table: &TableDescriptor) -> Result<PrimaryKey, CoreError> {
        let values = table
            .primary_keys()
            .iter()
            .map(|k| self.require(table, k).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PrimaryKey(values))
    }

    /// Copy of this row with columns renamed through `rename`. Columns for
    /// which `rename` returns `None` keep their name.
    pub fn rename_columns(&self, rename: impl Fn(&str) -> Option<&'static str>) -> Self {
        Self {
            operation: self.operation,
            values: self
                .values
                .iter()
                .map(|(k, v)| {
                    let name = rename(k).map_or_else(|| k.clone(), str::to_string);
                    (name, v.clone())
                })
                .collect(),
        }
    }
}
