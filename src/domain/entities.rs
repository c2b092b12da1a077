//! Domain entities: hydrated rows and relation map entries

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::value::{EntityKey, Value};

/// A raw result row as returned by the executor, keyed by column alias.
pub type RawRow = BTreeMap<String, Value>;

/// A hydrated tree entity: column name to value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Value of a column, treating a missing column as NULL.
    pub fn value(&self, column: &str) -> Value {
        self.values.get(column).cloned().unwrap_or(Value::Null)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (column, value) in &self.values {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            match value {
                Value::Text(s) => write!(f, "{}={:?}", column, s)?,
                other => write!(f, "{}={}", column, other)?,
            }
        }
        Ok(())
    }
}

/// Ephemeral (id, parent id) pair derived from raw query output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEntry {
    pub id: EntityKey,
    pub parent_id: Option<EntityKey>,
}
