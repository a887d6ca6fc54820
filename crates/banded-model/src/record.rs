use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Value;

/// A single data record: a field-name to value mapping.
///
/// The engine consumes records read-only and in the order the host supplies
/// them; it never re-sorts. Nested records ([`Value::Record`]) carry
/// relationship-qualified data reachable through path expressions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Walks a nested field path, descending through [`Value::Record`] values.
    ///
    /// Returns `None` when any segment is absent or a non-final segment is not
    /// a nested record.
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            match current {
                Value::Record(inner) => current = inner.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
