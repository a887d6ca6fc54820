use chrono::{NaiveDate, NaiveDateTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::Record;

/// Scalar value representation used for record fields, expression results and
/// variable values.
///
/// The enum uses an explicit `{type, value}` tagged layout for a stable,
/// JSON-safe schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent value / "no samples yet" sentinel.
    Null,
    /// IEEE-754 double precision number.
    Number(f64),
    Text(String),
    Bool(bool),
    /// A calendar date coming from source data.
    ///
    /// Kept typed (rather than collapsed to a serial number) so group keys and
    /// min/max comparisons follow calendar semantics without a formatting
    /// layer.
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// A nested record, used for relationship-qualified field paths
    /// (e.g. `customer.region`).
    Record(Record),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Returns true if the value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Converts this value into its group-key form.
    #[must_use]
    pub fn to_key(&self) -> KeyValue {
        match self {
            Value::Null => KeyValue::Null,
            Value::Number(n) => KeyValue::Number(OrderedFloat(canonical_key_number(*n))),
            Value::Text(s) => KeyValue::Text(s.clone()),
            Value::Bool(b) => KeyValue::Bool(*b),
            Value::Date(d) => KeyValue::Date(*d),
            Value::DateTime(dt) => KeyValue::DateTime(*dt),
            // Nested records degrade to their display form for grouping.
            Value::Record(_) => KeyValue::Text(self.display_string()),
        }
    }

    /// Cross-type total order used by `min`/`max` folds.
    ///
    /// Values rank by kind first (numbers, dates, datetimes, text, booleans,
    /// records, nulls last), with case-insensitive text comparison inside the
    /// text rank and a case-sensitive tiebreak so the order stays total.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = self.kind_rank().cmp(&other.kind_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => {
                cmp_text_case_insensitive(a, b).then_with(|| a.cmp(b))
            }
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Record(_), Value::Record(_)) => {
                self.display_string().cmp(&other.display_string())
            }
            _ => Ordering::Equal,
        }
    }

    /// Display-oriented string for this value (not a stable serialization).
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Number(n) => n.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bool(b) => {
                if *b {
                    "true".to_string()
                } else {
                    "false".to_string()
                }
            }
            Value::Date(d) => d.to_string(),
            Value::DateTime(dt) => dt.to_string(),
            Value::Record(r) => {
                let fields: Vec<String> = r.field_names().map(str::to_string).collect();
                format!("{{record: {}}}", fields.join(", "))
            }
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Number(_) => 0,
            Value::Date(_) => 1,
            Value::DateTime(_) => 2,
            Value::Text(_) => 3,
            Value::Bool(_) => 4,
            Value::Record(_) => 5,
            Value::Null => 6,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Record(value)
    }
}

/// Returns the canonical numeric representation for group keys.
///
/// `0.0` and `-0.0` are the same group item, as are all NaN payloads.
fn canonical_key_number(n: f64) -> f64 {
    if n == 0.0 {
        return 0.0;
    }
    if n.is_nan() {
        return f64::NAN;
    }
    n
}

/// Hashable, totally-ordered group-key form of a [`Value`].
///
/// Group-change detection compares these for exact equality, so the numeric
/// variant wraps [`OrderedFloat`] (NaN == NaN, usable as a hash key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum KeyValue {
    Null,
    Number(OrderedFloat<f64>),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl KeyValue {
    fn kind_rank(&self) -> u8 {
        match self {
            KeyValue::Number(_) => 0,
            KeyValue::Date(_) => 1,
            KeyValue::DateTime(_) => 2,
            KeyValue::Text(_) => 3,
            KeyValue::Bool(_) => 4,
            KeyValue::Null => 5,
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.kind_rank().cmp(&other.kind_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (KeyValue::Number(a), KeyValue::Number(b)) => a.cmp(b),
            (KeyValue::Date(a), KeyValue::Date(b)) => a.cmp(b),
            (KeyValue::DateTime(a), KeyValue::DateTime(b)) => a.cmp(b),
            (KeyValue::Text(a), KeyValue::Text(b)) => {
                cmp_text_case_insensitive(a, b).then_with(|| a.cmp(b))
            }
            (KeyValue::Bool(a), KeyValue::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

fn cmp_text_case_insensitive(a: &str, b: &str) -> Ordering {
    let mut a_iter = a.chars().flat_map(char::to_uppercase);
    let mut b_iter = b.chars().flat_map(char::to_uppercase);
    loop {
        match (a_iter.next(), b_iter.next()) {
            (Some(ac), Some(bc)) => match ac.cmp(&bc) {
                Ordering::Equal => continue,
                ord => return ord,
            },
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        }
    }
}
