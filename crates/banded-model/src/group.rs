use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Expr;

/// A group nesting level. Level 1 is the coarsest (outermost) group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GroupLevel(pub u32);

impl GroupLevel {
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for GroupLevel {
    fn from(value: u32) -> Self {
        GroupLevel(value)
    }
}

/// Sort direction declared for a group.
///
/// Informational only: the host delivers records already sorted, and change
/// detection compares keys for equality, not order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// A hierarchical partition key with an associated nesting level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub level: GroupLevel,
    /// Evaluated per record to produce the group-key value.
    pub expression: Expr,
    #[serde(default)]
    pub sort_direction: SortDirection,
}

impl Group {
    pub fn new(name: impl Into<String>, level: impl Into<GroupLevel>, expression: Expr) -> Self {
        Self {
            name: name.into(),
            level: level.into(),
            expression,
            sort_direction: SortDirection::default(),
        }
    }

    #[must_use]
    pub fn with_sort_direction(mut self, direction: SortDirection) -> Self {
        self.sort_direction = direction;
        self
    }
}
