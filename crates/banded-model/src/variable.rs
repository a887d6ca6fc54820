use serde::{Deserialize, Serialize};

use crate::{Expr, GroupLevel, Value};

/// Aggregation operator applied when folding a record into a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Sum,
    Count,
    Average,
    Min,
    Max,
    /// The stored value is replaced by the expression result each record; the
    /// expression may read other variables' current values.
    Custom,
}

/// The scope boundary at which a variable's value is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "level", rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Reset before folding every record.
    Detail,
    /// Reset when the group at this level (or any coarser one) breaks.
    Group(GroupLevel),
    /// Reset on page boundaries signalled by the host.
    Page,
    /// Never reset during a run (explicit `reset_all` only).
    Report,
}

/// A named, stateful aggregate computed incrementally over the record stream.
///
/// Declared once per report and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub expression: Expr,
    pub reset: ResetPolicy,
    /// Value assigned on reset. `None` selects the kind default
    /// ([`Variable::default_initial_value`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<Value>,
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        kind: VariableKind,
        expression: Expr,
        reset: ResetPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            expression,
            reset,
            initial_value: None,
        }
    }

    #[must_use]
    pub fn with_initial_value(mut self, value: impl Into<Value>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    /// The value a variable of `kind` holds right after a reset when no
    /// explicit initial value is configured.
    #[must_use]
    pub fn default_initial_value(kind: VariableKind) -> Value {
        match kind {
            VariableKind::Sum | VariableKind::Count => Value::Number(0.0),
            // Averages and extrema are undefined until the first sample.
            VariableKind::Average
            | VariableKind::Min
            | VariableKind::Max
            | VariableKind::Custom => Value::Null,
        }
    }

    /// The reset value for this variable (configured or kind default).
    #[must_use]
    pub fn reset_value(&self) -> Value {
        self.initial_value
            .clone()
            .unwrap_or_else(|| Self::default_initial_value(self.kind))
    }
}
