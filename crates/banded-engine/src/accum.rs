//! Variable accumulation.
//!
//! Holds one slot per declared variable and folds each record into every
//! slot, walking slots in dependency order so a variable evaluated later in
//! the same record already sees its dependencies' updated values. Aggregates
//! carry no per-record history: a sum is one number, an average is a running
//! sum and count, so state stays flat over arbitrarily long streams.

use std::collections::{BTreeMap, HashSet};

use ahash::AHashMap;
use banded_model::{DefinitionError, Record, ResetPolicy, Value, Variable, VariableKind};

use crate::error::{ConfigError, FaultKind};
use crate::eval::{kind_name, EvalError, Evaluator, VariableResolver};
use crate::graph::{DependencyGraph, EvaluationOrder};
use crate::scope::ScopeChange;

#[derive(Debug, Clone, Copy, Default)]
struct AverageState {
    sum: f64,
    count: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    variable: Variable,
    value: Value,
    /// Running state; only meaningful for `Average` slots.
    avg: AverageState,
}

impl Slot {
    fn reset(&mut self) {
        self.value = self.variable.reset_value();
        self.avg = AverageState::default();
    }
}

/// Current values directly readable during an update pass.
struct SlotView<'a> {
    slots: &'a [Slot],
    index: &'a AHashMap<String, usize>,
}

impl VariableResolver for SlotView<'_> {
    fn variable_value(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|&slot| &self.slots[slot].value)
    }
}

/// The stateful store of all variable values for one report run.
#[derive(Debug, Clone)]
pub struct VariableAccumulator {
    /// Slots in declaration order.
    slots: Vec<Slot>,
    /// Slot ids in evaluation order.
    order: Vec<usize>,
    index: AHashMap<String, usize>,
}

impl VariableAccumulator {
    /// Builds an accumulator, deriving the evaluation order from the
    /// variables' reference graph.
    ///
    /// Fails like report compilation does: duplicate names, malformed or
    /// undeclared references, and reference cycles are all rejected here,
    /// before any record is folded.
    pub fn new(variables: Vec<Variable>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for variable in &variables {
            if !seen.insert(variable.name.clone()) {
                return Err(DefinitionError::DuplicateVariable {
                    name: variable.name.clone(),
                }
                .into());
            }
        }
        let graph = DependencyGraph::build(&variables)?;
        graph.validate()?;
        let order = graph.resolve_order()?;
        Ok(Self::from_parts(&variables, &order))
    }

    /// Assembles an accumulator from an already-resolved order. The order
    /// must cover exactly the given variables.
    pub(crate) fn from_parts(variables: &[Variable], order: &EvaluationOrder) -> Self {
        let mut index = AHashMap::with_capacity(variables.len());
        let slots: Vec<Slot> = variables
            .iter()
            .enumerate()
            .map(|(slot, variable)| {
                index.insert(variable.name.clone(), slot);
                Slot {
                    variable: variable.clone(),
                    value: variable.reset_value(),
                    avg: AverageState::default(),
                }
            })
            .collect();
        let order: Vec<usize> = order
            .iter()
            .filter_map(|name| index.get(name).copied())
            .collect();
        debug_assert_eq!(order.len(), slots.len(), "order must cover all variables");
        Self {
            slots,
            order,
            index,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current value of `name`, if declared.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|&slot| &self.slots[slot].value)
    }

    /// Snapshot of all current values, keyed by variable name.
    #[must_use]
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.slots
            .iter()
            .map(|slot| (slot.variable.name.clone(), slot.value.clone()))
            .collect()
    }

    /// Applies the resets implied by a scope change. Called before folding
    /// the record that produced the change.
    pub fn handle_change(&mut self, change: &ScopeChange) {
        for slot in &mut self.slots {
            let hit = match slot.variable.reset {
                ResetPolicy::Report => false,
                ResetPolicy::Detail => change.detail,
                ResetPolicy::Page => change.page,
                ResetPolicy::Group(level) => change.contains_group(level),
            };
            if hit {
                slot.reset();
            }
        }
    }

    /// Resets every variable to its initial value, as at the start of a run.
    pub fn reset_all(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
    }

    /// Folds one record into every variable, in evaluation order.
    ///
    /// A failed expression or an unusable sample leaves that variable's
    /// value untouched and is returned as a fault; the other variables still
    /// fold normally.
    pub fn update<E>(&mut self, record: &Record, evaluator: &E) -> Vec<FaultKind>
    where
        E: Evaluator + ?Sized,
    {
        let mut faults = Vec::new();
        for position in 0..self.order.len() {
            let slot_id = self.order[position];
            let outcome = {
                let view = SlotView {
                    slots: &self.slots,
                    index: &self.index,
                };
                evaluator.evaluate(&self.slots[slot_id].variable.expression, record, &view)
            };
            let folded = outcome.and_then(|sample| self.fold(slot_id, sample));
            if let Err(error) = folded {
                let variable = self.slots[slot_id].variable.name.clone();
                log::warn!("variable {variable} failed on this record: {error}");
                faults.push(FaultKind::Variable { variable, error });
            }
        }
        faults
    }

    /// Applies one evaluated sample to a slot.
    fn fold(&mut self, slot_id: usize, sample: Value) -> Result<(), EvalError> {
        let slot = &mut self.slots[slot_id];
        match slot.variable.kind {
            VariableKind::Custom => {
                slot.value = sample;
            }
            // Null samples do not advance aggregates.
            _ if sample.is_null() => {}
            VariableKind::Sum => {
                let x = numeric_sample(&sample)?;
                let current = slot.value.as_number().unwrap_or(0.0);
                slot.value = Value::Number(current + x);
            }
            VariableKind::Count => {
                let current = slot.value.as_number().unwrap_or(0.0);
                slot.value = Value::Number(current + 1.0);
            }
            VariableKind::Average => {
                let x = numeric_sample(&sample)?;
                slot.avg.sum += x;
                slot.avg.count += 1;
                slot.value = Value::Number(slot.avg.sum / slot.avg.count as f64);
            }
            VariableKind::Min => {
                if slot.value.is_null() || sample.compare(&slot.value).is_lt() {
                    slot.value = sample;
                }
            }
            VariableKind::Max => {
                if slot.value.is_null() || sample.compare(&slot.value).is_gt() {
                    slot.value = sample;
                }
            }
        }
        Ok(())
    }
}

impl VariableResolver for VariableAccumulator {
    fn variable_value(&self, name: &str) -> Option<&Value> {
        self.value(name)
    }
}

fn numeric_sample(sample: &Value) -> Result<f64, EvalError> {
    sample.as_number().ok_or(EvalError::TypeMismatch {
        expected: "number",
        found: kind_name(sample),
    })
}
