//! Group scope tracking.
//!
//! The tracker watches the stream of records and decides, for each one, which
//! scopes are closing: the detail scope on every record after the first, and
//! a cascade of group scopes whenever a group key changes. Group keys are
//! compared in canonical key form ([`banded_model::KeyValue`]), so `0.0` and
//! `-0.0` are one key and NaN keys compare equal to themselves.
//!
//! A failed group-key expression does not stop the run: the key is treated
//! as null for break detection and the failure is queued as a fault for the
//! driver to collect.

use banded_model::{Group, GroupLevel, KeyValue, Record};
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::FaultKind;
use crate::eval::{Evaluator, NoVariables};

/// The scopes that close when a record arrives.
///
/// `groups` lists the levels whose keys changed plus every finer level they
/// drag along, in ascending (coarse to fine) order. `page` reports a pending
/// host page break being consumed. The first record of a run produces an
/// empty change: nothing has closed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeChange {
    /// True on every record except the first of a run.
    pub detail: bool,
    /// Group levels whose scope closed, ascending.
    pub groups: SmallVec<[GroupLevel; 4]>,
    /// True when a page boundary was signalled since the previous record.
    pub page: bool,
}

impl ScopeChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.detail && self.groups.is_empty() && !self.page
    }

    #[must_use]
    pub fn contains_group(&self, level: GroupLevel) -> bool {
        self.groups.contains(&level)
    }

    /// The coarsest closed group level, if any group closed.
    #[must_use]
    pub fn coarsest_group(&self) -> Option<GroupLevel> {
        self.groups.first().copied()
    }
}

/// Detects group breaks and page boundaries over a sorted record stream.
///
/// Holds only the previous record's group keys, never the record itself, so
/// memory stays flat no matter how long the stream runs.
#[derive(Debug, Clone)]
pub struct ScopeTracker {
    /// Groups sorted ascending by level; index here is the group's slot.
    groups: Vec<Group>,
    /// Key of the group instance currently open, per slot. Empty before the
    /// first record.
    current_keys: Vec<KeyValue>,
    /// Break count per slot (instances closed so far).
    breaks: Vec<u64>,
    records_seen: u64,
    pending_page_break: bool,
    faults: Vec<FaultKind>,
}

impl ScopeTracker {
    /// Builds a tracker over `groups`. Order of the input does not matter;
    /// groups are tracked in level order.
    #[must_use]
    pub fn new(mut groups: Vec<Group>) -> Self {
        groups.sort_by_key(|g| g.level);
        let n = groups.len();
        Self {
            groups,
            current_keys: Vec::with_capacity(n),
            breaks: vec![0; n],
            records_seen: 0,
            pending_page_break: false,
            faults: Vec::new(),
        }
    }

    /// Records consumed so far.
    #[must_use]
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    /// Closed-instance count for the group at `level`.
    #[must_use]
    pub fn breaks_at(&self, level: GroupLevel) -> u64 {
        self.slot_of(level).map_or(0, |slot| self.breaks[slot])
    }

    /// Group instances seen so far at `level`: closed instances plus the one
    /// currently open. Zero before the first record.
    #[must_use]
    pub fn group_instances(&self, level: GroupLevel) -> u64 {
        match self.slot_of(level) {
            Some(slot) if self.records_seen > 0 => self.breaks[slot] + 1,
            _ => 0,
        }
    }

    /// Key of the currently open instance of the group at `level`. `None`
    /// before the first record or for an untracked level.
    #[must_use]
    pub fn current_key(&self, level: GroupLevel) -> Option<&KeyValue> {
        let slot = self.slot_of(level)?;
        self.current_keys.get(slot)
    }

    /// Flags a page boundary to be reported on the next record. Idempotent
    /// between records.
    pub fn notify_page_break(&mut self) {
        self.pending_page_break = true;
    }

    /// Takes the group-key faults queued since the last call.
    pub fn take_faults(&mut self) -> Vec<FaultKind> {
        std::mem::take(&mut self.faults)
    }

    /// Consumes `record` and returns the scopes it closes.
    ///
    /// Key evaluation failures are queued as faults and the affected key is
    /// treated as null. A page break signalled before the first record is
    /// discarded: there is no open page scope to close yet.
    pub fn next<E>(&mut self, record: &Record, evaluator: &E) -> ScopeChange
    where
        E: Evaluator + ?Sized,
    {
        let keys = self.evaluate_keys(record, evaluator);
        let change = self.change_for(&keys);

        if self.records_seen == 0 {
            self.pending_page_break = false;
        } else {
            for level in &change.groups {
                if let Some(slot) = self.slot_of(*level) {
                    self.breaks[slot] += 1;
                }
            }
            if change.page {
                self.pending_page_break = false;
            }
        }
        self.current_keys = keys;
        self.records_seen += 1;
        change
    }

    /// Computes the scope change `record` would produce, without consuming
    /// it.
    ///
    /// Pure: tracker state is untouched, and key evaluation failures are
    /// dropped instead of queued (the subsequent [`ScopeTracker::next`] call
    /// reports them).
    #[must_use]
    pub fn peek<E>(&self, record: &Record, evaluator: &E) -> ScopeChange
    where
        E: Evaluator + ?Sized,
    {
        let mut scratch = Vec::new();
        let keys = self.evaluate_keys_into(record, evaluator, &mut scratch);
        self.change_for(&keys)
    }

    fn slot_of(&self, level: GroupLevel) -> Option<usize> {
        self.groups.iter().position(|g| g.level == level)
    }

    fn evaluate_keys<E>(&mut self, record: &Record, evaluator: &E) -> Vec<KeyValue>
    where
        E: Evaluator + ?Sized,
    {
        let mut faults = Vec::new();
        let keys = self.evaluate_keys_into(record, evaluator, &mut faults);
        for fault in &faults {
            log::warn!("group key evaluation failed: {fault}");
        }
        self.faults.append(&mut faults);
        keys
    }

    fn evaluate_keys_into<E>(
        &self,
        record: &Record,
        evaluator: &E,
        faults: &mut Vec<FaultKind>,
    ) -> Vec<KeyValue>
    where
        E: Evaluator + ?Sized,
    {
        self.groups
            .iter()
            .map(|group| {
                match evaluator.evaluate(&group.expression, record, &NoVariables) {
                    Ok(value) => value.to_key(),
                    Err(error) => {
                        faults.push(FaultKind::GroupKey {
                            group: group.name.clone(),
                            error,
                        });
                        KeyValue::Null
                    }
                }
            })
            .collect()
    }

    /// Break cascade for `new_keys` against the current keys: the coarsest
    /// changed level closes its own scope and every finer one.
    fn change_for(&self, new_keys: &[KeyValue]) -> ScopeChange {
        if self.records_seen == 0 {
            return ScopeChange::default();
        }

        let mut change = ScopeChange {
            detail: true,
            groups: SmallVec::new(),
            page: self.pending_page_break,
        };
        let coarsest_changed = new_keys
            .iter()
            .zip(&self.current_keys)
            .position(|(new, old)| new != old);
        if let Some(start) = coarsest_changed {
            for group in &self.groups[start..] {
                change.groups.push(group.level);
            }
        }
        change
    }
}
