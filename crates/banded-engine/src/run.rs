//! Report compilation and the streaming run driver.
//!
//! [`CompiledReport::compile`] front-loads every configuration check:
//! definition validation, expression analysis, reference validation and
//! cycle detection all happen here, so a run started from a compiled report
//! can only be stopped by its record source or by cancellation. The compiled
//! artifact is immutable and meant to be shared behind an [`Arc`]; each
//! concurrent run owns its own [`ReportRun`] state.
//!
//! A run makes a single pass over the records. Per record: detect scope
//! changes, apply the implied resets, fold the record into every variable.
//! Recoverable evaluation failures are collected on the run (capped, see
//! [`DEFAULT_FAULT_LOG_LIMIT`]); record-source errors abort the run and
//! surface to the caller unchanged.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use banded_model::{Record, ReportDefinition, Value};
use serde::Serialize;

use crate::accum::VariableAccumulator;
use crate::error::{ConfigError, RunFault};
use crate::eval::Evaluator;
use crate::graph::{collect_variable_refs, AnalysisError, DependencyGraph, EvaluationOrder};
use crate::scope::{ScopeChange, ScopeTracker};

/// Ceiling on faults kept per run; overflow is counted, not stored.
pub const DEFAULT_FAULT_LOG_LIMIT: usize = 1024;

/// A validated report definition with its resolved evaluation order.
#[derive(Debug, Clone)]
pub struct CompiledReport {
    definition: ReportDefinition,
    graph: DependencyGraph,
    order: EvaluationOrder,
}

impl CompiledReport {
    /// Validates `definition` and resolves the variable evaluation order.
    pub fn compile(definition: ReportDefinition) -> Result<Self, ConfigError> {
        definition.validate()?;
        for group in &definition.groups {
            collect_variable_refs(&group.expression).map_err(|source| {
                ConfigError::Analysis(AnalysisError::Group {
                    name: group.name.clone(),
                    source,
                })
            })?;
        }
        let graph = DependencyGraph::build(&definition.variables)?;
        graph.validate()?;
        let order = graph.resolve_order()?;
        Ok(Self {
            definition,
            graph,
            order,
        })
    }

    #[must_use]
    pub fn definition(&self) -> &ReportDefinition {
        &self.definition
    }

    /// The reference graph, for report tooling.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The per-record variable evaluation order.
    #[must_use]
    pub fn order(&self) -> &EvaluationOrder {
        &self.order
    }
}

/// Cooperative cancellation flag, shareable across threads.
///
/// Clones observe the same flag. Cancelling takes effect between records;
/// the record being processed always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The record source was exhausted.
    Completed,
    /// The cancellation token fired between records.
    Cancelled,
}

/// Result of a finished (or cancelled) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub records_processed: u64,
    /// Final variable values, keyed by name.
    pub values: BTreeMap<String, Value>,
    /// Faults absorbed during the run, oldest first, capped at the run's
    /// fault log limit.
    pub faults: Vec<RunFault>,
    /// Faults dropped after the log filled up.
    pub faults_dropped: u64,
}

/// Mutable state of one pass over a record stream.
///
/// Owns a scope tracker and a variable accumulator initialized from the
/// compiled report. Drive it either record by record with
/// [`ReportRun::process_record`] (inspecting values between records) or in
/// one call with [`ReportRun::run`].
#[derive(Debug)]
pub struct ReportRun<E> {
    compiled: Arc<CompiledReport>,
    evaluator: E,
    tracker: ScopeTracker,
    accumulator: VariableAccumulator,
    cancel: CancelToken,
    faults: Vec<RunFault>,
    faults_dropped: u64,
    fault_log_limit: usize,
    records_processed: u64,
}

impl<E: Evaluator> ReportRun<E> {
    #[must_use]
    pub fn new(compiled: Arc<CompiledReport>, evaluator: E) -> Self {
        let tracker = ScopeTracker::new(compiled.definition.groups.clone());
        let accumulator =
            VariableAccumulator::from_parts(&compiled.definition.variables, &compiled.order);
        Self {
            compiled,
            evaluator,
            tracker,
            accumulator,
            cancel: CancelToken::new(),
            faults: Vec::new(),
            faults_dropped: 0,
            fault_log_limit: DEFAULT_FAULT_LOG_LIMIT,
            records_processed: 0,
        }
    }

    /// Caps the number of faults kept in memory for this run.
    #[must_use]
    pub fn with_fault_log_limit(mut self, limit: usize) -> Self {
        self.fault_log_limit = limit;
        self
    }

    /// Uses `token` for cancellation, sharing it with the caller.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// A clone of this run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn compiled(&self) -> &CompiledReport {
        &self.compiled
    }

    #[must_use]
    pub fn records_processed(&self) -> u64 {
        self.records_processed
    }

    /// Scope tracker state (break counts, current keys).
    #[must_use]
    pub fn tracker(&self) -> &ScopeTracker {
        &self.tracker
    }

    /// Current variable values.
    #[must_use]
    pub fn accumulator(&self) -> &VariableAccumulator {
        &self.accumulator
    }

    /// Faults absorbed so far.
    #[must_use]
    pub fn faults(&self) -> &[RunFault] {
        &self.faults
    }

    /// Signals a page boundary; the next record's scope change reports it.
    pub fn notify_page_break(&mut self) {
        self.tracker.notify_page_break();
    }

    /// Computes the scope change `record` would produce, without consuming
    /// it. Lets the banding layer render group footers with current values
    /// before the breaking record is folded.
    #[must_use]
    pub fn peek_record(&self, record: &Record) -> ScopeChange {
        self.tracker.peek(record, &self.evaluator)
    }

    /// Processes one record: scope detection, resets, variable folding.
    ///
    /// Returns the scope change the record produced, as of before its
    /// values were folded.
    pub fn process_record(&mut self, record: &Record) -> ScopeChange {
        let record_index = self.records_processed;
        let change = self.tracker.next(record, &self.evaluator);
        for kind in self.tracker.take_faults() {
            self.push_fault(RunFault { record_index, kind });
        }
        self.accumulator.handle_change(&change);
        for kind in self.accumulator.update(record, &self.evaluator) {
            self.push_fault(RunFault { record_index, kind });
        }
        self.records_processed += 1;
        change
    }

    /// Drains `source` through this run.
    ///
    /// Source errors abort immediately and surface unchanged; state up to
    /// the failing pull stays inspectable through the accessors.
    /// Cancellation is checked between records and yields a summary with
    /// [`RunOutcome::Cancelled`].
    pub fn run<I, SE>(&mut self, source: I) -> Result<RunSummary, SE>
    where
        I: IntoIterator<Item = Result<Record, SE>>,
    {
        let mut source = source.into_iter();
        loop {
            // Checked before each pull so a cancelled run stops without
            // touching the source again.
            if self.cancel.is_cancelled() {
                return Ok(self.summary(RunOutcome::Cancelled));
            }
            let Some(item) = source.next() else { break };
            let record = item?;
            self.process_record(&record);
        }
        Ok(self.summary(RunOutcome::Completed))
    }

    /// Snapshot of the run's results.
    #[must_use]
    pub fn summary(&self, outcome: RunOutcome) -> RunSummary {
        RunSummary {
            outcome,
            records_processed: self.records_processed,
            values: self.accumulator.values(),
            faults: self.faults.clone(),
            faults_dropped: self.faults_dropped,
        }
    }

    fn push_fault(&mut self, fault: RunFault) {
        if self.faults.len() < self.fault_log_limit {
            self.faults.push(fault);
        } else {
            if self.faults_dropped == 0 {
                log::warn!(
                    "fault log limit {} reached, further faults are counted only",
                    self.fault_log_limit
                );
            }
            self.faults_dropped += 1;
        }
    }
}
