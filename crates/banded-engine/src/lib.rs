#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Streaming evaluation engine for banded reports.
//!
//! A report declares named [`banded_model::Variable`]s (running aggregates)
//! and hierarchical [`banded_model::Group`]s; the engine turns a sorted
//! record stream into final variable values in a single pass, without ever
//! buffering records.
//!
//! [`CompiledReport::compile`] validates a definition and resolves the
//! variable evaluation order (variables may read each other, so references
//! are extracted, checked for cycles and topologically ordered up front).
//! The compiled report is immutable; share it behind an `Arc` and start any
//! number of concurrent [`ReportRun`]s from it. Each run owns a
//! [`ScopeTracker`] that detects group breaks and page boundaries, and a
//! [`VariableAccumulator`] that folds each record into every variable in
//! dependency order.
//!
//! Expression evaluation goes through the [`Evaluator`] capability;
//! [`TreeEvaluator`] is the built-in implementation. Per-record evaluation
//! failures never abort a run: the affected variable or group key falls back
//! and the failure is collected as a [`RunFault`]. Errors from the record
//! source itself pass through [`ReportRun::run`] unchanged.

pub mod accum;
pub mod error;
pub mod eval;
pub mod graph;
pub mod run;
pub mod scope;

pub use accum::VariableAccumulator;
pub use error::{ConfigError, FaultKind, RunFault};
pub use eval::{EvalError, Evaluator, NoVariables, TreeEvaluator, VariableResolver};
pub use graph::{
    collect_variable_refs, AnalysisError, CycleError, DependencyGraph, EvaluationOrder,
    MalformedExprError, MissingDependencyError, MAX_EXPR_DEPTH,
};
pub use run::{
    CancelToken, CompiledReport, ReportRun, RunOutcome, RunSummary, DEFAULT_FAULT_LOG_LIMIT,
};
pub use scope::{ScopeChange, ScopeTracker};
