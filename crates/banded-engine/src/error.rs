//! Engine-level error taxonomy.
//!
//! Failures split into two families. [`ConfigError`] covers everything wrong
//! with a report definition; all of it is detected at compile time and a
//! compiled report never raises one mid-run. [`RunFault`]s are per-record
//! evaluation failures absorbed during a run: the affected variable or group
//! key falls back, the record keeps flowing, and the fault is logged on the
//! run for inspection. Record-source errors belong to the host and pass
//! through the run loop untouched.

use banded_model::DefinitionError;
use serde::Serialize;
use thiserror::Error;

use crate::eval::EvalError;
use crate::graph::{AnalysisError, CycleError, MissingDependencyError};

/// A report definition that cannot be compiled.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    MissingDependency(#[from] MissingDependencyError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Where a recoverable evaluation failure hit.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "site", rename_all = "snake_case")]
pub enum FaultKind {
    /// A variable's expression failed; the variable kept its previous value
    /// for this record.
    #[error("variable {variable}: {error}")]
    Variable { variable: String, error: EvalError },
    /// A group's key expression failed; the key was treated as null for
    /// break detection.
    #[error("group {group} key: {error}")]
    GroupKey { group: String, error: EvalError },
}

/// One absorbed failure, tagged with the record it happened on.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("record {record_index}: {kind}")]
pub struct RunFault {
    /// Zero-based index of the record being processed when the failure hit.
    pub record_index: u64,
    pub kind: FaultKind,
}
