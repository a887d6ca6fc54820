#![forbid(unsafe_code)]

//! `banded-model` defines the core data structures for banded report
//! definitions.
//!
//! The crate is intentionally self-contained so it can be reused by:
//! - the evaluation engine (dependency analysis, scope tracking, accumulation)
//! - report-validation tooling
//! - IPC/persistence boundaries via `serde` (JSON-safe schema)
//!
//! It holds no evaluation logic: expressions here are declarative descriptors
//! evaluated through the engine's evaluator capability.

mod expr;
mod group;
mod record;
mod report;
mod value;
mod variable;

pub use expr::{BinaryOp, Expr, UnaryOp};
pub use group::{Group, GroupLevel, SortDirection};
pub use record::Record;
pub use report::{DefinitionError, ReportDefinition};
pub use value::{KeyValue, Value};
pub use variable::{ResetPolicy, Variable, VariableKind};
