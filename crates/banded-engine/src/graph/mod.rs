//! Dependency analysis: reference extraction, graph construction, ordering.

mod dependency_graph;
mod refs;

pub use dependency_graph::{
    AnalysisError, CycleError, DependencyGraph, EvaluationOrder, MissingDependencyError,
};
pub use refs::{collect_variable_refs, MalformedExprError, MAX_EXPR_DEPTH};
