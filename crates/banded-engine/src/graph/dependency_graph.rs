//! Variable dependency graph and evaluation ordering.
//!
//! Variables may reference each other, so before a report run starts we build
//! a graph of who-reads-whom and derive a single evaluation order that is
//! reused for every record. Ordering is Kahn's algorithm over in-degrees with
//! a deterministic ready set: when several variables become ready at once they
//! are emitted in declaration order, so the same definition always produces
//! the same order on every platform.
//!
//! Cycle detection runs before ordering and uses an iterative
//! white/gray/black walk with an explicit frame stack, so deep dependency
//! chains cannot overflow the call stack.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use banded_model::Variable;
use serde::Serialize;
use thiserror::Error;

use super::refs::{collect_variable_refs, MalformedExprError};

/// An expression that could not be admitted into dependency analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("cannot analyze expression for variable {name}: {source}")]
    Variable {
        name: String,
        #[source]
        source: MalformedExprError,
    },
    #[error("cannot analyze expression for group {name}: {source}")]
    Group {
        name: String,
        #[source]
        source: MalformedExprError,
    },
}

/// A dependency cycle among variables.
///
/// `path` starts and ends at the same variable and follows reference edges,
/// so `["a", "b", "a"]` means `a` reads `b` and `b` reads `a`. A variable
/// that references itself yields the length-one cycle `["a", "a"]`.
#[derive(Debug, Clone)]
pub struct CycleError {
    pub path: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular variable dependency: ")?;
        for (idx, name) in self.path.iter().enumerate() {
            if idx > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{name}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleError {}

/// Variables whose expressions reference names that were never declared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("undeclared variables referenced: {}", missing.join(", "))]
pub struct MissingDependencyError {
    /// The undeclared names, sorted and de-duplicated.
    pub missing: Vec<String>,
    /// `(referencing variable, missing name)` pairs in declaration order.
    pub referenced_by: Vec<(String, String)>,
}

/// The order in which variables must be evaluated for each record.
///
/// Computed once per compiled report and shared read-only by every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationOrder {
    names: Vec<String>,
}

impl EvaluationOrder {
    /// Variable names, dependencies before their dependents.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Dependency graph over a report's declared variables.
///
/// Nodes are owned in declaration order; edges only connect declared
/// variables. References to names that were never declared are kept aside and
/// surfaced by [`DependencyGraph::validate`], and they never contribute to
/// in-degrees, so ordering stays well-defined even on a graph that fails
/// validation.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Node id -> variable name, in declaration order.
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// Node -> declared variables its expression references.
    references: Vec<Vec<usize>>,
    /// Reverse edges: node -> variables whose expressions reference it.
    dependents: Vec<Vec<usize>>,
    /// Node -> referenced names with no declaration.
    undeclared: Vec<BTreeSet<String>>,
}

impl DependencyGraph {
    /// Builds the graph by extracting variable references from each
    /// expression.
    ///
    /// Variable names are expected to be unique; run
    /// `ReportDefinition::validate` first when the input is untrusted.
    pub fn build(variables: &[Variable]) -> Result<Self, AnalysisError> {
        let mut names = Vec::with_capacity(variables.len());
        let mut index = HashMap::with_capacity(variables.len());
        for (id, var) in variables.iter().enumerate() {
            let prev = index.insert(var.name.clone(), id);
            debug_assert!(prev.is_none(), "duplicate variable name {}", var.name);
            names.push(var.name.clone());
        }

        let mut references = vec![Vec::new(); variables.len()];
        let mut dependents = vec![Vec::new(); variables.len()];
        let mut undeclared = vec![BTreeSet::new(); variables.len()];
        for (id, var) in variables.iter().enumerate() {
            let refs =
                collect_variable_refs(&var.expression).map_err(|source| AnalysisError::Variable {
                    name: var.name.clone(),
                    source,
                })?;
            for name in refs {
                match index.get(&name) {
                    Some(&target) => references[id].push(target),
                    None => {
                        undeclared[id].insert(name);
                    }
                }
            }
            // collect_variable_refs returns names sorted; re-key to ids in
            // declaration order so edge walks are deterministic.
            references[id].sort_unstable();
        }

        for (id, refs) in references.iter().enumerate() {
            for &target in refs {
                dependents[target].push(id);
            }
        }
        for deps in &mut dependents {
            deps.sort_unstable();
        }

        Ok(Self {
            names,
            index,
            references,
            dependents,
            undeclared,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Variable names in declaration order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Declared variables referenced by `name`'s expression, in declaration
    /// order. `None` when `name` is not a declared variable.
    #[must_use]
    pub fn references_of(&self, name: &str) -> Option<Vec<&str>> {
        let id = *self.index.get(name)?;
        Some(
            self.references[id]
                .iter()
                .map(|&r| self.names[r].as_str())
                .collect(),
        )
    }

    /// Variables whose expressions reference `name`, in declaration order.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Option<Vec<&str>> {
        let id = *self.index.get(name)?;
        Some(
            self.dependents[id]
                .iter()
                .map(|&d| self.names[d].as_str())
                .collect(),
        )
    }

    /// Fails if any expression references a name with no declaration.
    pub fn validate(&self) -> Result<(), MissingDependencyError> {
        let mut missing = BTreeSet::new();
        let mut referenced_by = Vec::new();
        for (id, unknown) in self.undeclared.iter().enumerate() {
            for name in unknown {
                missing.insert(name.clone());
                referenced_by.push((self.names[id].clone(), name.clone()));
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        Err(MissingDependencyError {
            missing: missing.into_iter().collect(),
            referenced_by,
        })
    }

    /// Looks for a reference cycle, returning the first one found.
    ///
    /// Deterministic: the walk starts from each variable in declaration order
    /// and expands references in declaration order, so a given graph always
    /// reports the same cycle.
    #[must_use]
    pub fn detect_cycle(&self) -> Option<CycleError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        struct Frame {
            node: usize,
            idx: usize,
        }

        let mut color = vec![Color::White; self.names.len()];
        let mut stack: Vec<usize> = Vec::new();
        let mut pos_in_stack: HashMap<usize, usize> = HashMap::new();

        for start in 0..self.names.len() {
            if color[start] != Color::White {
                continue;
            }

            let mut frames = vec![Frame { node: start, idx: 0 }];
            stack.push(start);
            pos_in_stack.insert(start, stack.len() - 1);
            color[start] = Color::Gray;

            while let Some(frame) = frames.last_mut() {
                let neighbors = &self.references[frame.node];
                if frame.idx >= neighbors.len() {
                    color[frame.node] = Color::Black;
                    pos_in_stack.remove(&frame.node);
                    stack.pop();
                    frames.pop();
                    continue;
                }

                let next = neighbors[frame.idx];
                frame.idx += 1;

                match color[next] {
                    Color::White => {
                        color[next] = Color::Gray;
                        stack.push(next);
                        pos_in_stack.insert(next, stack.len() - 1);
                        frames.push(Frame { node: next, idx: 0 });
                    }
                    Color::Gray => {
                        let start_idx = *pos_in_stack.get(&next).unwrap_or(&0);
                        let mut path: Vec<String> =
                            stack[start_idx..].iter().map(|&n| self.names[n].clone()).collect();
                        path.push(self.names[next].clone());
                        return Some(CycleError { path });
                    }
                    Color::Black => {}
                }
            }
        }

        None
    }

    /// Computes the evaluation order for all variables.
    ///
    /// Runs cycle detection first and fails fast; a partial order is never
    /// returned. Ties are broken by declaration order.
    pub fn resolve_order(&self) -> Result<EvaluationOrder, CycleError> {
        if let Some(err) = self.detect_cycle() {
            return Err(err);
        }

        let mut remaining: Vec<usize> = self.references.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.names.len())
            .filter(|&id| remaining[id] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(id) = ready.pop_first() {
            order.push(self.names[id].clone());
            for &dep in &self.dependents[id] {
                remaining[dep] = remaining[dep].saturating_sub(1);
                if remaining[dep] == 0 {
                    ready.insert(dep);
                }
            }
        }

        debug_assert_eq!(order.len(), self.names.len(), "acyclic graph must drain");
        Ok(EvaluationOrder { names: order })
    }

    /// Computes the evaluation order for `changed` plus everything that
    /// transitively depends on a changed variable.
    ///
    /// Names not present in the graph are ignored. The result is a
    /// subsequence of [`DependencyGraph::resolve_order`] restricted to the
    /// affected set.
    pub fn resolve_partial_order<I, S>(&self, changed: I) -> Result<EvaluationOrder, CycleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut affected: HashSet<usize> = HashSet::new();
        let mut queue: Vec<usize> = Vec::new();
        for name in changed {
            if let Some(&id) = self.index.get(name.as_ref()) {
                if affected.insert(id) {
                    queue.push(id);
                }
            }
        }
        while let Some(id) = queue.pop() {
            for &dep in &self.dependents[id] {
                if affected.insert(dep) {
                    queue.push(dep);
                }
            }
        }

        let mut remaining: HashMap<usize, usize> = HashMap::with_capacity(affected.len());
        for &id in &affected {
            let deg = self.references[id]
                .iter()
                .filter(|r| affected.contains(r))
                .count();
            remaining.insert(id, deg);
        }

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .filter_map(|(&id, &deg)| (deg == 0).then_some(id))
            .collect();

        let mut order = Vec::with_capacity(affected.len());
        while let Some(id) = ready.pop_first() {
            order.push(self.names[id].clone());
            for &dep in &self.dependents[id] {
                if let Some(deg) = remaining.get_mut(&dep) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.insert(dep);
                    }
                }
            }
        }

        if order.len() != affected.len() {
            return Err(self.detect_cycle().unwrap_or(CycleError { path: Vec::new() }));
        }
        Ok(EvaluationOrder { names: order })
    }

    /// True when `dependent`'s value can be affected by `dependency`, that
    /// is, `dependency` is reachable from `dependent` over reference edges.
    ///
    /// A variable does not depend on itself unless it sits on a cycle.
    #[must_use]
    pub fn depends_on(&self, dependent: &str, dependency: &str) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(dependent), self.index.get(dependency))
        else {
            return false;
        };

        let mut visited: HashSet<usize> = HashSet::new();
        let mut queue: Vec<usize> = self.references[from].clone();
        while let Some(id) = queue.pop() {
            if id == to {
                return true;
            }
            if visited.insert(id) {
                queue.extend(self.references[id].iter().copied());
            }
        }
        false
    }
}
