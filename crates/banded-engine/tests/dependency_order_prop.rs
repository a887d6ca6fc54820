//! Property tests for dependency ordering over randomized graphs.

use std::collections::HashSet;

use banded_engine::DependencyGraph;
use banded_model::{BinaryOp, Expr, ResetPolicy, Variable, VariableKind};
use proptest::prelude::*;

fn var_name(id: usize) -> String {
    format!("v{id}")
}

/// Builds a variable whose expression references exactly the given ids.
fn variable_reading(id: usize, refs: &[usize]) -> Variable {
    let mut expr = Expr::literal(0.0);
    for &target in refs {
        expr = Expr::binary(BinaryOp::Add, expr, Expr::variable(var_name(target)));
    }
    Variable::new(var_name(id), VariableKind::Custom, expr, ResetPolicy::Report)
}

/// Random DAG: node `i` may only reference nodes declared before it, encoded
/// as one bitmask per node. Acyclic by construction.
fn arb_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..10).prop_flat_map(|n| {
        proptest::collection::vec(any::<u16>(), n).prop_map(|masks| {
            masks
                .iter()
                .enumerate()
                .map(|(i, mask)| (0..i).filter(|j| mask & (1 << j) != 0).collect())
                .collect()
        })
    })
}

fn build_graph(adjacency: &[Vec<usize>]) -> DependencyGraph {
    let variables: Vec<Variable> = adjacency
        .iter()
        .enumerate()
        .map(|(id, refs)| variable_reading(id, refs))
        .collect();
    DependencyGraph::build(&variables).expect("closed-form expressions always analyze")
}

proptest! {
    #[test]
    fn order_is_a_permutation_respecting_every_edge(adjacency in arb_dag()) {
        let graph = build_graph(&adjacency);
        let order = graph.resolve_order().expect("constructed graphs are acyclic");

        let position: std::collections::HashMap<&str, usize> = order
            .names()
            .iter()
            .enumerate()
            .map(|(pos, name)| (name.as_str(), pos))
            .collect();
        prop_assert_eq!(position.len(), adjacency.len());

        for (id, refs) in adjacency.iter().enumerate() {
            let dependent = var_name(id);
            for &target in refs {
                let dependency = var_name(target);
                prop_assert!(
                    position[dependency.as_str()] < position[dependent.as_str()],
                    "{dependency} must be evaluated before {dependent}"
                );
            }
        }
    }

    #[test]
    fn injected_back_edge_is_reported_as_a_real_cycle(
        adjacency in arb_dag(),
        pick in any::<(prop::sample::Index, prop::sample::Index)>(),
    ) {
        // Close a loop: make some earlier node `a` reference a later node `b`
        // that (directly) references `a` back.
        let mut adjacency = adjacency;
        let n = adjacency.len();
        let a = pick.0.index(n.saturating_sub(1));
        let b = a + 1 + pick.1.index(n - a - 1);
        if !adjacency[b].contains(&a) {
            adjacency[b].push(a);
        }
        adjacency[a].push(b);

        let graph = build_graph(&adjacency);
        let err = graph.resolve_order().expect_err("graph contains a cycle");

        prop_assert!(err.path.len() >= 2);
        prop_assert_eq!(err.path.first(), err.path.last());
        for pair in err.path.windows(2) {
            let refs = graph
                .references_of(&pair[0])
                .expect("cycle names are declared variables");
            prop_assert!(
                refs.contains(&pair[1].as_str()),
                "{} does not reference {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn partial_order_is_the_affected_subsequence_of_the_full_order(
        adjacency in arb_dag(),
        seed_mask in any::<u16>(),
    ) {
        let graph = build_graph(&adjacency);
        let full = graph.resolve_order().expect("constructed graphs are acyclic");

        let changed: Vec<String> = (0..adjacency.len())
            .filter(|i| seed_mask & (1 << i) != 0)
            .map(var_name)
            .collect();
        let partial = graph
            .resolve_partial_order(changed.iter())
            .expect("subset of an acyclic graph is acyclic");

        // Subsequence of the full order.
        let mut cursor = partial.names().iter();
        let mut pending = cursor.next();
        for name in full.names() {
            if pending == Some(name) {
                pending = cursor.next();
            }
        }
        prop_assert_eq!(pending, None, "partial order must follow the full order");

        // Exactly the changed set plus its transitive dependents.
        let expected: HashSet<String> = graph
            .names()
            .iter()
            .filter(|name| {
                changed
                    .iter()
                    .any(|c| c == *name || graph.depends_on(name.as_str(), c))
            })
            .cloned()
            .collect();
        let got: HashSet<String> = partial.names().iter().cloned().collect();
        prop_assert_eq!(got, expected);
    }
}
