//! Variable-reference extraction from report expressions.
//!
//! Dependency analysis only needs the set of `Variable` nodes an expression
//! mentions. The walk is iterative with an explicit stack so hostile or
//! machine-generated expression trees cannot overflow the call stack, and it
//! rejects trees nested past [`MAX_EXPR_DEPTH`] instead of walking them.

use std::collections::BTreeSet;

use banded_model::Expr;
use thiserror::Error;

/// Maximum nesting depth accepted by the reference walk.
///
/// Expressions deeper than this are rejected at analysis time, which also
/// bounds evaluator recursion for every expression admitted into a compiled
/// report.
pub const MAX_EXPR_DEPTH: usize = 1024;

/// Structural defects found while walking an expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedExprError {
    #[error("expression nests deeper than {max} levels")]
    DepthExceeded { max: usize },
    #[error("variable reference with an empty name")]
    EmptyVariableRef,
}

/// Collects the names of all variables referenced anywhere in `expr`.
///
/// The result is sorted and de-duplicated. References inside function
/// arguments, list items and map values are all found; field and path
/// references are not reported (they resolve against the record, not against
/// other variables).
pub fn collect_variable_refs(expr: &Expr) -> Result<BTreeSet<String>, MalformedExprError> {
    let mut refs = BTreeSet::new();
    // (node, depth) worklist; depth counts nodes from the root, root = 1.
    let mut stack: Vec<(&Expr, usize)> = vec![(expr, 1)];
    while let Some((node, depth)) = stack.pop() {
        if depth > MAX_EXPR_DEPTH {
            return Err(MalformedExprError::DepthExceeded {
                max: MAX_EXPR_DEPTH,
            });
        }
        match node {
            Expr::Literal { .. } | Expr::Field { .. } | Expr::Path { .. } => {}
            Expr::Variable { name } => {
                if name.is_empty() {
                    return Err(MalformedExprError::EmptyVariableRef);
                }
                refs.insert(name.clone());
            }
            Expr::Unary { expr, .. } => stack.push((expr, depth + 1)),
            Expr::Binary { left, right, .. } => {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    stack.push((arg, depth + 1));
                }
            }
            Expr::List { items } => {
                for item in items {
                    stack.push((item, depth + 1));
                }
            }
            Expr::Map { entries } => {
                for (_, value) in entries {
                    stack.push((value, depth + 1));
                }
            }
        }
    }
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use banded_model::{BinaryOp, Expr};
    use pretty_assertions::assert_eq;

    fn names(refs: &BTreeSet<String>) -> Vec<&str> {
        refs.iter().map(String::as_str).collect()
    }

    #[test]
    fn finds_refs_in_nested_positions() {
        let expr = Expr::call(
            "IF",
            vec![
                Expr::binary(BinaryOp::Gt, Expr::variable("total"), Expr::literal(100.0)),
                Expr::variable("discounted"),
                Expr::binary(BinaryOp::Add, Expr::field("amount"), Expr::variable("total")),
            ],
        );
        let refs = collect_variable_refs(&expr).unwrap();
        assert_eq!(names(&refs), vec!["discounted", "total"]);
    }

    #[test]
    fn field_and_path_refs_are_not_variables() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::field("amount"),
            Expr::path(["customer", "region"]),
        );
        let refs = collect_variable_refs(&expr).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn duplicate_refs_collapse() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::variable("x"),
            Expr::binary(BinaryOp::Mul, Expr::variable("x"), Expr::variable("x")),
        );
        let refs = collect_variable_refs(&expr).unwrap();
        assert_eq!(names(&refs), vec!["x"]);
    }

    #[test]
    fn empty_variable_name_is_rejected() {
        let expr = Expr::unary(banded_model::UnaryOp::Neg, Expr::variable(""));
        assert_eq!(
            collect_variable_refs(&expr),
            Err(MalformedExprError::EmptyVariableRef)
        );
    }

    #[test]
    fn over_deep_tree_is_rejected_without_overflowing() {
        let mut expr = Expr::literal(1.0);
        for _ in 0..(MAX_EXPR_DEPTH + 8) {
            expr = Expr::unary(banded_model::UnaryOp::Neg, expr);
        }
        assert_eq!(
            collect_variable_refs(&expr),
            Err(MalformedExprError::DepthExceeded {
                max: MAX_EXPR_DEPTH
            })
        );
    }

    #[test]
    fn depth_limit_admits_trees_at_the_boundary() {
        let mut expr = Expr::variable("x");
        // Root plus MAX_EXPR_DEPTH - 1 wrappers lands exactly on the limit.
        for _ in 0..(MAX_EXPR_DEPTH - 1) {
            expr = Expr::unary(banded_model::UnaryOp::Neg, expr);
        }
        assert!(collect_variable_refs(&expr).is_ok());
    }
}
