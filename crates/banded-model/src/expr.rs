use serde::{Deserialize, Serialize};

use crate::Value;

/// A report computation descriptor.
///
/// This is a closed tagged union rather than an open host-language term: the
/// engine only ever inspects these shapes, and richer representations can be
/// plugged in behind the engine's evaluator capability instead of extending
/// the enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// A constant value.
    Literal { value: Value },
    /// A single record-field reference.
    Field { name: String },
    /// A nested, relationship-qualified field reference
    /// (e.g. `customer.region` as `["customer", "region"]`).
    Path { segments: Vec<String> },
    /// A reference to another report variable's current value.
    Variable { name: String },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A function-wrapped expression, e.g. `ROUND(amount * rate, 2)`.
    Call { name: String, args: Vec<Expr> },
    /// A list container of sub-expressions (function argument material).
    List { items: Vec<Expr> },
    /// A keyed container of sub-expressions.
    Map { entries: Vec<(String, Expr)> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Concat,
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field { name: name.into() }
    }

    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Path {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Expr::Variable { name: name.into() }
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call<I>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = Expr>,
    {
        Expr::Call {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }
}
