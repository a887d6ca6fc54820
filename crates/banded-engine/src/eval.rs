//! Expression evaluation.
//!
//! The engine never evaluates expressions directly; everything goes through
//! the [`Evaluator`] capability so hosts can plug in their own expression
//! language. [`TreeEvaluator`] is the default implementation, a straight
//! tree walk over [`Expr`] with strict typing: operand kind mismatches are
//! reported as errors instead of being coerced.

use std::collections::BTreeMap;

use banded_model::{BinaryOp, Expr, Record, UnaryOp, Value};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::graph::MAX_EXPR_DEPTH;

/// Read access to current variable values during evaluation.
///
/// Implemented by the variable accumulator; also implemented for
/// `BTreeMap<String, Value>` so hosts and tests can evaluate expressions
/// against a fixed set of values.
pub trait VariableResolver {
    fn variable_value(&self, name: &str) -> Option<&Value>;
}

impl VariableResolver for BTreeMap<String, Value> {
    fn variable_value(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Resolver for contexts where no variables are in scope.
///
/// Group key expressions are evaluated against this, so a `Variable` node in
/// a group expression fails with [`EvalError::UnknownVariable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVariables;

impl VariableResolver for NoVariables {
    fn variable_value(&self, _name: &str) -> Option<&Value> {
        None
    }
}

/// Why an expression failed to produce a value.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalError {
    #[error("record has no field {field}")]
    MissingField { field: String },
    #[error("record path {path} does not resolve")]
    MissingPath { path: String },
    #[error("unknown variable {name}")]
    UnknownVariable { name: String },
    #[error("unknown function {name}")]
    UnknownFunction { name: String },
    #[error("{function} expects {expected} arguments, got {got}")]
    Arity {
        function: String,
        expected: &'static str,
        got: usize,
    },
    #[error("expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{function}: {message}")]
    InvalidArgument { function: String, message: String },
    #[error("expression nests deeper than {max} levels")]
    DepthExceeded { max: usize },
}

/// Capability for evaluating one expression against one record.
///
/// Implementations must be pure: same expression, record and variable values
/// produce the same result, with no side effects on the record.
pub trait Evaluator {
    fn evaluate(
        &self,
        expr: &Expr,
        record: &Record,
        variables: &dyn VariableResolver,
    ) -> Result<Value, EvalError>;
}

impl<T: Evaluator + ?Sized> Evaluator for &T {
    fn evaluate(
        &self,
        expr: &Expr,
        record: &Record,
        variables: &dyn VariableResolver,
    ) -> Result<Value, EvalError> {
        (**self).evaluate(expr, record, variables)
    }
}

/// Default evaluator: recursive walk over the expression tree.
///
/// Recursion depth is capped at [`MAX_EXPR_DEPTH`] so expressions that were
/// never admitted through dependency analysis still cannot overflow the
/// stack. `AND`/`OR`, `IF` and `COALESCE` evaluate lazily; everything else is
/// strict.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeEvaluator;

impl Evaluator for TreeEvaluator {
    fn evaluate(
        &self,
        expr: &Expr,
        record: &Record,
        variables: &dyn VariableResolver,
    ) -> Result<Value, EvalError> {
        self.eval(expr, record, variables, 1)
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Number(_) => "number",
        Value::Text(_) => "text",
        Value::Bool(_) => "bool",
        Value::Date(_) => "date",
        Value::DateTime(_) => "datetime",
        Value::Record(_) => "record",
    }
}

fn number(value: &Value) -> Result<f64, EvalError> {
    value.as_number().ok_or(EvalError::TypeMismatch {
        expected: "number",
        found: kind_name(value),
    })
}

fn boolean(value: &Value) -> Result<bool, EvalError> {
    value.as_bool().ok_or(EvalError::TypeMismatch {
        expected: "bool",
        found: kind_name(value),
    })
}

impl TreeEvaluator {
    fn eval(
        &self,
        expr: &Expr,
        record: &Record,
        variables: &dyn VariableResolver,
        depth: usize,
    ) -> Result<Value, EvalError> {
        if depth > MAX_EXPR_DEPTH {
            return Err(EvalError::DepthExceeded {
                max: MAX_EXPR_DEPTH,
            });
        }
        match expr {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Field { name } => record
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::MissingField {
                    field: name.clone(),
                }),
            Expr::Path { segments } => {
                record
                    .get_path(segments)
                    .cloned()
                    .ok_or_else(|| EvalError::MissingPath {
                        path: segments.join("."),
                    })
            }
            Expr::Variable { name } => variables
                .variable_value(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownVariable { name: name.clone() }),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, record, variables, depth + 1)?;
                match op {
                    UnaryOp::Neg => Ok(Value::Number(-number(&value)?)),
                    UnaryOp::Not => Ok(Value::Bool(!boolean(&value)?)),
                }
            }
            Expr::Binary { op, left, right } => {
                self.eval_binary(*op, left, right, record, variables, depth)
            }
            Expr::Call { name, args } => self.call(name, args, record, variables, depth),
            Expr::List { .. } => Err(EvalError::TypeMismatch {
                expected: "scalar expression",
                found: "list literal",
            }),
            Expr::Map { .. } => Err(EvalError::TypeMismatch {
                expected: "scalar expression",
                found: "map literal",
            }),
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        record: &Record,
        variables: &dyn VariableResolver,
        depth: usize,
    ) -> Result<Value, EvalError> {
        // AND/OR short-circuit: the right side is not evaluated when the left
        // side decides the result.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let lhs = boolean(&self.eval(left, record, variables, depth + 1)?)?;
            let decided = match op {
                BinaryOp::And => !lhs,
                _ => lhs,
            };
            if decided {
                return Ok(Value::Bool(lhs));
            }
            let rhs = boolean(&self.eval(right, record, variables, depth + 1)?)?;
            return Ok(Value::Bool(rhs));
        }

        let lhs = self.eval(left, record, variables, depth + 1)?;
        let rhs = self.eval(right, record, variables, depth + 1)?;
        match op {
            BinaryOp::Add => Ok(Value::Number(number(&lhs)? + number(&rhs)?)),
            BinaryOp::Sub => Ok(Value::Number(number(&lhs)? - number(&rhs)?)),
            BinaryOp::Mul => Ok(Value::Number(number(&lhs)? * number(&rhs)?)),
            BinaryOp::Div => {
                let dividend = number(&lhs)?;
                let divisor = number(&rhs)?;
                if divisor == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(Value::Number(dividend / divisor))
            }
            // Comparisons follow the cross-type total order of
            // `Value::compare`, so mixed kinds order by kind instead of
            // erroring.
            BinaryOp::Eq => Ok(Value::Bool(lhs.compare(&rhs).is_eq())),
            BinaryOp::Ne => Ok(Value::Bool(!lhs.compare(&rhs).is_eq())),
            BinaryOp::Lt => Ok(Value::Bool(lhs.compare(&rhs).is_lt())),
            BinaryOp::Le => Ok(Value::Bool(lhs.compare(&rhs).is_le())),
            BinaryOp::Gt => Ok(Value::Bool(lhs.compare(&rhs).is_gt())),
            BinaryOp::Ge => Ok(Value::Bool(lhs.compare(&rhs).is_ge())),
            BinaryOp::Concat => Ok(Value::Text(format!(
                "{}{}",
                lhs.display_string(),
                rhs.display_string()
            ))),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn call(
        &self,
        name: &str,
        args: &[Expr],
        record: &Record,
        variables: &dyn VariableResolver,
        depth: usize,
    ) -> Result<Value, EvalError> {
        let arity = |expected: &'static str| EvalError::Arity {
            function: name.to_ascii_uppercase(),
            expected,
            got: args.len(),
        };
        let eval_arg = |arg: &Expr| self.eval(arg, record, variables, depth + 1);

        match name.to_ascii_uppercase().as_str() {
            "ABS" => {
                let [arg] = args else { return Err(arity("1")) };
                Ok(Value::Number(number(&eval_arg(arg)?)?.abs()))
            }
            "ROUND" => {
                let (value, digits) = match args {
                    [value] => (value, 0i32),
                    [value, digits] => {
                        let d = number(&eval_arg(digits)?)?;
                        if d.fract() != 0.0 || !(-15.0..=15.0).contains(&d) {
                            return Err(EvalError::InvalidArgument {
                                function: "ROUND".to_string(),
                                message: format!("digit count {d} is not an integer in -15..=15"),
                            });
                        }
                        (value, d as i32)
                    }
                    _ => return Err(arity("1 or 2")),
                };
                let x = number(&eval_arg(value)?)?;
                let factor = 10f64.powi(digits);
                Ok(Value::Number((x * factor).round() / factor))
            }
            "MIN" | "MAX" => {
                if args.is_empty() {
                    return Err(arity("at least 1"));
                }
                let want_min = name.eq_ignore_ascii_case("min");
                let mut best: Option<Value> = None;
                for arg in args {
                    let value = eval_arg(arg)?;
                    if value.is_null() {
                        continue;
                    }
                    best = Some(match best {
                        None => value,
                        Some(current) => {
                            let keep_new = if want_min {
                                value.compare(&current).is_lt()
                            } else {
                                value.compare(&current).is_gt()
                            };
                            if keep_new {
                                value
                            } else {
                                current
                            }
                        }
                    });
                }
                Ok(best.unwrap_or(Value::Null))
            }
            "COALESCE" => {
                if args.is_empty() {
                    return Err(arity("at least 1"));
                }
                for arg in args {
                    let value = eval_arg(arg)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            "CONCAT" => {
                if args.is_empty() {
                    return Err(arity("at least 1"));
                }
                let mut out = String::new();
                for arg in args {
                    out.push_str(&eval_arg(arg)?.display_string());
                }
                Ok(Value::Text(out))
            }
            "IF" => {
                let (cond, then_arm, else_arm) = match args {
                    [cond, then_arm] => (cond, then_arm, None),
                    [cond, then_arm, else_arm] => (cond, then_arm, Some(else_arm)),
                    _ => return Err(arity("2 or 3")),
                };
                if boolean(&eval_arg(cond)?)? {
                    eval_arg(then_arm)
                } else {
                    match else_arm {
                        Some(arm) => eval_arg(arm),
                        None => Ok(Value::Null),
                    }
                }
            }
            "DATE" => {
                let [y, m, d] = args else { return Err(arity("3")) };
                let year = number(&eval_arg(y)?)?;
                let month = number(&eval_arg(m)?)?;
                let day = number(&eval_arg(d)?)?;
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .map(Value::Date)
                    .ok_or_else(|| EvalError::InvalidArgument {
                        function: "DATE".to_string(),
                        message: format!("no calendar date {year}-{month}-{day}"),
                    })
            }
            _ => Err(EvalError::UnknownFunction {
                name: name.to_string(),
            }),
        }
    }
}
