//! Condition evaluation against composed rows: the in-memory fallback for
//! `where`, and the only path for `having`.
//!
//! Subquery operands never reach this module; the execution engine
//! materializes them into literal lists first.

use std::collections::HashSet;

use serde_json::Value;

use crate::ast::{ComparisonOp, ConditionNode, Expression, Literal, Operand};
use crate::error::{Error, Result};
use crate::executor::helpers::{compare_values, equal_values, like_to_regex, pluck};
use crate::functions::FunctionRegistry;

/// Evaluation scope for one row. `group` carries the group's member rows
/// when evaluating `having`, so aggregate calls can fold over them.
pub(crate) struct EvalContext<'a> {
    pub functions: &'a FunctionRegistry,
    pub group: Option<&'a [Value]>,
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(functions: &'a FunctionRegistry) -> Self {
        Self {
            functions,
            group: None,
        }
    }

    pub(crate) fn for_group(functions: &'a FunctionRegistry, group: &'a [Value]) -> Self {
        Self {
            functions,
            group: Some(group),
        }
    }
}

/// Evaluate an expression against one composed row. Missing fields read as
/// null here; the missing-field contract is enforced by the engine over the
/// whole fetched set, not per row.
pub(crate) fn evaluate_expression(
    expr: &Expression,
    row: &Value,
    ctx: &EvalContext,
) -> Result<Value> {
    match expr {
        Expression::Literal(lit) => Ok(lit.to_value()),
        Expression::Field(path) => Ok(pluck(row, path).cloned().unwrap_or(Value::Null)),
        Expression::FunctionCall { name, args } => {
            if ctx.functions.is_aggregate(name) {
                let Some(members) = ctx.group else {
                    return Err(Error::Execution(format!(
                        "Aggregate function {}() used outside an aggregate query",
                        name
                    )));
                };
                let column = aggregate_column(name, args, members, ctx.functions)?;
                ctx.functions.call(name, &column)
            } else {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(evaluate_expression(arg, row, ctx)?);
                }
                ctx.functions.call(name, &evaluated)
            }
        }
    }
}

/// Collect the per-member column an aggregate folds over. A zero-argument
/// aggregate (`count()`) counts members.
pub(crate) fn aggregate_column(
    name: &str,
    args: &[Expression],
    members: &[Value],
    functions: &FunctionRegistry,
) -> Result<Vec<Value>> {
    match args {
        [] => Ok(members.iter().map(|_| Value::Bool(true)).collect()),
        [arg] => {
            let ctx = EvalContext::new(functions);
            members
                .iter()
                .map(|m| evaluate_expression(arg, m, &ctx))
                .collect()
        }
        _ => Err(Error::Execution(format!(
            "{}() takes at most one argument, got {}",
            name,
            args.len()
        ))),
    }
}

/// Evaluate a condition tree against one composed row.
pub(crate) fn evaluate_condition(
    node: &ConditionNode,
    row: &Value,
    ctx: &EvalContext,
) -> Result<bool> {
    match node {
        ConditionNode::And(l, r) => {
            Ok(evaluate_condition(l, row, ctx)? && evaluate_condition(r, row, ctx)?)
        }
        ConditionNode::Or(l, r) => {
            Ok(evaluate_condition(l, row, ctx)? || evaluate_condition(r, row, ctx)?)
        }
        // Runtime boolean flip; double negation executes twice.
        ConditionNode::Not(inner) => Ok(!evaluate_condition(inner, row, ctx)?),
        ConditionNode::Comparison { op, left, right } => {
            evaluate_comparison(*op, left, right, row, ctx)
        }
    }
}

fn operand_value(operand: &Operand, row: &Value, ctx: &EvalContext) -> Result<Value> {
    match operand {
        Operand::Expr(expr) => evaluate_expression(expr, row, ctx),
        Operand::List(_) => Err(Error::Execution(
            "List operand is only valid on the right of in/includes".to_string(),
        )),
        Operand::Subquery(_) => Err(Error::Execution(
            "Subquery operand was not materialized before evaluation".to_string(),
        )),
    }
}

fn operand_list(operand: &Operand, op: ComparisonOp) -> Result<&[Literal]> {
    match operand {
        Operand::List(items) => Ok(items),
        _ => Err(Error::Execution(format!(
            "{:?} requires a literal list on the right",
            op
        ))),
    }
}

fn evaluate_comparison(
    op: ComparisonOp,
    left: &Operand,
    right: &Operand,
    row: &Value,
    ctx: &EvalContext,
) -> Result<bool> {
    use ComparisonOp::*;

    match op {
        Eq | Ne => {
            let l = operand_value(left, row, ctx)?;
            let r = operand_value(right, row, ctx)?;
            let eq = equal_values(&l, &r);
            Ok(if op == Eq { eq } else { !eq })
        }
        Lt | Le | Gt | Ge => {
            let l = operand_value(left, row, ctx)?;
            let r = operand_value(right, row, ctx)?;
            // A null operand makes an ordering comparison false.
            if l.is_null() || r.is_null() {
                return Ok(false);
            }
            Ok(match (compare_values(&l, &r), op) {
                (Some(ord), Lt) => ord.is_lt(),
                (Some(ord), Le) => ord.is_le(),
                (Some(ord), Gt) => ord.is_gt(),
                (Some(ord), Ge) => ord.is_ge(),
                _ => false,
            })
        }
        Like | NotLike => {
            let l = operand_value(left, row, ctx)?;
            let pattern = match operand_value(right, row, ctx)? {
                Value::String(s) => s,
                other => {
                    return Err(Error::Execution(format!(
                        "LIKE pattern must be a string, got {}",
                        other
                    )))
                }
            };
            // Non-string subjects never match LIKE, so NOT LIKE is the
            // exact complement over the whole record set.
            let matched = match &l {
                Value::String(s) => like_to_regex(&pattern)?.is_match(s),
                _ => false,
            };
            Ok(if op == Like { matched } else { !matched })
        }
        In | NotIn => {
            let l = operand_value(left, row, ctx)?;
            let items = operand_list(right, op)?;
            let found = items.iter().any(|item| equal_values(&l, &item.to_value()));
            Ok(if op == In { found } else { !found })
        }
        Includes | Excludes => {
            let l = operand_value(left, row, ctx)?;
            let items = operand_list(right, op)?;
            let matched = match &l {
                Value::String(s) => {
                    let held: HashSet<&str> = s.split(';').map(str::trim).collect();
                    items.iter().any(|item| match item {
                        Literal::String(wanted) => wanted
                            .split(';')
                            .map(str::trim)
                            .all(|part| held.contains(part)),
                        _ => false,
                    })
                }
                _ => false,
            };
            Ok(if op == Includes { matched } else { !matched })
        }
    }
}
