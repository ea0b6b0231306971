//! Plan walking: fetch, join, filter, group, having, sort, paginate,
//! reshape.
//!
//! Each plan node runs the same state machine. Resolver calls are awaited
//! sequentially; joins issue one call per parent record per relationship so
//! the parent's concrete id can be handed to the child resolver as a
//! filter.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ast::{
    ComparisonOp, ConditionNode, Expression, Literal, Operand, OrderSpec,
};
use crate::compiler::{self, ChildPlan, JoinKind, PlanField, QueryPlan};
use crate::error::{Error, Result};
use crate::events::EventInfo;
use crate::executor::aggregation::{self, Group};
use crate::executor::filter::{evaluate_condition, evaluate_expression, EvalContext};
use crate::executor::helpers::{compare_for_sort, get_field, pluck};
use crate::executor::{Engine, ResolverContext, ResolverData};

pub(crate) struct Execution<'e> {
    pub engine: &'e Engine,
    /// Per-execution bag shared by every nested resolver call of this query.
    pub resolver_data: ResolverData,
    pub transaction_data: Option<Arc<Value>>,
}

/// Linkage of a child node to one concrete parent record.
pub(crate) struct JoinLink {
    parent: Value,
    kind: JoinKind,
    foreign_key: String,
}

fn eq_condition(field: String, value: Value) -> ConditionNode {
    let literal = Literal::from_value(&value).unwrap_or(Literal::Null);
    ConditionNode::Comparison {
        op: ComparisonOp::Eq,
        left: Operand::Expr(Expression::Field(vec![field])),
        right: Operand::Expr(Expression::Literal(literal)),
    }
}

fn merge_conditions(a: Option<ConditionNode>, b: Option<ConditionNode>) -> Option<ConditionNode> {
    match (a, b) {
        (Some(a), Some(b)) => Some(ConditionNode::And(Box::new(a), Box::new(b))),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn paginate(rows: Vec<Value>, limit: Option<usize>, offset: Option<usize>) -> Vec<Value> {
    rows.into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

impl<'e> Execution<'e> {
    /// Execute one plan node. `link` is set for relationship sub-queries.
    pub(crate) fn node<'a>(
        &'a self,
        plan: &'a QueryPlan,
        graph_path: Vec<String>,
        link: Option<JoinLink>,
    ) -> BoxFuture<'a, Result<Vec<Value>>> {
        async move {
            let (canonical, resolver) = self.engine.resolver_entry(&plan.resolver)?;
            let caps = resolver.capabilities();

            let condition = match plan.condition.clone() {
                Some(cond) => Some(self.materialize(cond).await?),
                None => None,
            };

            // Join condition from the parent linkage.
            let id_field = self.engine.graph.id_field();
            let mut join_condition = None;
            if let Some(link) = &link {
                let (field, value) = match link.kind {
                    JoinKind::Master => (
                        id_field.to_string(),
                        get_field(&link.parent, &link.foreign_key)
                            .cloned()
                            .unwrap_or(Value::Null),
                    ),
                    JoinKind::Detail => (
                        link.foreign_key.clone(),
                        get_field(&link.parent, id_field)
                            .cloned()
                            .unwrap_or(Value::Null),
                    ),
                };
                if value.is_null() {
                    return Ok(Vec::new());
                }
                join_condition = Some(eq_condition(field, value));
            }
            let effective = merge_conditions(join_condition, condition);

            // Pushdown decisions. Pagination is only computed from the
            // filtered and sorted set, so it pushes down only when both
            // upstream steps are satisfied.
            let push_filter = caps.filtering && plan.condition_local;
            if effective.is_some() && caps.filtering && !plan.condition_local {
                warn!(
                    resolver = canonical,
                    "condition references joined or computed values; filtering in memory"
                );
            }
            let push_sort = caps.sorting && plan.order_local && !plan.order_by.is_empty();
            let filter_done = effective.is_none() || push_filter;
            let sort_done = plan.order_by.is_empty() || push_sort;
            let push_page = filter_done && sort_done && !plan.is_aggregate;
            let (fetch_limit, fetch_offset) = if push_page {
                (plan.limit, plan.offset)
            } else {
                (None, None)
            };
            debug!(
                resolver = canonical,
                push_filter, push_sort, push_page, "fetching"
            );

            let ctx = ResolverContext {
                functions: &self.engine.functions,
                graph_path: graph_path.clone(),
                resolver_name: canonical,
                resolver_data: self.resolver_data.clone(),
                transaction_data: self.transaction_data.clone(),
                parent: link.as_ref().map(|l| &l.parent),
                parent_type: link.as_ref().map(|l| l.kind),
                foreign_id_field: link.as_ref().map(|l| l.foreign_key.as_str()),
                order_by: if push_sort {
                    Some(plan.order_by.as_slice())
                } else {
                    None
                },
                capabilities: caps,
            };
            let mut rows = resolver
                .query(
                    &plan.requested_fields,
                    if push_filter { effective.as_ref() } else { None },
                    fetch_limit,
                    fetch_offset,
                    &ctx,
                )
                .await?;
            drop(ctx);

            // Field-existence contract: a requested field must appear in at
            // least one returned record.
            if !rows.is_empty() {
                for field in &plan.requested_fields {
                    if !rows.iter().any(|r| get_field(r, field).is_some()) {
                        return Err(Error::Resolver(format!(
                            "Field \"{}\" is not supplied from resolver \"{}\".",
                            field, canonical
                        )));
                    }
                }
            }

            // Master sub-queries complete before detail sub-queries begin.
            let info = if link.is_none() {
                EventInfo::top_level()
            } else {
                EventInfo::at(graph_path.clone())
            };
            let masters: Vec<&ChildPlan> = plan
                .children
                .iter()
                .filter(|c| c.join == JoinKind::Master)
                .collect();
            let details: Vec<&ChildPlan> = plan
                .children
                .iter()
                .filter(|c| c.join == JoinKind::Detail)
                .collect();

            for obs in &self.engine.events {
                obs.before_master_sub_queries(&info).await;
            }
            for row in rows.iter_mut() {
                let parent = row.clone();
                for &child in &masters {
                    let joined = self.join_child(child, &graph_path, &parent).await?;
                    let value = joined.into_iter().next().unwrap_or(Value::Null);
                    if let Some(obj) = row.as_object_mut() {
                        obj.insert(child.output_key.clone(), value);
                    }
                }
            }
            for obs in &self.engine.events {
                obs.after_master_sub_queries(&info).await;
            }

            for obs in &self.engine.events {
                obs.before_detail_sub_queries(&info).await;
            }
            for row in rows.iter_mut() {
                let parent = row.clone();
                for &child in &details {
                    let joined = self.join_child(child, &graph_path, &parent).await?;
                    if let Some(obj) = row.as_object_mut() {
                        obj.insert(child.output_key.clone(), Value::Array(joined));
                    }
                }
            }
            for obs in &self.engine.events {
                obs.after_detail_sub_queries(&info).await;
            }

            // In-memory fallback filter, over fully composed rows.
            if let (Some(cond), false) = (&effective, push_filter) {
                let eval = EvalContext::new(&self.engine.functions);
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if evaluate_condition(cond, &row, &eval)? {
                        kept.push(row);
                    }
                }
                rows = kept;
            }

            if plan.is_aggregate {
                return self.aggregate_rows(plan, rows);
            }

            if !sort_done {
                self.sort_plain(plan, &mut rows)?;
            }
            if !push_page {
                rows = paginate(rows, plan.limit, plan.offset);
            }

            rows.into_iter()
                .map(|row| self.reshape_row(plan, &row))
                .collect()
        }
        .boxed()
    }

    async fn join_child(
        &self,
        child: &ChildPlan,
        graph_path: &[String],
        parent: &Value,
    ) -> Result<Vec<Value>> {
        let mut child_path = graph_path.to_vec();
        child_path.push(child.plan.resolver.clone());
        self.node(
            &child.plan,
            child_path,
            Some(JoinLink {
                parent: parent.clone(),
                kind: child.join,
                foreign_key: child.foreign_key.clone(),
            }),
        )
        .await
    }

    /// Group, apply `having`, sort and paginate groups, then project one
    /// output row per surviving group.
    fn aggregate_rows(&self, plan: &QueryPlan, rows: Vec<Value>) -> Result<Vec<Value>> {
        let functions = &self.engine.functions;
        let mut groups = aggregation::group_rows(rows, &plan.group_by);

        if let Some(having) = &plan.having {
            let mut kept = Vec::with_capacity(groups.len());
            for group in groups {
                let rep = group
                    .representative()
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let ctx = EvalContext::for_group(functions, &group.members);
                if evaluate_condition(having, &rep, &ctx)? {
                    kept.push(group);
                }
            }
            groups = kept;
        }

        if !plan.order_by.is_empty() {
            // Keys evaluate against the representative with the group in
            // scope, so both group keys and aggregates sort.
            let mut keyed: Vec<(Vec<Value>, Group)> = Vec::with_capacity(groups.len());
            for group in groups {
                let rep = group
                    .representative()
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let ctx = EvalContext::for_group(functions, &group.members);
                let keys = plan
                    .order_by
                    .iter()
                    .map(|spec| evaluate_expression(&spec.target, &rep, &ctx))
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((keys, group));
            }
            keyed.sort_by(|(a, _), (b, _)| order_tuple(a, b, &plan.order_by));
            groups = keyed.into_iter().map(|(_, g)| g).collect();
        }

        let groups: Vec<Group> = groups
            .into_iter()
            .skip(plan.offset.unwrap_or(0))
            .take(plan.limit.unwrap_or(usize::MAX))
            .collect();

        groups
            .into_iter()
            .map(|group| self.project_group(plan, &group))
            .collect()
    }

    fn project_group(&self, plan: &QueryPlan, group: &Group) -> Result<Value> {
        let functions = &self.engine.functions;
        let rep = group
            .representative()
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let ctx = EvalContext::for_group(functions, &group.members);
        let mut out = Map::new();
        for field in &plan.fields {
            match field {
                PlanField::Column { field, alias } => {
                    out.insert(
                        alias.clone(),
                        get_field(&rep, field).cloned().unwrap_or(Value::Null),
                    );
                }
                PlanField::MasterPath { path, alias } => {
                    out.insert(
                        alias.clone(),
                        pluck(&rep, path).cloned().unwrap_or(Value::Null),
                    );
                }
                PlanField::Function {
                    name,
                    args,
                    alias,
                    aggregate,
                } => {
                    let value = if *aggregate {
                        aggregation::aggregate_value(name, args, &group.members, functions)?
                    } else {
                        let call = Expression::FunctionCall {
                            name: name.clone(),
                            args: args.clone(),
                        };
                        evaluate_expression(&call, &rep, &ctx)?
                    };
                    out.insert(alias.clone(), value);
                }
                PlanField::Constant { value, alias } => {
                    out.insert(alias.clone(), value.clone());
                }
                // rejected at compile time for aggregate queries
                PlanField::MasterEmbed { .. } | PlanField::DetailEmbed { .. } => {}
            }
        }
        Ok(Value::Object(out))
    }

    fn sort_plain(&self, plan: &QueryPlan, rows: &mut Vec<Value>) -> Result<()> {
        let eval = EvalContext::new(&self.engine.functions);
        let mut keyed: Vec<(Vec<Value>, Value)> = Vec::with_capacity(rows.len());
        for row in rows.drain(..) {
            let keys = plan
                .order_by
                .iter()
                .map(|spec| evaluate_expression(&spec.target, &row, &eval))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((keys, row));
        }
        keyed.sort_by(|(a, _), (b, _)| order_tuple(a, b, &plan.order_by));
        *rows = keyed.into_iter().map(|(_, r)| r).collect();
        Ok(())
    }

    /// Project one composed row to its output aliases, in select-list
    /// order.
    fn reshape_row(&self, plan: &QueryPlan, row: &Value) -> Result<Value> {
        let eval = EvalContext::new(&self.engine.functions);
        let mut out = Map::new();
        for field in &plan.fields {
            match field {
                PlanField::Column { field, alias } => {
                    out.insert(
                        alias.clone(),
                        get_field(row, field).cloned().unwrap_or(Value::Null),
                    );
                }
                PlanField::MasterPath { path, alias } => {
                    out.insert(
                        alias.clone(),
                        pluck(row, path).cloned().unwrap_or(Value::Null),
                    );
                }
                PlanField::MasterEmbed { name } => {
                    out.insert(
                        name.clone(),
                        get_field(row, name).cloned().unwrap_or(Value::Null),
                    );
                }
                PlanField::DetailEmbed { key, alias } => {
                    out.insert(
                        alias.clone(),
                        get_field(row, key)
                            .cloned()
                            .unwrap_or_else(|| Value::Array(Vec::new())),
                    );
                }
                PlanField::Function {
                    name, args, alias, ..
                } => {
                    let call = Expression::FunctionCall {
                        name: name.clone(),
                        args: args.clone(),
                    };
                    out.insert(alias.clone(), evaluate_expression(&call, row, &eval)?);
                }
                PlanField::Constant { value, alias } => {
                    out.insert(alias.clone(), value.clone());
                }
            }
        }
        Ok(Value::Object(out))
    }

    /// Replace `in (select ...)` operands with the materialized value list
    /// of the subquery's single output column.
    fn materialize<'a>(&'a self, node: ConditionNode) -> BoxFuture<'a, Result<ConditionNode>> {
        async move {
            Ok(match node {
                ConditionNode::And(l, r) => ConditionNode::And(
                    Box::new(self.materialize(*l).await?),
                    Box::new(self.materialize(*r).await?),
                ),
                ConditionNode::Or(l, r) => ConditionNode::Or(
                    Box::new(self.materialize(*l).await?),
                    Box::new(self.materialize(*r).await?),
                ),
                ConditionNode::Not(inner) => {
                    ConditionNode::Not(Box::new(self.materialize(*inner).await?))
                }
                ConditionNode::Comparison { op, left, right } => ConditionNode::Comparison {
                    op,
                    left: self.materialize_operand(left).await?,
                    right: self.materialize_operand(right).await?,
                },
            })
        }
        .boxed()
    }

    async fn materialize_operand(&self, operand: Operand) -> Result<Operand> {
        let Operand::Subquery(query) = operand else {
            return Ok(operand);
        };
        let sub_plan = compiler::compile(&query, &self.engine.schema())?;
        let key = match sub_plan.fields.first() {
            Some(PlanField::Column { alias, .. })
            | Some(PlanField::MasterPath { alias, .. })
            | Some(PlanField::Function { alias, .. })
            | Some(PlanField::DetailEmbed { alias, .. })
            | Some(PlanField::Constant { alias, .. }) => alias.clone(),
            Some(PlanField::MasterEmbed { name }) => name.clone(),
            None => {
                return Err(Error::Execution(
                    "Subquery must select at least one field".to_string(),
                ))
            }
        };
        let rows = self
            .node(&sub_plan, vec![sub_plan.resolver.clone()], None)
            .await?;
        let items = rows
            .iter()
            .filter_map(|row| get_field(row, &key))
            .filter_map(Literal::from_value)
            .collect();
        debug!(resolver = %sub_plan.resolver, "materialized in-subquery");
        Ok(Operand::List(items))
    }
}

/// Chain per-key orderings; stable sort keeps input order on full ties.
fn order_tuple(a: &[Value], b: &[Value], specs: &[OrderSpec]) -> std::cmp::Ordering {
    for (i, spec) in specs.iter().enumerate() {
        let ord = compare_for_sort(&a[i], &b[i], spec.direction, spec.nulls);
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}
