//! Compiles a [`Query`] AST into an executable [`QueryPlan`] against a
//! declared [`Schema`].
//!
//! The compiler resolves structure, not field existence: every alias,
//! relationship name and resolver name must resolve here, but whether a
//! resolver actually supplies a requested field is only known once data is
//! fetched. Dotted paths are resolved by walking explicit aliases first,
//! then master relationships, and the master hops they traverse are merged
//! into child plan nodes so each relationship is fetched once per parent.

use serde_json::Value;
use tracing::debug;

use crate::ast::{
    path_to_string, ConditionNode, Expression, FieldPath, FieldSpec, Literal, Operand, OrderSpec,
    Query,
};
use crate::error::{Error, Result};
use crate::functions::FunctionKind;
use crate::schema::{Relationship, Schema};

/// Join kind of a child plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Parent references one child record through the parent's foreign key.
    Master,
    /// Child records reference the parent through the child's foreign key.
    Detail,
}

/// One nested plan node plus the linkage needed to join it per parent
/// record.
#[derive(Debug, Clone)]
pub struct ChildPlan {
    pub join: JoinKind,
    /// Key under which the joined result embeds into the composed row.
    pub output_key: String,
    /// Master: field on the parent holding the child id. Detail: field on
    /// the child holding the parent id.
    pub foreign_key: String,
    pub plan: QueryPlan,
}

/// One projection entry of a plan node, in select-list order.
#[derive(Debug, Clone)]
pub enum PlanField {
    /// Local field of this node's resolver.
    Column { field: String, alias: String },
    /// Aliased dotted master path, plucked through the joined master
    /// objects into a flat output column.
    MasterPath { path: FieldPath, alias: String },
    /// Un-aliased master path: the joined master object embeds whole under
    /// its relationship name.
    MasterEmbed { name: String },
    /// Function call evaluated per row (scalar) or per group (aggregate).
    Function {
        name: String,
        args: Vec<Expression>,
        alias: String,
        aggregate: bool,
    },
    /// Nested detail subquery, embedded as an array under `alias`.
    DetailEmbed { key: String, alias: String },
    /// Value fixed at compile time; the folded result of an immediate
    /// function call.
    Constant { value: Value, alias: String },
}

/// Executable plan for one query level. Immutable once compiled; shared
/// freely across executions.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub resolver: String,
    pub alias: String,
    pub fields: Vec<PlanField>,
    /// Field names to request from the resolver, deduplicated, in first-use
    /// order. The id field is included only when a join needs it.
    pub requested_fields: Vec<String>,
    pub condition: Option<ConditionNode>,
    /// True when every field the condition touches is a local single-segment
    /// field, making the condition eligible for pushdown.
    pub condition_local: bool,
    /// Group keys as paths into the composed row.
    pub group_by: Vec<FieldPath>,
    pub having: Option<ConditionNode>,
    pub order_by: Vec<OrderSpec>,
    /// True when every sort key is a local single-segment field.
    pub order_local: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub for_clause: Vec<String>,
    pub children: Vec<ChildPlan>,
    /// Aggregate query: grouping applies and plain fields are restricted to
    /// group keys.
    pub is_aggregate: bool,
}

/// Compile a parsed query against the schema.
pub fn compile(query: &Query, schema: &Schema) -> Result<QueryPlan> {
    let plan = NodeCompiler::for_root(query, schema)?.compile(query)?;
    debug!(
        resolver = %plan.resolver,
        fields = plan.requested_fields.len(),
        children = plan.children.len(),
        "compiled query plan"
    );
    Ok(plan)
}

/// Master hops discovered while resolving paths, merged by relationship
/// name so each master is fetched once per parent.
#[derive(Default)]
struct MasterTree {
    nodes: Vec<MasterNode>,
}

struct MasterNode {
    rel: Relationship,
    /// Leaf fields to select on this master.
    fields: Vec<String>,
    children: MasterTree,
}

struct NodeCompiler<'a> {
    schema: &'a Schema<'a>,
    resolver: String,
    /// From-clause aliases mapped to master-relationship paths relative to
    /// this node's resolver. The root alias maps to the empty path.
    aliases: Vec<(String, FieldPath)>,
    requested: Vec<String>,
    masters: MasterTree,
    details: Vec<ChildPlan>,
}

impl<'a> NodeCompiler<'a> {
    /// Root query: the first from entry names a resolver.
    fn for_root(query: &Query, schema: &'a Schema<'a>) -> Result<Self> {
        let root = query
            .from
            .first()
            .ok_or_else(|| Error::Compile("Query has no from clause".to_string()))?;
        if root.path.len() != 1 {
            return Err(Error::Compile(format!(
                "Root from entry must be a resolver name, got \"{}\"",
                path_to_string(&root.path)
            )));
        }
        let resolver = schema
            .canonical_resolver(&root.path[0])
            .ok_or_else(|| Error::Compile(format!("Unknown resolver: {}", root.path[0])))?
            .to_string();
        Self::new(query, schema, resolver)
    }

    /// Detail subquery: the from entry names a detail relationship of the
    /// parent resolver.
    fn for_detail(
        query: &Query,
        schema: &'a Schema<'a>,
        parent_resolver: &str,
    ) -> Result<(Self, Relationship)> {
        let from = query
            .from
            .first()
            .ok_or_else(|| Error::Compile("Subquery has no from clause".to_string()))?;
        if from.path.len() != 1 {
            return Err(Error::Compile(format!(
                "Subquery from entry must be a relationship name, got \"{}\"",
                path_to_string(&from.path)
            )));
        }
        let rel = schema
            .graph
            .details_of(parent_resolver, &from.path[0])
            .cloned()
            .ok_or_else(|| {
                Error::Compile(format!(
                    "Unknown relationship \"{}\" on resolver \"{}\"",
                    from.path[0], parent_resolver
                ))
            })?;
        let compiler = Self::new(query, schema, rel.detail.clone())?;
        Ok((compiler, rel))
    }

    fn new(query: &Query, schema: &'a Schema<'a>, resolver: String) -> Result<Self> {
        let root = &query.from[0];
        let root_alias = root.alias.clone().unwrap_or_else(|| resolver.clone());
        let mut compiler = Self {
            schema,
            resolver,
            aliases: vec![(root_alias, Vec::new())],
            requested: Vec::new(),
            masters: MasterTree::default(),
            details: Vec::new(),
        };

        // Later from entries declare aliases for master paths rooted in an
        // earlier alias.
        for entry in &query.from[1..] {
            if entry.path.len() < 2 {
                return Err(Error::Compile(format!(
                    "From entry \"{}\" must be a dotted path rooted in an alias",
                    path_to_string(&entry.path)
                )));
            }
            let expanded = compiler.expand_alias(&entry.path)?;
            // Walk the chain now so a bad segment fails before execution.
            let mut current = compiler.resolver.clone();
            let mut canonical = Vec::with_capacity(expanded.len());
            for seg in &expanded {
                let rel = compiler.master_rel(&current, seg, &entry.path)?;
                canonical.push(rel.master_name.clone());
                current = rel.master.clone();
            }
            let alias = entry.alias.clone().ok_or_else(|| {
                Error::Compile(format!(
                    "From entry \"{}\" requires an alias",
                    path_to_string(&entry.path)
                ))
            })?;
            compiler.aliases.push((alias, canonical));
        }
        Ok(compiler)
    }

    fn request(&mut self, field: &str) {
        if !self.requested.iter().any(|f| f == field) {
            self.requested.push(field.to_string());
        }
    }

    fn master_rel(
        &self,
        current_resolver: &str,
        segment: &str,
        full_path: &[String],
    ) -> Result<Relationship> {
        self.schema
            .graph
            .master_of(current_resolver, segment)
            .cloned()
            .ok_or_else(|| {
                Error::Compile(format!(
                    "Cannot resolve \"{}\" in path \"{}\" on resolver \"{}\"",
                    segment,
                    path_to_string(full_path),
                    current_resolver
                ))
            })
    }

    /// Replace a leading from-clause alias with its relationship path.
    /// Single-segment paths are always local fields.
    fn expand_alias(&self, path: &[String]) -> Result<FieldPath> {
        if path.len() < 2 {
            return Ok(path.to_vec());
        }
        let head = &path[0];
        let found = self
            .aliases
            .iter()
            .find(|(a, _)| a == head)
            .or_else(|| self.aliases.iter().find(|(a, _)| a.eq_ignore_ascii_case(head)));
        match found {
            Some((_, base)) => {
                let mut expanded = base.clone();
                expanded.extend_from_slice(&path[1..]);
                Ok(expanded)
            }
            None => Ok(path.to_vec()),
        }
    }

    /// Resolve a dotted master path, merging its hops into the master tree.
    /// Returns the canonical path (graph-cased relationship names plus the
    /// leaf field as written).
    fn register_master_path(&mut self, path: &[String]) -> Result<FieldPath> {
        debug_assert!(path.len() >= 2);
        let schema = self.schema;
        let resolver = self.resolver.clone();

        fn walk(
            schema: &Schema,
            tree: &mut MasterTree,
            current_resolver: &str,
            path: &[String],
            full_path: &[String],
            canonical: &mut FieldPath,
        ) -> Result<()> {
            let segment = &path[0];
            let rel = schema
                .graph
                .master_of(current_resolver, segment)
                .cloned()
                .ok_or_else(|| {
                    Error::Compile(format!(
                        "Cannot resolve \"{}\" in path \"{}\" on resolver \"{}\"",
                        segment,
                        path_to_string(full_path),
                        current_resolver
                    ))
                })?;
            canonical.push(rel.master_name.clone());
            let node = match tree
                .nodes
                .iter_mut()
                .position(|n| n.rel.master_name == rel.master_name)
            {
                Some(idx) => &mut tree.nodes[idx],
                None => {
                    tree.nodes.push(MasterNode {
                        rel: rel.clone(),
                        fields: Vec::new(),
                        children: MasterTree::default(),
                    });
                    tree.nodes.last_mut().unwrap()
                }
            };
            if path.len() == 2 {
                let leaf = path[1].clone();
                if !node.fields.iter().any(|f| *f == leaf) {
                    node.fields.push(leaf.clone());
                }
                canonical.push(leaf);
                Ok(())
            } else {
                let master = node.rel.master.clone();
                walk(
                    schema,
                    &mut node.children,
                    &master,
                    &path[1..],
                    full_path,
                    canonical,
                )
            }
        }

        let mut canonical = Vec::with_capacity(path.len());
        walk(
            schema,
            &mut self.masters,
            &resolver,
            path,
            path,
            &mut canonical,
        )?;
        // The join needs this node's foreign key to reach the master.
        let fk = self.masters.nodes
            .iter()
            .find(|n| n.rel.master_name == canonical[0])
            .map(|n| n.rel.foreign_key.clone());
        if let Some(fk) = fk {
            self.request(&fk);
        }
        Ok(canonical)
    }

    /// Resolve a field path appearing anywhere outside the select list.
    /// Local single-segment paths are requested; dotted paths merge into the
    /// master tree without embedding.
    fn register_path(&mut self, path: &[String]) -> Result<FieldPath> {
        let expanded = self.expand_alias(path)?;
        if expanded.len() == 1 {
            self.request(&expanded[0]);
            Ok(expanded)
        } else {
            self.register_master_path(&expanded)
        }
    }

    fn rewrite_expression(&mut self, expr: &Expression) -> Result<(Expression, bool)> {
        Ok(match expr {
            Expression::Literal(lit) => (Expression::Literal(lit.clone()), true),
            Expression::Field(path) => {
                let resolved = self.register_path(path)?;
                let local = resolved.len() == 1;
                (Expression::Field(resolved), local)
            }
            Expression::FunctionCall { name, args } => {
                let mut rewritten = Vec::with_capacity(args.len());
                for arg in args {
                    rewritten.push(self.rewrite_expression(arg)?.0);
                }
                if self.schema.functions.kind(name) == Some(FunctionKind::Immediate) {
                    // Folded to a literal, so the comparison stays pushable.
                    let lit = self.fold_immediate(name, &rewritten)?;
                    return Ok((Expression::Literal(lit), true));
                }
                // Resolvers cannot evaluate functions; never pushed down.
                (
                    Expression::FunctionCall {
                        name: name.clone(),
                        args: rewritten,
                    },
                    false,
                )
            }
        })
    }

    /// Immediate functions run once per query, at compile time, so every
    /// execution of the plan sees the same value.
    fn fold_immediate(&self, name: &str, args: &[Expression]) -> Result<Literal> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Expression::Literal(lit) => values.push(lit.to_value()),
                _ => {
                    return Err(Error::Compile(format!(
                        "{}() is evaluated once per query and cannot read fields",
                        name
                    )))
                }
            }
        }
        let value = self.schema.functions.call(name, &values)?;
        Literal::from_value(&value).ok_or_else(|| {
            Error::Compile(format!("{}() returned a non-scalar value", name))
        })
    }

    fn rewrite_operand(&mut self, operand: &Operand) -> Result<(Operand, bool)> {
        Ok(match operand {
            Operand::Expr(expr) => {
                let (expr, local) = self.rewrite_expression(expr)?;
                (Operand::Expr(expr), local)
            }
            Operand::List(items) => (Operand::List(items.clone()), true),
            Operand::Subquery(sub) => {
                // Validate now so a broken subquery fails before any
                // resolver runs; execution materializes it into a list.
                compile(sub, self.schema)?;
                (Operand::Subquery(sub.clone()), true)
            }
        })
    }

    fn rewrite_condition(&mut self, node: &ConditionNode) -> Result<(ConditionNode, bool)> {
        Ok(match node {
            ConditionNode::Comparison { op, left, right } => {
                let (left, l_local) = self.rewrite_operand(left)?;
                let (right, r_local) = self.rewrite_operand(right)?;
                (
                    ConditionNode::Comparison {
                        op: *op,
                        left,
                        right,
                    },
                    l_local && r_local,
                )
            }
            ConditionNode::And(l, r) => {
                let (l, ll) = self.rewrite_condition(l)?;
                let (r, rl) = self.rewrite_condition(r)?;
                (ConditionNode::And(Box::new(l), Box::new(r)), ll && rl)
            }
            ConditionNode::Or(l, r) => {
                let (l, ll) = self.rewrite_condition(l)?;
                let (r, rl) = self.rewrite_condition(r)?;
                (ConditionNode::Or(Box::new(l), Box::new(r)), ll && rl)
            }
            ConditionNode::Not(inner) => {
                let (inner, local) = self.rewrite_condition(inner)?;
                (ConditionNode::Not(Box::new(inner)), local)
            }
        })
    }

    fn compile(mut self, query: &Query) -> Result<QueryPlan> {
        // Group keys resolve first so select items can be checked against
        // them.
        let mut group_by = Vec::with_capacity(query.group_by.len());
        for key in &query.group_by {
            group_by.push(self.register_path(key)?);
        }

        let mut fields: Vec<PlanField> = Vec::new();
        let mut embedded: Vec<String> = Vec::new();

        for item in &query.select {
            match &item.spec {
                FieldSpec::Field(path) => {
                    let expanded = self.expand_alias(path)?;
                    if expanded.len() == 1 {
                        let field = expanded[0].clone();
                        self.request(&field);
                        let alias = item.alias.clone().unwrap_or_else(|| field.clone());
                        fields.push(PlanField::Column { field, alias });
                    } else if let Some(alias) = &item.alias {
                        let canonical = self.register_master_path(&expanded)?;
                        fields.push(PlanField::MasterPath {
                            path: canonical,
                            alias: alias.clone(),
                        });
                    } else {
                        let canonical = self.register_master_path(&expanded)?;
                        if matches_group_key(&group_by, &canonical) {
                            // A dotted group key projects as a flat column
                            // named by its dotted spelling.
                            fields.push(PlanField::MasterPath {
                                path: canonical,
                                alias: path_to_string(&expanded),
                            });
                        } else if !embedded.contains(&canonical[0]) {
                            embedded.push(canonical[0].clone());
                            fields.push(PlanField::MasterEmbed {
                                name: canonical[0].clone(),
                            });
                        }
                    }
                }
                FieldSpec::FunctionCall { name, args } => {
                    let aggregate = self.schema.functions.is_aggregate(name);
                    let mut rewritten = Vec::with_capacity(args.len());
                    for arg in args {
                        rewritten.push(self.rewrite_expression(arg)?.0);
                    }
                    let alias = item.alias.clone().unwrap_or_else(|| name.clone());
                    if self.schema.functions.kind(name) == Some(FunctionKind::Immediate) {
                        let lit = self.fold_immediate(name, &rewritten)?;
                        fields.push(PlanField::Constant {
                            value: lit.to_value(),
                            alias,
                        });
                    } else {
                        fields.push(PlanField::Function {
                            name: name.clone(),
                            args: rewritten,
                            alias,
                            aggregate,
                        });
                    }
                }
                FieldSpec::Subquery(sub) => {
                    let (compiler, rel) =
                        NodeCompiler::for_detail(sub, self.schema, &self.resolver)?;
                    let mut plan = compiler.compile(sub)?;
                    if !plan.requested_fields.iter().any(|f| *f == rel.foreign_key) {
                        plan.requested_fields.push(rel.foreign_key.clone());
                    }
                    let alias = item
                        .alias
                        .clone()
                        .unwrap_or_else(|| rel.detail_name.clone());
                    fields.push(PlanField::DetailEmbed {
                        key: rel.detail_name.clone(),
                        alias,
                    });
                    self.details.push(ChildPlan {
                        join: JoinKind::Detail,
                        output_key: rel.detail_name.clone(),
                        foreign_key: rel.foreign_key.clone(),
                        plan,
                    });
                    // The detail join filters children by this node's id.
                    let id_field = self.schema.graph.id_field().to_string();
                    self.request(&id_field);
                }
            }
        }

        let (condition, condition_local) = match &query.where_clause {
            Some(cond) => {
                let (cond, local) = self.rewrite_condition(cond)?;
                (Some(cond), local)
            }
            None => (None, true),
        };

        let is_aggregate = !group_by.is_empty()
            || fields
                .iter()
                .any(|f| matches!(f, PlanField::Function { aggregate: true, .. }));

        if is_aggregate {
            self.check_aggregate_shape(&fields, &group_by)?;
        }

        let having = match &query.having {
            Some(cond) => {
                if !is_aggregate {
                    return Err(Error::Compile(
                        "Having clause requires group by or aggregate functions".to_string(),
                    ));
                }
                Some(self.rewrite_condition(cond)?.0)
            }
            None => None,
        };

        let mut order_by = Vec::with_capacity(query.order_by.len());
        let mut order_local = true;
        for spec in &query.order_by {
            let (target, local) = self.rewrite_expression(&spec.target)?;
            order_local &= local;
            order_by.push(OrderSpec {
                target,
                direction: spec.direction,
                nulls: spec.nulls,
            });
        }

        let mut children = self.masters.into_children(self.schema)?;
        children.extend(self.details);

        Ok(QueryPlan {
            resolver: self.resolver,
            alias: self.aliases[0].0.clone(),
            fields,
            requested_fields: self.requested,
            condition,
            condition_local,
            group_by,
            having,
            order_by,
            order_local,
            limit: query.limit,
            offset: query.offset,
            for_clause: query.for_clause.clone(),
            children,
            is_aggregate,
        })
    }

    /// In an aggregate query every plain select item must be a group key.
    fn check_aggregate_shape(&self, fields: &[PlanField], group_by: &[FieldPath]) -> Result<()> {
        for field in fields {
            let offending = match field {
                PlanField::Column { field, .. } => {
                    let path = vec![field.clone()];
                    (!matches_group_key(group_by, &path)).then_some(path)
                }
                PlanField::MasterPath { path, .. } => {
                    (!matches_group_key(group_by, path)).then(|| path.clone())
                }
                PlanField::MasterEmbed { name } => Some(vec![name.clone()]),
                PlanField::DetailEmbed { key, .. } => Some(vec![key.clone()]),
                PlanField::Function { .. } | PlanField::Constant { .. } => None,
            };
            if let Some(path) = offending {
                return Err(Error::Compile(format!(
                    "{}.{} is not allowed. Aggregate function is needed.",
                    self.resolver,
                    path_to_string(&path)
                )));
            }
        }
        Ok(())
    }
}

fn matches_group_key(group_by: &[FieldPath], path: &[String]) -> bool {
    group_by.iter().any(|key| {
        key.len() == path.len()
            && key
                .iter()
                .zip(path.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

impl MasterTree {
    /// Turn the merged master hops into child plan nodes. Each node selects
    /// its leaf fields plus whatever its own masters need.
    fn into_children(self, schema: &Schema) -> Result<Vec<ChildPlan>> {
        let mut children = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            let mut requested = vec![schema.graph.id_field().to_string()];
            let mut fields: Vec<PlanField> = Vec::new();
            for leaf in &node.fields {
                if !requested.iter().any(|f| f == leaf) {
                    requested.push(leaf.clone());
                }
                fields.push(PlanField::Column {
                    field: leaf.clone(),
                    alias: leaf.clone(),
                });
            }
            let nested = node.children.into_children(schema)?;
            for child in &nested {
                if !requested.iter().any(|f| *f == child.foreign_key) {
                    requested.push(child.foreign_key.clone());
                }
                fields.push(PlanField::MasterEmbed {
                    name: child.output_key.clone(),
                });
            }
            children.push(ChildPlan {
                join: JoinKind::Master,
                output_key: node.rel.master_name.clone(),
                foreign_key: node.rel.foreign_key.clone(),
                plan: QueryPlan {
                    resolver: node.rel.master.clone(),
                    alias: node.rel.master_name.clone(),
                    fields,
                    requested_fields: requested,
                    condition: None,
                    condition_local: true,
                    group_by: Vec::new(),
                    having: None,
                    order_by: Vec::new(),
                    order_local: true,
                    limit: None,
                    offset: None,
                    for_clause: Vec::new(),
                    children: nested,
                    is_aggregate: false,
                },
            });
        }
        Ok(children)
    }
}
