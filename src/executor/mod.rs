//! Execution: the [`Resolver`] trait, the [`Engine`] that orchestrates
//! resolver calls, DML with change notifications, and transactions.

pub(crate) mod aggregation;
mod execution;
pub(crate) mod filter;
pub(crate) mod helpers;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::ast::ConditionNode;
use crate::compiler::{self, JoinKind, QueryPlan};
use crate::error::{Error, Result};
use crate::events::{EventInfo, EventObserver};
use crate::functions::FunctionRegistry;
use crate::parser::{self, Params};
use crate::pubsub::{ChangeCallback, ChangeEvent, ChangeKind, SubscriptionHub, SubscriptionId};
use crate::schema::{NamingRules, RelationshipGraph, Schema};

use execution::Execution;

/// What a resolver can do upstream. Anything false degrades to in-memory
/// processing in the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverCapabilities {
    pub filtering: bool,
    pub sorting: bool,
    pub caching: bool,
}

/// Per-execution scratch space shared across the nested resolver calls of
/// one query. The engine never reads or writes it.
pub type ResolverData = Arc<Mutex<HashMap<String, Value>>>;

/// Ephemeral state for one resolver invocation. Owned by the engine, passed
/// by reference, never retained by the resolver beyond the call.
pub struct ResolverContext<'a> {
    pub functions: &'a FunctionRegistry,
    /// Resolver-name trail from the root of the plan to this call.
    pub graph_path: Vec<String>,
    pub resolver_name: &'a str,
    pub resolver_data: ResolverData,
    /// Opaque caller-supplied transaction state; never interpreted here.
    pub transaction_data: Option<Arc<Value>>,
    /// Parent record when this call joins a relationship.
    pub parent: Option<&'a Value>,
    pub parent_type: Option<JoinKind>,
    pub foreign_id_field: Option<&'a str>,
    /// Sort specs the engine pushed down; only set when the resolver
    /// advertises the sorting capability.
    pub order_by: Option<&'a [crate::ast::OrderSpec]>,
    pub capabilities: ResolverCapabilities,
}

/// Pluggable data source for one entity.
///
/// `query` receives the requested field names, plus the condition, limit
/// and offset the engine decided to push down (always `None` unless the
/// matching capability is advertised). Returned records keep the resolver's
/// own key casing; the engine does not normalize.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn query(
        &self,
        fields: &[String],
        condition: Option<&ConditionNode>,
        limit: Option<usize>,
        offset: Option<usize>,
        ctx: &ResolverContext<'_>,
    ) -> Result<Vec<Value>>;

    /// Must return the inserted records in input order and count.
    async fn insert(&self, _records: Vec<Value>, ctx: &ResolverContext<'_>) -> Result<Vec<Value>> {
        Err(Error::Unsupported(format!(
            "insert is not supported by resolver \"{}\"",
            ctx.resolver_name
        )))
    }

    /// Must return the updated records in input order and count.
    async fn update(&self, _records: Vec<Value>, ctx: &ResolverContext<'_>) -> Result<Vec<Value>> {
        Err(Error::Unsupported(format!(
            "update is not supported by resolver \"{}\"",
            ctx.resolver_name
        )))
    }

    async fn remove(&self, _records: Vec<Value>, ctx: &ResolverContext<'_>) -> Result<()> {
        Err(Error::Unsupported(format!(
            "remove is not supported by resolver \"{}\"",
            ctx.resolver_name
        )))
    }

    fn capabilities(&self) -> ResolverCapabilities {
        ResolverCapabilities::default()
    }
}

pub struct Engine {
    pub(crate) resolvers: Vec<(String, Arc<dyn Resolver>)>,
    /// Normalized-key lookup table, built once at construction.
    pub(crate) by_lower: HashMap<String, usize>,
    pub(crate) resolver_names: Vec<String>,
    pub(crate) graph: RelationshipGraph,
    pub(crate) functions: FunctionRegistry,
    pub(crate) events: Vec<Arc<dyn EventObserver>>,
    pub(crate) hub: SubscriptionHub,
}

#[derive(Default)]
pub struct EngineBuilder {
    resolvers: Vec<(String, Arc<dyn Resolver>)>,
    naming: Option<NamingRules>,
    relationships: Vec<(String, String, String, String, Option<String>)>,
    functions: Option<FunctionRegistry>,
    events: Vec<Arc<dyn EventObserver>>,
}

impl EngineBuilder {
    pub fn resolver(mut self, name: impl Into<String>, resolver: impl Resolver + 'static) -> Self {
        self.resolvers.push((name.into(), Arc::new(resolver)));
        self
    }

    pub fn shared_resolver(mut self, name: impl Into<String>, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.push((name.into(), resolver));
        self
    }

    /// Declare a master/detail relationship. `foreign_key` defaults to the
    /// naming rules' `<master_name>Id` convention.
    pub fn relationship(
        mut self,
        master: impl Into<String>,
        detail: impl Into<String>,
        master_name: impl Into<String>,
        detail_name: impl Into<String>,
        foreign_key: Option<String>,
    ) -> Self {
        self.relationships.push((
            master.into(),
            detail.into(),
            master_name.into(),
            detail_name.into(),
            foreign_key,
        ));
        self
    }

    pub fn naming_rules(mut self, rules: NamingRules) -> Self {
        self.naming = Some(rules);
        self
    }

    pub fn functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.events.push(observer);
        self
    }

    pub fn build(self) -> Engine {
        let mut graph = RelationshipGraph::with_naming(self.naming.unwrap_or_default());
        for (master, detail, master_name, detail_name, fk) in self.relationships {
            graph.add_relationship(master, detail, master_name, detail_name, fk);
        }
        let by_lower = self
            .resolvers
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.to_lowercase(), i))
            .collect();
        let resolver_names = self.resolvers.iter().map(|(n, _)| n.clone()).collect();
        Engine {
            resolvers: self.resolvers,
            by_lower,
            resolver_names,
            graph,
            functions: self.functions.unwrap_or_default(),
            events: self.events,
            hub: SubscriptionHub::new(),
        }
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    pub(crate) fn schema(&self) -> Schema<'_> {
        Schema {
            graph: &self.graph,
            resolvers: &self.resolver_names,
            functions: &self.functions,
        }
    }

    pub(crate) fn resolver_entry(&self, name: &str) -> Result<(&str, &Arc<dyn Resolver>)> {
        self.by_lower
            .get(&name.to_lowercase())
            .map(|&i| (self.resolvers[i].0.as_str(), &self.resolvers[i].1))
            .ok_or_else(|| Error::Resolver(format!("Missing resolver: {}", name)))
    }

    /// Parse and compile query text into a reusable plan.
    pub fn prepare(&self, text: &str) -> Result<QueryPlan> {
        compiler::compile(&parser::parse(text)?, &self.schema())
    }

    pub fn prepare_with_params(&self, text: &str, params: &Params) -> Result<QueryPlan> {
        compiler::compile(&parser::parse_with_params(text, params)?, &self.schema())
    }

    /// Parse, compile and run a query inside a one-shot transaction
    /// envelope.
    pub async fn execute(&self, text: &str) -> Result<Vec<Value>> {
        let plan = self.prepare(text)?;
        self.execute_plan(&plan).await
    }

    pub async fn execute_with_params(&self, text: &str, params: &Params) -> Result<Vec<Value>> {
        let plan = self.prepare_with_params(text, params)?;
        self.execute_plan(&plan).await
    }

    /// Run a compiled plan inside a one-shot transaction envelope.
    pub async fn execute_plan(&self, plan: &QueryPlan) -> Result<Vec<Value>> {
        let info = EventInfo::top_level();
        for obs in &self.events {
            obs.begin_transaction(&info).await;
        }
        let result = self.execute_in_envelope(plan, None).await;
        for obs in &self.events {
            obs.end_transaction(&info, result.as_ref().err()).await;
        }
        result
    }

    pub(crate) async fn execute_in_envelope(
        &self,
        plan: &QueryPlan,
        transaction_data: Option<Arc<Value>>,
    ) -> Result<Vec<Value>> {
        let info = EventInfo::top_level();
        for obs in &self.events {
            obs.begin_execute(&info).await;
        }
        let exec = Execution {
            engine: self,
            resolver_data: Arc::new(Mutex::new(HashMap::new())),
            transaction_data,
        };
        let result = exec.node(plan, vec![plan.resolver.clone()], None).await;
        for obs in &self.events {
            obs.end_execute(&info, result.as_ref().err()).await;
        }
        result
    }

    /// Begin an explicit transaction. Calls made through the returned handle
    /// share `options` as opaque transaction state; `finish` closes the
    /// envelope.
    pub async fn begin_transaction(&self, options: Option<Value>) -> Transaction<'_> {
        let info = EventInfo::top_level();
        for obs in &self.events {
            obs.begin_transaction(&info).await;
        }
        Transaction {
            engine: self,
            data: options.map(Arc::new),
        }
    }

    pub async fn insert(&self, resolver: &str, records: Vec<Value>) -> Result<Vec<Value>> {
        self.dml_transaction(resolver, records, ChangeKind::Insert, None)
            .await
    }

    pub async fn update(&self, resolver: &str, records: Vec<Value>) -> Result<Vec<Value>> {
        self.dml_transaction(resolver, records, ChangeKind::Update, None)
            .await
    }

    pub async fn remove(&self, resolver: &str, records: Vec<Value>) -> Result<()> {
        self.dml_transaction(resolver, records, ChangeKind::Remove, None)
            .await
            .map(|_| ())
    }

    async fn dml_transaction(
        &self,
        resolver: &str,
        records: Vec<Value>,
        kind: ChangeKind,
        transaction_data: Option<Arc<Value>>,
    ) -> Result<Vec<Value>> {
        let info = EventInfo::top_level();
        for obs in &self.events {
            obs.begin_transaction(&info).await;
        }
        let result = self
            .dml_in_envelope(resolver, records, kind, transaction_data)
            .await;
        for obs in &self.events {
            obs.end_transaction(&info, result.as_ref().err()).await;
        }
        result
    }

    pub(crate) async fn dml_in_envelope(
        &self,
        resolver: &str,
        records: Vec<Value>,
        kind: ChangeKind,
        transaction_data: Option<Arc<Value>>,
    ) -> Result<Vec<Value>> {
        let info = EventInfo::top_level();
        for obs in &self.events {
            obs.begin_execute(&info).await;
        }
        let result = self
            .dml_call(resolver, records, kind, transaction_data)
            .await;
        for obs in &self.events {
            obs.end_execute(&info, result.as_ref().err()).await;
        }
        result
    }

    async fn dml_call(
        &self,
        resolver: &str,
        records: Vec<Value>,
        kind: ChangeKind,
        transaction_data: Option<Arc<Value>>,
    ) -> Result<Vec<Value>> {
        let (canonical, bound) = self.resolver_entry(resolver)?;
        let input_len = records.len();
        let ctx = ResolverContext {
            functions: &self.functions,
            graph_path: vec![canonical.to_string()],
            resolver_name: canonical,
            resolver_data: Arc::new(Mutex::new(HashMap::new())),
            transaction_data,
            parent: None,
            parent_type: None,
            foreign_id_field: None,
            order_by: None,
            capabilities: bound.capabilities(),
        };
        debug!(resolver = canonical, kind = ?kind, count = input_len, "dml call");

        let affected = match kind {
            ChangeKind::Insert => bound.insert(records, &ctx).await?,
            ChangeKind::Update => bound.update(records, &ctx).await?,
            ChangeKind::Remove => {
                let ids = records.clone();
                bound.remove(records, &ctx).await?;
                ids
            }
        };
        if kind != ChangeKind::Remove && affected.len() != input_len {
            return Err(Error::Resolver(format!(
                "Resolver \"{}\" returned {} records for {} inputs",
                canonical,
                affected.len(),
                input_len
            )));
        }

        let id_field = self.graph.id_field();
        let changes: Vec<ChangeEvent> = affected
            .iter()
            .filter_map(|record| helpers::get_field(record, id_field))
            .map(|id| ChangeEvent {
                on: kind,
                resolver: canonical.to_string(),
                id: id.clone(),
            })
            .collect();
        self.hub.notify(changes);

        Ok(affected)
    }

    pub fn subscribe(
        &self,
        resolver: impl Into<String>,
        record_id: Option<Value>,
        callback: ChangeCallback,
    ) -> SubscriptionId {
        self.hub.subscribe(resolver, record_id, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }
}

/// Explicit transaction handle. All calls share the opaque options supplied
/// to `begin_transaction`; `finish` fires `end_transaction`.
pub struct Transaction<'e> {
    engine: &'e Engine,
    data: Option<Arc<Value>>,
}

impl Transaction<'_> {
    pub async fn execute(&self, text: &str) -> Result<Vec<Value>> {
        let plan = self.engine.prepare(text)?;
        self.engine
            .execute_in_envelope(&plan, self.data.clone())
            .await
    }

    pub async fn execute_with_params(&self, text: &str, params: &Params) -> Result<Vec<Value>> {
        let plan = self.engine.prepare_with_params(text, params)?;
        self.engine
            .execute_in_envelope(&plan, self.data.clone())
            .await
    }

    pub async fn insert(&self, resolver: &str, records: Vec<Value>) -> Result<Vec<Value>> {
        self.engine
            .dml_in_envelope(resolver, records, ChangeKind::Insert, self.data.clone())
            .await
    }

    pub async fn update(&self, resolver: &str, records: Vec<Value>) -> Result<Vec<Value>> {
        self.engine
            .dml_in_envelope(resolver, records, ChangeKind::Update, self.data.clone())
            .await
    }

    pub async fn remove(&self, resolver: &str, records: Vec<Value>) -> Result<()> {
        self.engine
            .dml_in_envelope(resolver, records, ChangeKind::Remove, self.data.clone())
            .await
            .map(|_| ())
    }

    pub async fn finish(self) {
        let info = EventInfo::top_level();
        for obs in &self.engine.events {
            obs.end_transaction(&info, None).await;
        }
    }
}
