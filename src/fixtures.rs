//! In-memory fixture resolvers.
//!
//! [`StaticResolver`] serves a record vector and supports the full DML
//! surface, so joins, events and pub/sub are exercisable without external
//! collaborators. Capability flags are per instance and explicit; there is
//! no ambient default configuration.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ast::ConditionNode;
use crate::error::{Error, Result};
use crate::executor::filter::{evaluate_condition, evaluate_expression, EvalContext};
use crate::executor::helpers::{compare_for_sort, get_field};
use crate::executor::{Resolver, ResolverCapabilities, ResolverContext};

/// Opt-out flags mirroring `ResolverCapabilities`: a static resolver can do
/// everything unless told not to, which forces the engine onto its
/// in-memory paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResolverConfig {
    pub no_filtering: bool,
    pub no_sorting: bool,
    pub no_caching: bool,
}

pub struct StaticResolver {
    records: Mutex<Vec<Value>>,
    config: StaticResolverConfig,
    id_field: String,
}

impl StaticResolver {
    pub fn new(records: Vec<Value>) -> Self {
        Self::with_config(records, StaticResolverConfig::default())
    }

    pub fn with_config(records: Vec<Value>, config: StaticResolverConfig) -> Self {
        Self {
            records: Mutex::new(records),
            config,
            id_field: "id".to_string(),
        }
    }

    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = name.into();
        self
    }

    /// Load records from a JSON array of objects.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::Resolver(format!("Invalid JSON fixture: {}", e)))?;
        match value {
            Value::Array(records) => Ok(Self::new(records)),
            _ => Err(Error::Resolver(
                "JSON fixture must be an array of objects".to_string(),
            )),
        }
    }

    /// Load records from CSV text with a header row. All cell values load
    /// as strings; an empty cell stays an empty string, not null.
    pub fn from_csv(text: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| Error::Resolver(format!("Invalid CSV fixture: {}", e)))?
            .clone();
        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| Error::Resolver(format!("Invalid CSV fixture: {}", e)))?;
            let mut obj = Map::new();
            for (header, cell) in headers.iter().zip(row.iter()) {
                obj.insert(header.to_string(), Value::String(cell.to_string()));
            }
            records.push(Value::Object(obj));
        }
        Ok(Self::new(records))
    }

    fn record_id(&self, record: &Value) -> Result<Value> {
        match get_field(record, &self.id_field) {
            Some(id) if !id.is_null() => Ok(id.clone()),
            _ => Err(Error::Resolver(format!(
                "Record is missing its \"{}\" field",
                self.id_field
            ))),
        }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn query(
        &self,
        _fields: &[String],
        condition: Option<&ConditionNode>,
        limit: Option<usize>,
        offset: Option<usize>,
        ctx: &ResolverContext<'_>,
    ) -> Result<Vec<Value>> {
        let mut rows: Vec<Value> = self.records.lock().clone();

        if let Some(cond) = condition {
            let eval = EvalContext::new(ctx.functions);
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if evaluate_condition(cond, &row, &eval)? {
                    kept.push(row);
                }
            }
            rows = kept;
        }

        if let Some(order) = ctx.order_by {
            let eval = EvalContext::new(ctx.functions);
            let mut keyed: Vec<(Vec<Value>, Value)> = Vec::with_capacity(rows.len());
            for row in rows {
                let keys = order
                    .iter()
                    .map(|spec| evaluate_expression(&spec.target, &row, &eval))
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((keys, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, spec) in order.iter().enumerate() {
                    let ord = compare_for_sort(&a[i], &b[i], spec.direction, spec.nulls);
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            rows = keyed.into_iter().map(|(_, r)| r).collect();
        }

        Ok(rows
            .into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// Assigns a v4 uuid to records arriving without an id.
    async fn insert(&self, records: Vec<Value>, _ctx: &ResolverContext<'_>) -> Result<Vec<Value>> {
        let mut store = self.records.lock();
        let mut inserted = Vec::with_capacity(records.len());
        for mut record in records {
            let needs_id = get_field(&record, &self.id_field).map_or(true, Value::is_null);
            if needs_id {
                if let Some(obj) = record.as_object_mut() {
                    obj.insert(
                        self.id_field.clone(),
                        Value::String(Uuid::new_v4().to_string()),
                    );
                }
            }
            store.push(record.clone());
            inserted.push(record);
        }
        Ok(inserted)
    }

    /// Merges incoming fields into the stored record matched by id.
    async fn update(&self, records: Vec<Value>, _ctx: &ResolverContext<'_>) -> Result<Vec<Value>> {
        let mut store = self.records.lock();
        let mut updated = Vec::with_capacity(records.len());
        for record in records {
            let id = self.record_id(&record)?;
            let stored = store
                .iter_mut()
                .find(|r| get_field(r, &self.id_field) == Some(&id))
                .ok_or_else(|| {
                    Error::Resolver(format!("Record with id {} not found", id))
                })?;
            if let (Some(target), Some(source)) = (stored.as_object_mut(), record.as_object()) {
                for (key, value) in source {
                    target.insert(key.clone(), value.clone());
                }
            }
            updated.push(stored.clone());
        }
        Ok(updated)
    }

    async fn remove(&self, records: Vec<Value>, _ctx: &ResolverContext<'_>) -> Result<()> {
        let mut store = self.records.lock();
        for record in records {
            let id = self.record_id(&record)?;
            let before = store.len();
            store.retain(|r| get_field(r, &self.id_field) != Some(&id));
            if store.len() == before {
                return Err(Error::Resolver(format!("Record with id {} not found", id)));
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> ResolverCapabilities {
        ResolverCapabilities {
            filtering: !self.config.no_filtering,
            sorting: !self.config.no_sorting,
            caching: !self.config.no_caching,
        }
    }
}
