//! Execution lifecycle events.
//!
//! Observers are awaited in sequence at fixed points of the envelope:
//! `begin_transaction -> begin_execute -> before/after_master_sub_queries ->
//! before/after_detail_sub_queries -> end_execute -> end_transaction`.
//! The `end_*` hooks still fire when execution fails, receiving the error
//! before it propagates; they cannot suppress it.

use async_trait::async_trait;

use crate::error::Error;

/// Context handed to every event hook.
#[derive(Debug, Clone, Default)]
pub struct EventInfo {
    /// Resolver-name trail for sub-query events; `None` at the top level.
    pub graph_path: Option<Vec<String>>,
}

impl EventInfo {
    pub fn top_level() -> Self {
        Self { graph_path: None }
    }

    pub fn at(graph_path: Vec<String>) -> Self {
        Self {
            graph_path: Some(graph_path),
        }
    }
}

/// Optional observation points around query and DML execution. All hooks
/// default to no-ops.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn begin_transaction(&self, _info: &EventInfo) {}
    async fn end_transaction(&self, _info: &EventInfo, _error: Option<&Error>) {}
    async fn begin_execute(&self, _info: &EventInfo) {}
    async fn end_execute(&self, _info: &EventInfo, _error: Option<&Error>) {}
    async fn before_master_sub_queries(&self, _info: &EventInfo) {}
    async fn after_master_sub_queries(&self, _info: &EventInfo) {}
    async fn before_detail_sub_queries(&self, _info: &EventInfo) {}
    async fn after_detail_sub_queries(&self, _info: &EventInfo) {}
}

/// Observer that does nothing; the engine default.
pub struct NoopObserver;

#[async_trait]
impl EventObserver for NoopObserver {}
