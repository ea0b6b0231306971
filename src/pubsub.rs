//! Change notifications for DML.
//!
//! Subscribers register per resolver, optionally narrowed to one record id.
//! After a successful insert/update/remove the engine queues one event per
//! affected record and drains the queue on a spawned task, so delivery is
//! never awaited by the DML caller.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Remove,
}

/// One delivered notification.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub on: ChangeKind,
    pub resolver: String,
    pub id: Value,
}

pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    resolver: String,
    record_id: Option<Value>,
    callback: ChangeCallback,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// Subscription registry shared by the engine and its transactions.
#[derive(Default)]
pub struct SubscriptionHub {
    inner: Mutex<HubInner>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for a resolver. `record_id = None` subscribes to
    /// every record of that resolver.
    pub fn subscribe(
        &self,
        resolver: impl Into<String>,
        record_id: Option<Value>,
        callback: ChangeCallback,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subscriptions.push(Subscription {
            id,
            resolver: resolver.into(),
            record_id,
            callback,
        });
        id
    }

    /// Remove a subscription. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id);
        inner.subscriptions.len() != before
    }

    /// Queue events and deliver them on a spawned task. Matching callbacks
    /// are collected under the lock; delivery happens outside it.
    pub fn notify(&self, events: Vec<ChangeEvent>) {
        let mut deliveries: Vec<(ChangeCallback, ChangeEvent)> = Vec::new();
        {
            let inner = self.inner.lock();
            for event in events {
                for sub in &inner.subscriptions {
                    if !sub.resolver.eq_ignore_ascii_case(&event.resolver) {
                        continue;
                    }
                    let wanted = match &sub.record_id {
                        None => true,
                        Some(id) => *id == event.id,
                    };
                    if wanted {
                        deliveries.push((sub.callback.clone(), event.clone()));
                    }
                }
            }
        }
        if deliveries.is_empty() {
            return;
        }
        debug!(count = deliveries.len(), "dispatching change notifications");
        tokio::spawn(async move {
            for (callback, event) in deliveries {
                callback(event);
            }
        });
    }
}
