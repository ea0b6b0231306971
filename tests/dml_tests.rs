//! DML through the engine, the event envelope, transactions and change
//! notifications.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use resoql::{
    ChangeEvent, ChangeKind, Engine, Error, EventInfo, EventObserver, StaticResolver,
};
use serde_json::json;

fn engine_with(observer: Option<Arc<Recorder>>) -> Engine {
    let builder = Engine::builder()
        .resolver(
            "Account",
            StaticResolver::new(vec![json!({"id": "A1", "name": "Acme"})]),
        )
        .resolver(
            "Contact",
            StaticResolver::new(vec![
                json!({"id": "C1", "name": "Ann", "accountId": "A1"}),
            ]),
        )
        .relationship("Account", "Contact", "account", "contacts", None);
    match observer {
        Some(obs) => builder.observer(obs).build(),
        None => builder.build(),
    }
}

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
}

impl Recorder {
    fn entry(&self, hook: &str, info: &EventInfo, error: Option<&Error>) {
        let mut label = hook.to_string();
        if let Some(path) = &info.graph_path {
            label.push_str(&format!("@{}", path.join(".")));
        }
        if error.is_some() {
            label.push_str("!err");
        }
        self.log.lock().push(label);
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}

#[async_trait]
impl EventObserver for Recorder {
    async fn begin_transaction(&self, info: &EventInfo) {
        self.entry("begin_transaction", info, None);
    }
    async fn end_transaction(&self, info: &EventInfo, error: Option<&Error>) {
        self.entry("end_transaction", info, error);
    }
    async fn begin_execute(&self, info: &EventInfo) {
        self.entry("begin_execute", info, None);
    }
    async fn end_execute(&self, info: &EventInfo, error: Option<&Error>) {
        self.entry("end_execute", info, error);
    }
    async fn before_master_sub_queries(&self, info: &EventInfo) {
        self.entry("before_master", info, None);
    }
    async fn after_master_sub_queries(&self, info: &EventInfo) {
        self.entry("after_master", info, None);
    }
    async fn before_detail_sub_queries(&self, info: &EventInfo) {
        self.entry("before_detail", info, None);
    }
    async fn after_detail_sub_queries(&self, info: &EventInfo) {
        self.entry("after_detail", info, None);
    }
}

#[tokio::test]
async fn test_insert_update_remove_roundtrip() {
    let engine = engine_with(None);

    let inserted = engine
        .insert("Contact", vec![json!({"name": "Bob", "accountId": "A1"})])
        .await
        .unwrap();
    let id = inserted[0]["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let updated = engine
        .update("Contact", vec![json!({"id": id, "name": "Robert"})])
        .await
        .unwrap();
    assert_eq!(updated[0]["name"], json!("Robert"));

    let rows = engine
        .execute("select name from contact order by name")
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"name": "Ann"}), json!({"name": "Robert"})]);

    engine
        .remove("Contact", vec![json!({"id": id})])
        .await
        .unwrap();
    let rows = engine.execute("select name from contact").await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_query_event_envelope_order() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(Some(recorder.clone()));

    engine.execute("select name from account").await.unwrap();
    assert_eq!(
        recorder.take(),
        vec![
            "begin_transaction",
            "begin_execute",
            "before_master",
            "after_master",
            "before_detail",
            "after_detail",
            "end_execute",
            "end_transaction",
        ]
    );
}

#[tokio::test]
async fn test_sub_query_events_carry_graph_path() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(Some(recorder.clone()));

    engine
        .execute("select name, (select name from contacts) from account")
        .await
        .unwrap();
    let log = recorder.take();
    assert!(log.contains(&"before_detail@Account.Contact".to_string()));
    assert!(log.contains(&"after_detail@Account.Contact".to_string()));
}

#[tokio::test]
async fn test_end_hooks_receive_the_error() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(Some(recorder.clone()));

    engine.execute("select nope from account").await.unwrap_err();
    let log = recorder.take();
    assert_eq!(log.first().unwrap(), "begin_transaction");
    assert!(log.contains(&"end_execute!err".to_string()));
    assert_eq!(log.last().unwrap(), "end_transaction!err");
}

#[tokio::test]
async fn test_dml_envelope_has_no_join_hooks() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(Some(recorder.clone()));

    engine
        .insert("Contact", vec![json!({"name": "Eve"})])
        .await
        .unwrap();
    assert_eq!(
        recorder.take(),
        vec![
            "begin_transaction",
            "begin_execute",
            "end_execute",
            "end_transaction",
        ]
    );
}

#[tokio::test]
async fn test_transaction_shares_envelope_and_finish() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine_with(Some(recorder.clone()));

    let tx = engine.begin_transaction(Some(json!({"user": "u1"}))).await;
    tx.insert("Contact", vec![json!({"name": "Eve"})])
        .await
        .unwrap();
    let rows = tx.execute("select name from contact").await.unwrap();
    assert_eq!(rows.len(), 2);
    tx.finish().await;

    let log = recorder.take();
    assert_eq!(log.first().unwrap(), "begin_transaction");
    assert_eq!(log.last().unwrap(), "end_transaction");
    // One transaction envelope around two execute envelopes.
    assert_eq!(
        log.iter().filter(|l| l.starts_with("begin_transaction")).count(),
        1
    );
    assert_eq!(
        log.iter().filter(|l| l.starts_with("begin_execute")).count(),
        2
    );
}

async fn drain_notifications() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_wildcard_subscription_sees_all_changes() {
    let engine = engine_with(None);
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.subscribe(
        "Contact",
        None,
        Arc::new(move |event| sink.lock().push(event)),
    );

    engine
        .insert("Contact", vec![json!({"id": "C9", "name": "Zoe"})])
        .await
        .unwrap();
    engine
        .update("Contact", vec![json!({"id": "C9", "name": "Zo"})])
        .await
        .unwrap();
    engine.remove("Contact", vec![json!({"id": "C9"})]).await.unwrap();
    drain_notifications().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].on, ChangeKind::Insert);
    assert_eq!(seen[0].resolver, "Contact");
    assert_eq!(seen[0].id, json!("C9"));
    assert_eq!(seen[1].on, ChangeKind::Update);
    assert_eq!(seen[2].on, ChangeKind::Remove);
}

#[tokio::test]
async fn test_record_scoped_subscription_filters_by_id() {
    let engine = engine_with(None);
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.subscribe(
        "Contact",
        Some(json!("C1")),
        Arc::new(move |event| sink.lock().push(event)),
    );

    engine
        .update("Contact", vec![json!({"id": "C1", "name": "Anne"})])
        .await
        .unwrap();
    engine
        .insert("Contact", vec![json!({"id": "C8", "name": "Hal"})])
        .await
        .unwrap();
    drain_notifications().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, json!("C1"));
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let engine = engine_with(None);
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = engine.subscribe(
        "Contact",
        None,
        Arc::new(move |event| sink.lock().push(event)),
    );
    assert!(engine.unsubscribe(sub));
    assert!(!engine.unsubscribe(sub));

    engine
        .insert("Contact", vec![json!({"name": "Gus"})])
        .await
        .unwrap();
    drain_notifications().await;
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_dml() {
    let engine = engine_with(None);
    engine.subscribe(
        "Contact",
        None,
        Arc::new(|_event| panic!("listener went down")),
    );
    // Delivery is fire and forget; the panicking listener only kills its
    // own task.
    engine
        .insert("Contact", vec![json!({"name": "Ida"})])
        .await
        .unwrap();
    drain_notifications().await;
    let rows = engine.execute("select name from contact").await.unwrap();
    assert_eq!(rows.len(), 2);
}
