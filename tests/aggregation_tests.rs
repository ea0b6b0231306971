//! Grouping, aggregate functions, having and the aggregate projection
//! shape rules.

use resoql::{Engine, StaticResolver};
use serde_json::{json, Value};

fn engine() -> Engine {
    Engine::builder()
        .resolver(
            "Contact",
            StaticResolver::new(vec![
                json!({"id": "C1", "foo": "aaa/z1", "accountId": "A1", "amount": 10}),
                json!({"id": "C2", "foo": "aaa/z2", "accountId": "A1", "amount": 5}),
                json!({"id": "C3", "foo": null, "accountId": null, "amount": null}),
                json!({"id": "C4", "foo": "", "accountId": "", "amount": 2}),
            ]),
        )
        .build()
}

#[tokio::test]
async fn test_group_by_keeps_null_and_empty_separate() {
    let rows = engine()
        .execute("select accountId, count() from contact group by accountId")
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            json!({"accountId": "A1", "count": 2.0}),
            json!({"accountId": null, "count": 1.0}),
            json!({"accountId": "", "count": 1.0}),
        ]
    );
}

#[tokio::test]
async fn test_min_ignores_null_members() {
    let rows = engine()
        .execute("select accountId, min(foo) from contact group by accountId")
        .await
        .unwrap();
    assert_eq!(rows[0]["min"], json!("aaa/z1"));
    assert_eq!(rows[1]["min"], Value::Null);
    assert_eq!(rows[2]["min"], json!(""));
}

#[tokio::test]
async fn test_sum_avg_max() {
    let rows = engine()
        .execute(
            "select accountId, sum(amount) total, avg(amount) mean, max(amount) top \
             from contact group by accountId",
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["total"], json!(15.0));
    assert_eq!(rows[0]["mean"], json!(7.5));
    assert_eq!(rows[0]["top"], json!(10));
}

#[tokio::test]
async fn test_count_distinct() {
    let rows = engine()
        .execute("select count_distinct(accountId) n from contact")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    // A1, null and "" are three distinct values.
    assert_eq!(rows[0]["n"], json!(3.0));
}

#[tokio::test]
async fn test_implicit_group_over_empty_set() {
    let engine = Engine::builder()
        .resolver("Contact", StaticResolver::new(Vec::new()))
        .build();
    let rows = engine
        .execute("select count() from contact")
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"count": 0.0})]);
}

#[tokio::test]
async fn test_order_and_limit_apply_to_groups() {
    let rows = engine()
        .execute(
            "select accountId, count() n from contact group by accountId \
             order by count() desc, accountId nulls last limit 2",
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], json!({"accountId": "A1", "n": 2.0}));
    assert_eq!(rows[1]["n"], json!(1.0));
}

#[tokio::test]
async fn test_having_filters_groups() {
    let rows = engine()
        .execute(
            "select accountId, count() n from contact group by accountId having count() > 1",
        )
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"accountId": "A1", "n": 2.0})]);
}

#[tokio::test]
async fn test_bare_field_in_aggregate_query_is_rejected() {
    let err = engine()
        .execute("select name, count() from contact group by accountId")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Compile error: Contact.name is not allowed. Aggregate function is needed."
    );
}

#[tokio::test]
async fn test_group_key_may_be_selected_bare() {
    let rows = engine()
        .execute("select accountId, count() from contact group by AccountId")
        .await
        .unwrap();
    // Key match is case-insensitive.
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_group_by_master_path_selected_bare() {
    let engine = Engine::builder()
        .resolver(
            "Account",
            StaticResolver::new(vec![
                json!({"id": "A1", "name": "Acme"}),
                json!({"id": "A2", "name": "Beta"}),
            ]),
        )
        .resolver(
            "Contact",
            StaticResolver::new(vec![
                json!({"id": "C1", "accountId": "A1"}),
                json!({"id": "C2", "accountId": "A1"}),
                json!({"id": "C3", "accountId": "A2"}),
                json!({"id": "C4", "accountId": null}),
            ]),
        )
        .relationship("Account", "Contact", "account", "contacts", None)
        .build();
    let rows = engine
        .execute("select account.name, count() n from contact group by account.name")
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            json!({"account.name": "Acme", "n": 2.0}),
            json!({"account.name": "Beta", "n": 1.0}),
            json!({"account.name": null, "n": 1.0}),
        ]
    );
}

#[tokio::test]
async fn test_having_without_aggregation_is_rejected() {
    let err = engine()
        .execute("select id from contact having count() > 1")
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Compile error:"));
}

#[tokio::test]
async fn test_aggregate_outside_aggregate_query_is_rejected() {
    let err = engine()
        .execute("select id from contact where count() > 1")
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("outside an aggregate query"));
}
