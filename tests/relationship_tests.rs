//! Master/detail composition: dotted paths, embedded masters, nested
//! detail subqueries and in-subqueries across a three-entity graph.

use resoql::{Engine, StaticResolver};
use serde_json::{json, Value};

fn engine() -> Engine {
    Engine::builder()
        .resolver(
            "User",
            StaticResolver::new(vec![
                json!({"id": "U1", "name": "Olive"}),
                json!({"id": "U2", "name": "Pat"}),
            ]),
        )
        .resolver(
            "Account",
            StaticResolver::new(vec![
                json!({"id": "A1", "name": "Acme", "ownerId": "U1"}),
                json!({"id": "A2", "name": "Beta", "ownerId": "U2"}),
                json!({"id": "A3", "name": "Corp", "ownerId": null}),
            ]),
        )
        .resolver(
            "Contact",
            StaticResolver::new(vec![
                json!({"id": "C1", "name": "Ann", "accountId": "A1"}),
                json!({"id": "C2", "name": "Bob", "accountId": "A1"}),
                json!({"id": "C3", "name": "Cal", "accountId": "A2"}),
                json!({"id": "C4", "name": "Dee", "accountId": null}),
            ]),
        )
        .relationship("User", "Account", "owner", "accounts", None)
        .relationship("Account", "Contact", "account", "contacts", None)
        .build()
}

fn names(rows: &[Value]) -> Vec<&str> {
    rows.iter().map(|r| r["name"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn test_master_embed_on_dotted_path() {
    let rows = engine()
        .execute("select name, account.name from contact order by name")
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["name"], json!("Ann"));
    assert_eq!(rows[0]["account"]["name"], json!("Acme"));
    assert_eq!(rows[2]["account"]["name"], json!("Beta"));
}

#[tokio::test]
async fn test_master_path_with_alias_flattens() {
    let rows = engine()
        .execute("select name, account.name accName from contact where id = 'C3'")
        .await
        .unwrap();
    assert_eq!(rows[0], json!({"name": "Cal", "accName": "Beta"}));
}

#[tokio::test]
async fn test_master_join_is_zero_or_one() {
    let rows = engine()
        .execute("select name, account.name from contact where id = 'C4'")
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], json!("Dee"));
    assert_eq!(rows[0]["account"], Value::Null);
}

#[tokio::test]
async fn test_multi_hop_master_path() {
    let rows = engine()
        .execute("select name, account.owner.name boss from contact order by name")
        .await
        .unwrap();
    assert_eq!(rows[0]["boss"], json!("Olive"));
    assert_eq!(rows[2]["boss"], json!("Pat"));
    assert_eq!(rows[3]["boss"], Value::Null);
}

#[tokio::test]
async fn test_filter_on_master_path() {
    let rows = engine()
        .execute("select name from contact where account.name = 'Acme' order by name")
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Ann", "Bob"]);
}

#[tokio::test]
async fn test_order_by_master_path() {
    let rows = engine()
        .execute("select name from contact order by account.name desc nulls last, name")
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Cal", "Ann", "Bob", "Dee"]);
}

#[tokio::test]
async fn test_detail_subquery_embeds_array() {
    let rows = engine()
        .execute("select name, (select name from contacts order by name) from account order by name")
        .await
        .unwrap();
    assert_eq!(
        rows[0]["contacts"],
        json!([{"name": "Ann"}, {"name": "Bob"}])
    );
    assert_eq!(rows[1]["contacts"], json!([{"name": "Cal"}]));
    assert_eq!(rows[2]["contacts"], json!([]));
}

#[tokio::test]
async fn test_detail_subquery_with_alias_filter_and_limit() {
    let rows = engine()
        .execute(
            "select name, (select name from contacts where name != 'Ann' \
             order by name limit 1) people from account where id = 'A1'",
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["people"], json!([{"name": "Bob"}]));
}

#[tokio::test]
async fn test_nested_detail_under_master_chain() {
    let rows = engine()
        .execute(
            "select name, (select name, (select name from contacts order by name) \
             from accounts order by name) from user order by name",
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], json!("Olive"));
    assert_eq!(
        rows[0]["accounts"][0]["contacts"],
        json!([{"name": "Ann"}, {"name": "Bob"}])
    );
}

#[tokio::test]
async fn test_in_subquery_materializes() {
    let rows = engine()
        .execute("select name from account where id in (select accountId from contact) order by name")
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Acme", "Beta"]);

    let rows = engine()
        .execute(
            "select name from account where id not in (select accountId from contact) \
             and id != null order by name",
        )
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Corp"]);
}

#[tokio::test]
async fn test_root_alias_expansion() {
    let rows = engine()
        .execute("select a.name from account a where a.id = 'A1'")
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], json!("Acme"));
}

#[tokio::test]
async fn test_unknown_relationship_is_a_compile_error() {
    let err = engine()
        .execute("select name, (select name from bogus) from account")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Compile error: Unknown relationship \"bogus\" on resolver \"Account\""
    );
}

#[tokio::test]
async fn test_unknown_resolver_is_an_error() {
    let err = engine().execute("select id from nothere").await.unwrap_err();
    assert!(err.to_string().contains("nothere"));
}
