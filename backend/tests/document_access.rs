use caseledger_backend::{
    db::memory::MemoryStore,
    models::{
        document::Fields,
        query::{BatchOp, Filter, OrderBy, Query},
    },
    repositories::documents::{
        batch_write, create_document, delete_document, get_document, query_documents,
        update_document,
    },
};
use serde_json::{json, Value};

fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("object")
}

#[tokio::test]
async fn create_returns_generated_id_and_equal_timestamps() {
    let store = MemoryStore::new();

    let created = create_document(
        &store,
        "clients",
        fields(json!({"name": "Acme Corp", "email": null})),
    )
    .await
    .expect("create");

    assert!(!created.id.is_empty());
    assert_eq!(created.created_at, created.updated_at);

    let stored = get_document(&store, "clients", &created.id)
        .await
        .unwrap()
        .expect("stored");
    assert_eq!(stored.str_field("name"), Some("Acme Corp"));
    assert!(!stored.fields.contains_key("email"));
}

#[tokio::test]
async fn missing_records_are_a_value_not_an_error() {
    let store = MemoryStore::new();

    assert!(get_document(&store, "clients", "nonexistent-id")
        .await
        .unwrap()
        .is_none());
    assert!(delete_document(&store, "clients", "nonexistent-id")
        .await
        .unwrap());
    assert!(update_document(&store, "clients", "nonexistent-id", fields(json!({"x": 1})))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn update_then_get_sees_the_write_with_a_later_stamp() {
    let store = MemoryStore::new();
    let created = create_document(&store, "cases", fields(json!({"title": "Doe v. Roe"})))
        .await
        .unwrap();

    let updated = update_document(&store, "cases", &created.id, fields(json!({"x": 1})))
        .await
        .unwrap()
        .expect("updated");
    let fetched = get_document(&store, "cases", &created.id)
        .await
        .unwrap()
        .expect("fetched");

    assert_eq!(fetched, updated);
    assert_eq!(fetched.fields.get("x"), Some(&json!(1)));
    assert_eq!(fetched.str_field("title"), Some("Doe v. Roe"));
    assert!(fetched.updated_at > created.updated_at);
    assert_eq!(fetched.created_at, created.created_at);
}

#[tokio::test]
async fn unindexed_order_is_applied_in_memory_with_missing_keys_last() {
    let store = MemoryStore::with_index_policy(Vec::new());
    for (title, hearing_date) in [
        ("undated", Value::Null),
        ("june", json!("2024-06-01T09:00:00Z")),
        ("march", json!({"$date": "2024-03-01T09:00:00Z"})),
        ("may", json!({"seconds": 1_714_554_000, "nanos": 0})),
        ("other-owner", json!("2024-01-01T00:00:00Z")),
    ] {
        let owner = if title == "other-owner" { "u2" } else { "u1" };
        create_document(
            &store,
            "hearings",
            fields(json!({"owner": owner, "title": title, "hearingDate": hearing_date})),
        )
        .await
        .unwrap();
    }

    let ascending = Query::new()
        .filter(Filter::eq("owner", "u1"))
        .order_by(OrderBy::asc("hearingDate"))
        .limit(10);
    let page = query_documents(&store, "hearings", &ascending).await.unwrap();
    assert!(page.index_fallback);
    let titles: Vec<&str> = page
        .documents
        .iter()
        .filter_map(|doc| doc.str_field("title"))
        .collect();
    assert_eq!(titles, ["march", "may", "june", "undated"]);

    let descending = Query::new()
        .filter(Filter::eq("owner", "u1"))
        .order_by(OrderBy::desc("hearingDate"))
        .limit(10);
    let page = query_documents(&store, "hearings", &descending).await.unwrap();
    let titles: Vec<&str> = page
        .documents
        .iter()
        .filter_map(|doc| doc.str_field("title"))
        .collect();
    assert_eq!(titles, ["undated", "june", "may", "march"]);
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let store = MemoryStore::new();
    let invoice = create_document(&store, "invoices", fields(json!({"amount": 100})))
        .await
        .unwrap();

    let failing: Vec<BatchOp> = serde_json::from_value(json!([
        {"type": "create", "collection": "payments", "data": {"amount": 40}},
        {"type": "update", "collection": "invoices", "id": "missing", "data": {"status": "paid"}}
    ]))
    .unwrap();
    assert!(batch_write(&store, failing).await.is_err());
    assert_eq!(store.len("payments").await, 0);

    let ops: Vec<BatchOp> = serde_json::from_value(json!([
        {"type": "create", "collection": "payments", "data": {"amount": 40}},
        {"type": "update", "collection": "invoices", "id": invoice.id, "data": {"amountPaid": 40}},
        {"type": "delete", "collection": "alerts", "id": "stale"}
    ]))
    .unwrap();
    let ids = batch_write(&store, ops).await.expect("batch");
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[1], invoice.id);
    assert_eq!(ids[2], "stale");

    let payment = get_document(&store, "payments", &ids[0])
        .await
        .unwrap()
        .expect("payment");
    let invoice = get_document(&store, "invoices", &invoice.id)
        .await
        .unwrap()
        .expect("invoice");
    assert_eq!(payment.created_at, invoice.updated_at);
}
