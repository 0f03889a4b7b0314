//! Owner-scoped access to practice records.

use serde_json::Value;

use crate::{
    db::{DocumentStore, StoreError},
    models::{
        document::{Document, Fields, CREATED_AT_FIELD},
        query::{Filter, OrderBy, Query, QueryPage},
        record::{RecordKind, OWNER_FIELD, STATUS_FIELD},
    },
    repositories::documents,
};

#[derive(Debug, Clone, Default)]
pub struct RecordFilters {
    pub status: Option<String>,
}

/// Result of deleting a record on behalf of an owner.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted(Document),
    /// No record with that id exists; nothing was done.
    Absent,
    /// The record belongs to someone else and was left untouched.
    Foreign,
}

fn owned_by(document: &Document, owner: &str) -> bool {
    document.str_field(OWNER_FIELD) == Some(owner)
}

pub async fn create_record(
    store: &dyn DocumentStore,
    kind: RecordKind,
    owner: &str,
    mut fields: Fields,
) -> Result<Document, StoreError> {
    for (key, value) in kind.defaults() {
        fields.entry(key).or_insert(value);
    }
    fields.insert(OWNER_FIELD.to_string(), Value::String(owner.to_string()));
    documents::create_document(store, kind.collection(), fields).await
}

/// `Ok(None)` both for unknown ids and for records of another owner.
pub async fn find_record(
    store: &dyn DocumentStore,
    kind: RecordKind,
    owner: &str,
    id: &str,
) -> Result<Option<Document>, StoreError> {
    let document = documents::get_document(store, kind.collection(), id).await?;
    Ok(document.filter(|document| owned_by(document, owner)))
}

pub async fn list_records(
    store: &dyn DocumentStore,
    kind: RecordKind,
    owner: &str,
    filters: &RecordFilters,
    limit: usize,
) -> Result<QueryPage, StoreError> {
    let mut query = Query::new().filter(Filter::eq(OWNER_FIELD, owner));
    if let Some(status) = &filters.status {
        query = query.filter(Filter::eq(STATUS_FIELD, status.as_str()));
    }
    let query = query.order_by(OrderBy::desc(CREATED_AT_FIELD)).limit(limit);
    documents::query_documents(store, kind.collection(), &query).await
}

/// Applies `patch` to an owned record. The owner field cannot be changed.
/// Returns the record before and after the update.
pub async fn update_record(
    store: &dyn DocumentStore,
    kind: RecordKind,
    owner: &str,
    id: &str,
    mut patch: Fields,
) -> Result<Option<(Document, Document)>, StoreError> {
    let Some(before) = find_record(store, kind, owner, id).await? else {
        return Ok(None);
    };
    patch.remove(OWNER_FIELD);
    let after = documents::update_document(store, kind.collection(), id, patch).await?;
    Ok(after.map(|after| (before, after)))
}

pub async fn delete_record(
    store: &dyn DocumentStore,
    kind: RecordKind,
    owner: &str,
    id: &str,
) -> Result<DeleteOutcome, StoreError> {
    let Some(existing) = documents::get_document(store, kind.collection(), id).await? else {
        return Ok(DeleteOutcome::Absent);
    };
    if !owned_by(&existing, owner) {
        return Ok(DeleteOutcome::Foreign);
    }
    documents::delete_document(store, kind.collection(), id).await?;
    Ok(DeleteOutcome::Deleted(existing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn records_are_scoped_to_their_owner() {
        let store = MemoryStore::new();
        let case = create_record(
            &store,
            RecordKind::Cases,
            "u1",
            fields(json!({"title": "Doe v. Roe"})),
        )
        .await
        .expect("create");
        assert_eq!(case.str_field("status"), Some("open"));
        assert_eq!(case.str_field("owner"), Some("u1"));

        assert!(find_record(&store, RecordKind::Cases, "u2", &case.id)
            .await
            .unwrap()
            .is_none());
        assert!(update_record(
            &store,
            RecordKind::Cases,
            "u2",
            &case.id,
            fields(json!({"status": "closed"}))
        )
        .await
        .unwrap()
        .is_none());
        assert_eq!(
            delete_record(&store, RecordKind::Cases, "u2", &case.id)
                .await
                .unwrap(),
            DeleteOutcome::Foreign
        );
        assert_eq!(
            delete_record(&store, RecordKind::Cases, "u1", "missing")
                .await
                .unwrap(),
            DeleteOutcome::Absent
        );
    }

    #[tokio::test]
    async fn update_cannot_reassign_owner() {
        let store = MemoryStore::new();
        let client = create_record(
            &store,
            RecordKind::Clients,
            "u1",
            fields(json!({"name": "Acme Corp"})),
        )
        .await
        .unwrap();
        let (before, after) = update_record(
            &store,
            RecordKind::Clients,
            "u1",
            &client.id,
            fields(json!({"owner": "u2", "phone": "555-0100"})),
        )
        .await
        .unwrap()
        .expect("updated");
        assert_eq!(after.str_field("owner"), Some("u1"));
        assert_eq!(after.str_field("phone"), Some("555-0100"));
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn list_filters_by_status_newest_first() {
        let store = MemoryStore::new();
        for (title, status) in [("A", "open"), ("B", "closed"), ("C", "open")] {
            create_record(
                &store,
                RecordKind::Cases,
                "u1",
                fields(json!({"title": title, "status": status})),
            )
            .await
            .unwrap();
        }
        let filters = RecordFilters {
            status: Some("open".into()),
        };
        let page = list_records(&store, RecordKind::Cases, "u1", &filters, 50)
            .await
            .unwrap();
        let titles: Vec<&str> = page
            .documents
            .iter()
            .filter_map(|d| d.str_field("title"))
            .collect();
        assert_eq!(titles, ["C", "A"]);
        assert!(!page.index_fallback);
    }
}
