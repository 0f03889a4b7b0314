//! In-process document store used for development and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DocumentStore, StoreBackend, StoreError};
use crate::models::{
    document::{Document, Fields},
    query::{PreparedWrite, Query},
};

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// Composite index declared on a collection, as a set of field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeIndex {
    pub collection: String,
    pub fields: Vec<String>,
}

impl CompositeIndex {
    pub fn new(collection: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            collection: collection.into(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }

    fn covers(&self, collection: &str, fields: &[String]) -> bool {
        self.collection == collection
            && self.fields.len() == fields.len()
            && fields.iter().all(|field| self.fields.contains(field))
    }
}

/// Documents live in per-collection maps keyed by id, so unordered queries
/// return documents in id order.
///
/// With [`MemoryStore::with_index_policy`] the store behaves like Firestore:
/// an ordered query that also filters on another field is rejected with
/// [`StoreError::IndexMissing`] unless a matching [`CompositeIndex`] exists.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    index_policy: Option<Vec<CompositeIndex>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index_policy(indexes: Vec<CompositeIndex>) -> Self {
        Self {
            collections: RwLock::default(),
            index_policy: Some(indexes),
        }
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    fn check_index(&self, collection: &str, query: &Query) -> Result<(), StoreError> {
        let (Some(indexes), Some(order)) = (&self.index_policy, &query.order_by) else {
            return Ok(());
        };
        let fields = query.indexed_fields();
        let single_field = fields.len() == 1 && fields[0] == order.field;
        if single_field || indexes.iter().any(|index| index.covers(collection, &fields)) {
            return Ok(());
        }
        Err(StoreError::IndexMissing {
            collection: collection.to_string(),
            detail: format!("no composite index on ({})", fields.join(", ")),
        })
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn merge_into(document: &mut Document, fields: Fields, stamped_at: DateTime<Utc>) {
    document.fields.extend(fields);
    document.updated_at = stamped_at;
}

fn apply(collections: &mut Collections, write: PreparedWrite) -> Result<String, StoreError> {
    match write {
        PreparedWrite::Create {
            collection,
            fields,
            stamped_at,
        } => {
            let id = new_id();
            let document = Document {
                id: id.clone(),
                fields,
                created_at: stamped_at,
                updated_at: stamped_at,
            };
            collections
                .entry(collection)
                .or_default()
                .insert(id.clone(), document);
            Ok(id)
        }
        PreparedWrite::Update {
            collection,
            id,
            fields,
            guard,
            stamped_at,
        } => {
            let Some(document) = collections
                .get_mut(&collection)
                .and_then(|documents| documents.get_mut(&id))
            else {
                return Err(StoreError::NotFound { collection, id });
            };
            if let Some(guard) = guard.filter(|guard| !guard.holds(&document.fields)) {
                return Err(StoreError::Conflict {
                    detail: format!("`{}` on {id} no longer matches", guard.field),
                    collection,
                });
            }
            merge_into(document, fields, stamped_at);
            Ok(id)
        }
        PreparedWrite::Delete { collection, id } => {
            if let Some(documents) = collections.get_mut(&collection) {
                documents.remove(&id);
            }
            Ok(id)
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn insert(
        &self,
        collection: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let mut collections = self.collections.write().await;
        apply(
            &mut collections,
            PreparedWrite::Create {
                collection: collection.to_string(),
                fields,
                stamped_at,
            },
        )
    }

    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        match collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
        {
            Some(document) => {
                merge_into(document, fields, stamped_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if let Some(documents) = collections.get_mut(collection) {
            documents.remove(id);
        }
        Ok(())
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.check_index(collection, query)?;

        let collections = self.collections.read().await;
        let mut matches: Vec<Document> = collections
            .get(collection)
            .map(|documents| {
                documents
                    .values()
                    .filter(|document| query.filters.iter().all(|filter| filter.matches(document)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            order.sort(&mut matches);
        }
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn commit(&self, writes: Vec<PreparedWrite>) -> Result<Vec<String>, StoreError> {
        let mut collections = self.collections.write().await;
        // Applied to a scratch copy; the live map only changes if every write succeeds.
        let mut staged = collections.clone();
        let ids = writes
            .into_iter()
            .map(|write| apply(&mut staged, write))
            .collect::<Result<Vec<_>, _>>()?;
        *collections = staged;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::query::{Filter, Guard, OrderBy};
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().expect("object")
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_fetch_merge_remove() {
        let store = MemoryStore::new();
        let id = store
            .insert("clients", fields(json!({"name": "Acme Corp"})), at(0))
            .await
            .expect("insert");

        let stored = store.fetch("clients", &id).await.unwrap().expect("stored");
        assert_eq!(stored.created_at, stored.updated_at);

        assert!(store
            .merge("clients", &id, fields(json!({"phone": "555"})), at(5))
            .await
            .unwrap());
        let merged = store.fetch("clients", &id).await.unwrap().expect("merged");
        assert_eq!(merged.str_field("name"), Some("Acme Corp"));
        assert_eq!(merged.str_field("phone"), Some("555"));
        assert_eq!(merged.updated_at, at(5));

        assert!(!store
            .merge("clients", "missing", Fields::new(), at(6))
            .await
            .unwrap());

        store.remove("clients", &id).await.unwrap();
        store.remove("clients", &id).await.unwrap();
        assert!(store.fetch("clients", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn index_policy_rejects_unindexed_ordered_queries() {
        let store = MemoryStore::with_index_policy(vec![CompositeIndex::new(
            "cases",
            &["owner", "createdAt"],
        )]);
        let ordered = Query::new()
            .filter(Filter::eq("owner", "u1"))
            .order_by(OrderBy::desc("createdAt"));
        assert!(store.find("cases", &ordered).await.is_ok());

        let unindexed = Query::new()
            .filter(Filter::eq("owner", "u1"))
            .order_by(OrderBy::asc("hearingDate"));
        let err = store.find("hearings", &unindexed).await.unwrap_err();
        assert!(err.is_index_missing());

        assert!(store.find("hearings", &unindexed.without_order()).await.is_ok());
        let single = Query::new().order_by(OrderBy::asc("hearingDate"));
        assert!(store.find("hearings", &single).await.is_ok());
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing() {
        let store = MemoryStore::new();
        let id = store
            .insert("invoices", fields(json!({"amount": 100})), at(0))
            .await
            .unwrap();

        let failing = vec![
            PreparedWrite::Create {
                collection: "payments".into(),
                fields: fields(json!({"amount": 40})),
                stamped_at: at(1),
            },
            PreparedWrite::Update {
                collection: "invoices".into(),
                id: "missing".into(),
                fields: fields(json!({"status": "paid"})),
                guard: None,
                stamped_at: at(1),
            },
        ];
        let err = store.commit(failing).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(store.len("payments").await, 0);

        let ids = store
            .commit(vec![
                PreparedWrite::Create {
                    collection: "payments".into(),
                    fields: fields(json!({"amount": 40})),
                    stamped_at: at(2),
                },
                PreparedWrite::Update {
                    collection: "invoices".into(),
                    id: id.clone(),
                    fields: fields(json!({"amountPaid": 40})),
                    guard: Some(Guard::new("amountPaid", Value::Null)),
                    stamped_at: at(2),
                },
            ])
            .await
            .expect("commit");
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1], id);
        assert_eq!(store.len("payments").await, 1);
    }

    #[tokio::test]
    async fn stale_guard_rejects_the_whole_batch() {
        let store = MemoryStore::new();
        let id = store
            .insert("invoices", fields(json!({"amount": 100, "amountPaid": 40})), at(0))
            .await
            .unwrap();

        let err = store
            .commit(vec![
                PreparedWrite::Create {
                    collection: "payments".into(),
                    fields: fields(json!({"amount": 40})),
                    stamped_at: at(1),
                },
                PreparedWrite::Update {
                    collection: "invoices".into(),
                    id: id.clone(),
                    fields: fields(json!({"amountPaid": 40})),
                    guard: Some(Guard::new("amountPaid", Value::Null)),
                    stamped_at: at(1),
                },
            ])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.len("payments").await, 0);
        let invoice = store.fetch("invoices", &id).await.unwrap().expect("invoice");
        assert_eq!(invoice.f64_field("amountPaid"), Some(40.0));
    }
}
