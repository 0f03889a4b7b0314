//! Generic document access over any [`DocumentStore`].
//!
//! This layer owns timestamps and the handling of undefined fields; stores
//! only persist what they are given.

use crate::{
    db::{DocumentStore, StoreError, MAX_BATCH_WRITES},
    models::{
        document::{strip_undefined, Document, Fields},
        query::{BatchOp, Query, QueryPage},
    },
    utils::time::next_write_stamp,
};

/// Inserts `fields` and returns the stored record with its generated id and
/// `createdAt == updatedAt`.
pub async fn create_document(
    store: &dyn DocumentStore,
    collection: &str,
    fields: Fields,
) -> Result<Document, StoreError> {
    let fields = strip_undefined(fields);
    let stamped_at = next_write_stamp();
    let id = store.insert(collection, fields.clone(), stamped_at).await?;
    Ok(Document {
        id,
        fields,
        created_at: stamped_at,
        updated_at: stamped_at,
    })
}

pub async fn get_document(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<Document>, StoreError> {
    store.fetch(collection, id).await
}

/// Merges `fields` into the record and returns it as stored afterwards.
/// `Ok(None)` when the record does not exist.
pub async fn update_document(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    fields: Fields,
) -> Result<Option<Document>, StoreError> {
    let fields = strip_undefined(fields);
    if !store.merge(collection, id, fields, next_write_stamp()).await? {
        return Ok(None);
    }
    store.fetch(collection, id).await
}

/// Always `Ok(true)` unless the store fails; deleting a missing record is
/// not an error.
pub async fn delete_document(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<bool, StoreError> {
    store.remove(collection, id).await?;
    Ok(true)
}

/// Runs `query`. When the store lacks the composite index for the
/// filter + order combination, the same filters and limit are re-run without
/// ordering and the page is sorted in memory; `index_fallback` reports it.
pub async fn query_documents(
    store: &dyn DocumentStore,
    collection: &str,
    query: &Query,
) -> Result<QueryPage, StoreError> {
    match store.find(collection, query).await {
        Ok(documents) => Ok(QueryPage {
            documents,
            index_fallback: false,
        }),
        Err(StoreError::IndexMissing { detail, .. }) if query.order_by.is_some() => {
            tracing::warn!(
                collection,
                fields = ?query.indexed_fields(),
                detail = %detail,
                "Composite index missing; sorting unordered page in memory"
            );
            let mut documents = store.find(collection, &query.without_order()).await?;
            if let Some(order) = &query.order_by {
                order.sort(&mut documents);
            }
            Ok(QueryPage {
                documents,
                index_fallback: true,
            })
        }
        Err(err) => Err(err),
    }
}

/// Applies `ops` atomically. Creates and updates share one write stamp.
/// Returns the affected ids in order, including generated ids for creates.
/// At most [`MAX_BATCH_WRITES`] operations per call.
pub async fn batch_write(
    store: &dyn DocumentStore,
    ops: Vec<BatchOp>,
) -> Result<Vec<String>, StoreError> {
    if ops.is_empty() {
        return Ok(Vec::new());
    }
    if ops.len() > MAX_BATCH_WRITES {
        return Err(StoreError::InvalidQuery(format!(
            "batch of {} writes exceeds the limit of {MAX_BATCH_WRITES}",
            ops.len()
        )));
    }
    let stamped_at = next_write_stamp();
    let writes = ops.into_iter().map(|op| op.prepare(stamped_at)).collect();
    store.commit(writes).await
}
