//! Activity log: an append-only audit trail of record mutations.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::{
    db::{connection::StoreHandle, StoreError, MAX_BATCH_WRITES},
    models::{
        activity::{
            ActivityRecord, EntityType, NewActivity, ACTIVITIES_COLLECTION, EXPIRES_AT_FIELD,
        },
        document::{format_timestamp, Fields, CREATED_AT_FIELD},
        query::{BatchOp, Filter, FilterOp, OrderBy, Query},
        record::OWNER_FIELD,
    },
    repositories::documents,
    utils::time::{expiry_after, now_utc},
};

#[derive(Clone)]
pub struct ActivityLogger {
    store: StoreHandle,
    retention_days: u32,
}

/// One page of the activity feed.
#[derive(Debug, Clone)]
pub struct ActivityFeed {
    pub activities: Vec<ActivityRecord>,
    pub index_fallback: bool,
}

impl ActivityLogger {
    pub fn new(store: StoreHandle, retention_days: u32) -> Self {
        Self {
            store,
            retention_days,
        }
    }

    /// Persists an activity. Never fails: store errors are logged and
    /// dropped so an audit write cannot undo a completed business operation.
    pub async fn log_activity(&self, activity: NewActivity) {
        let activity_type = activity.activity_type;
        let entity_id = activity.entity_id.clone();
        if let Err(err) = self.record(activity).await {
            tracing::warn!(
                error = %err,
                activity_type = ?activity_type,
                entity_id = %entity_id,
                "Failed to record activity"
            );
        }
    }

    /// Persists an activity and returns its id.
    pub async fn record(&self, activity: NewActivity) -> Result<String, StoreError> {
        let expires_at = expiry_after(now_utc(), self.retention_days);
        let fields = activity_fields(activity, expires_at);
        let created =
            documents::create_document(self.store.as_ref(), ACTIVITIES_COLLECTION, fields).await?;
        Ok(created.id)
    }

    /// Newest activities first for `owner`, optionally narrowed to one
    /// entity type.
    pub async fn recent(
        &self,
        owner: &str,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<ActivityFeed, StoreError> {
        let mut query = Query::new().filter(Filter::eq(OWNER_FIELD, owner));
        if let Some(entity_type) = entity_type {
            query = query.filter(Filter::eq("entityType", entity_type.as_str()));
        }
        let query = query.order_by(OrderBy::desc(CREATED_AT_FIELD)).limit(limit);

        let page =
            documents::query_documents(self.store.as_ref(), ACTIVITIES_COLLECTION, &query).await?;
        let mut activities = Vec::with_capacity(page.documents.len());
        for document in page.documents {
            let id = document.id.clone();
            match ActivityRecord::try_from(document) {
                Ok(activity) => activities.push(activity),
                Err(err) => {
                    tracing::warn!(error = %err, activity_id = %id, "Skipping unreadable activity")
                }
            }
        }
        Ok(ActivityFeed {
            activities,
            index_fallback: page.index_fallback,
        })
    }

    /// Deletes activities whose `expiresAt` is before `now` and returns how
    /// many were removed. Works through the backlog one batch-sized page at
    /// a time until a short page comes back.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let query = Query::new()
            .filter(Filter::new(
                EXPIRES_AT_FIELD,
                FilterOp::Lt,
                format_timestamp(&now),
            ))
            .limit(MAX_BATCH_WRITES);

        let mut removed = 0;
        loop {
            let page =
                documents::query_documents(self.store.as_ref(), ACTIVITIES_COLLECTION, &query)
                    .await?;
            let fetched = page.documents.len();
            let ops: Vec<BatchOp> = page
                .documents
                .into_iter()
                .map(|document| BatchOp::Delete {
                    collection: ACTIVITIES_COLLECTION.to_string(),
                    id: document.id,
                })
                .collect();
            removed += documents::batch_write(self.store.as_ref(), ops).await?.len();
            if fetched < MAX_BATCH_WRITES {
                break;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Purged expired activities");
        }
        Ok(removed)
    }

    /// Asks the backend for native expiry of activities by `createdAt`.
    pub async fn ensure_retention(&self) -> Result<(), StoreError> {
        let after = std::time::Duration::from_secs(u64::from(self.retention_days) * 86_400);
        self.store
            .ensure_expiry(ACTIVITIES_COLLECTION, CREATED_AT_FIELD, after)
            .await
    }
}

fn activity_fields(activity: NewActivity, expires_at: DateTime<Utc>) -> Fields {
    let NewActivity {
        owner,
        activity_type,
        message,
        entity_type,
        entity_id,
        metadata,
    } = activity;
    let value = json!({
        OWNER_FIELD: owner,
        "type": activity_type,
        "message": message,
        "entityType": entity_type,
        "entityId": entity_id,
        "metadata": Value::Object(metadata),
        EXPIRES_AT_FIELD: format_timestamp(&expires_at),
    });
    match value {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::activity::ActivityType;
    use chrono::Duration;
    use serde_json::Map;
    use std::sync::Arc;

    fn activity(owner: &str, entity_type: EntityType, entity_id: &str) -> NewActivity {
        NewActivity {
            owner: owner.into(),
            activity_type: ActivityType::ClientCreated,
            message: "Client \"Acme Corp\" created".into(),
            entity_type,
            entity_id: entity_id.into(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn recent_returns_newest_first_for_owner() {
        let logger = ActivityLogger::new(Arc::new(MemoryStore::new()), 90);
        logger.log_activity(activity("u1", EntityType::Client, "c1")).await;
        logger.log_activity(activity("u1", EntityType::Case, "k1")).await;
        logger.log_activity(activity("u2", EntityType::Client, "c2")).await;

        let feed = logger.recent("u1", None, 10).await.expect("feed");
        let ids: Vec<&str> = feed.activities.iter().map(|a| a.entity_id.as_str()).collect();
        assert_eq!(ids, ["k1", "c1"]);

        let clients = logger
            .recent("u1", Some(EntityType::Client), 10)
            .await
            .expect("feed");
        assert_eq!(clients.activities.len(), 1);
        assert!(clients.activities[0].expires_at.is_some());
    }

    #[tokio::test]
    async fn purge_removes_only_expired_activities() {
        let store = Arc::new(MemoryStore::new());
        let logger = ActivityLogger::new(store.clone(), 30);
        logger.log_activity(activity("u1", EntityType::Client, "c1")).await;

        assert_eq!(logger.purge_expired(now_utc()).await.unwrap(), 0);
        let later = now_utc() + Duration::days(31);
        assert_eq!(logger.purge_expired(later).await.unwrap(), 1);
        assert_eq!(store.len(ACTIVITIES_COLLECTION).await, 0);
    }

    #[tokio::test]
    async fn purge_works_through_backlogs_larger_than_a_batch() {
        let store = Arc::new(MemoryStore::new());
        let logger = ActivityLogger::new(store.clone(), 1);
        let backlog = MAX_BATCH_WRITES * 2 + 7;
        for n in 0..backlog {
            logger
                .log_activity(activity("u1", EntityType::Case, &format!("k{n}")))
                .await;
        }

        let later = now_utc() + Duration::days(2);
        assert_eq!(logger.purge_expired(later).await.unwrap(), backlog);
        assert_eq!(store.len(ACTIVITIES_COLLECTION).await, 0);
    }
}
