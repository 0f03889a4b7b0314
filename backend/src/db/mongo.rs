//! MongoDB backend.
//!
//! Documents are stored with an `ObjectId` `_id`; `createdAt`, `updatedAt`
//! and every RFC 3339 string value are stored as BSON dates so TTL indexes
//! and range filters work natively. Dates are read back as RFC 3339 strings.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, oid::ObjectId, Bson, Document as BsonDocument},
    error::{Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR},
    options::IndexOptions,
    Client, ClientSession, Collection, Database, IndexModel,
};
use serde_json::{Map, Number, Value};

use super::{DocumentStore, StoreBackend, StoreError};
use crate::models::{
    document::{format_timestamp, Document, Fields, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD},
    query::{Direction, Filter, FilterOp, PreparedWrite, Query},
};

const MONGO_ID: &str = "_id";
/// Sort exceeded the in-memory limit because no index backs it.
const SORT_MEMORY_LIMIT_CODES: [i32; 2] = [96, 292];
const WRITE_CONFLICT_CODE: i32 = 112;

pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await.map_err(classify(""))?;
        let database = client.database(database);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(classify(""))?;
        Ok(Self { client, database })
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection::<BsonDocument>(name)
    }

    async fn apply(
        &self,
        session: &mut ClientSession,
        write: PreparedWrite,
    ) -> Result<String, StoreError> {
        match write {
            PreparedWrite::Create {
                collection,
                fields,
                stamped_at,
            } => {
                let id = ObjectId::new();
                let document = encode_document(id, fields, stamped_at);
                self.collection(&collection)
                    .insert_one(document)
                    .session(&mut *session)
                    .await
                    .map_err(classify(&collection))?;
                Ok(id.to_hex())
            }
            PreparedWrite::Update {
                collection,
                id,
                fields,
                guard,
                stamped_at,
            } => {
                let missing = || StoreError::NotFound {
                    collection: collection.clone(),
                    id: id.clone(),
                };
                let oid = ObjectId::parse_str(&id).map_err(|_| missing())?;
                let mut filter = doc! { MONGO_ID: oid };
                if let Some(guard) = &guard {
                    filter.insert(
                        field_path(&guard.field),
                        filter_value(&guard.field, &guard.value),
                    );
                }
                let target = self.collection(&collection);
                let result = target
                    .update_one(filter, set_document(fields, stamped_at))
                    .session(&mut *session)
                    .await
                    .map_err(classify(&collection))?;
                if result.matched_count > 0 {
                    return Ok(id);
                }
                let exists = target
                    .find_one(doc! { MONGO_ID: oid })
                    .session(&mut *session)
                    .await
                    .map_err(classify(&collection))?
                    .is_some();
                match guard {
                    Some(guard) if exists => Err(StoreError::Conflict {
                        collection: collection.clone(),
                        detail: format!("`{}` on {id} no longer matches", guard.field),
                    }),
                    _ => Err(missing()),
                }
            }
            PreparedWrite::Delete { collection, id } => {
                if let Ok(oid) = ObjectId::parse_str(&id) {
                    self.collection(&collection)
                        .delete_one(doc! { MONGO_ID: oid })
                        .session(&mut *session)
                        .await
                        .map_err(classify(&collection))?;
                }
                Ok(id)
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Mongo
    }

    async fn insert(
        &self,
        collection: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let id = ObjectId::new();
        self.collection(collection)
            .insert_one(encode_document(id, fields, stamped_at))
            .await
            .map_err(classify(collection))?;
        Ok(id.to_hex())
    }

    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let Ok(oid) = ObjectId::parse_str(id) else {
            return Ok(None);
        };
        let found = self
            .collection(collection)
            .find_one(doc! { MONGO_ID: oid })
            .await
            .map_err(classify(collection))?;
        found.map(decode_document).transpose()
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Ok(oid) = ObjectId::parse_str(id) else {
            return Ok(false);
        };
        let result = self
            .collection(collection)
            .update_one(doc! { MONGO_ID: oid }, set_document(fields, stamped_at))
            .await
            .map_err(classify(collection))?;
        Ok(result.matched_count > 0)
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let Ok(oid) = ObjectId::parse_str(id) else {
            return Ok(());
        };
        self.collection(collection)
            .delete_one(doc! { MONGO_ID: oid })
            .await
            .map_err(classify(collection))?;
        Ok(())
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let filter = encode_filters(&query.filters)?;
        let target = self.collection(collection);
        let mut find = target.find(filter);
        if let Some(order) = &query.order_by {
            let direction = match order.direction {
                Direction::Asc => 1,
                Direction::Desc => -1,
            };
            let mut sort = BsonDocument::new();
            sort.insert(field_path(&order.field), direction);
            find = find.sort(sort);
        }
        if let Some(limit) = query.limit {
            find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let cursor = find.await.map_err(classify(collection))?;
        let documents: Vec<BsonDocument> =
            cursor.try_collect().await.map_err(classify(collection))?;
        documents.into_iter().map(decode_document).collect()
    }

    /// Runs the writes in a multi-document transaction; requires a replica
    /// set or sharded cluster.
    async fn commit(&self, writes: Vec<PreparedWrite>) -> Result<Vec<String>, StoreError> {
        let mut session = self.client.start_session().await.map_err(classify(""))?;
        session.start_transaction().await.map_err(classify(""))?;

        let mut ids = Vec::with_capacity(writes.len());
        for write in writes {
            match self.apply(&mut session, write).await {
                Ok(id) => ids.push(id),
                Err(err) => {
                    if let Err(abort) = session.abort_transaction().await {
                        tracing::warn!(error = %abort, "Failed to abort Mongo transaction");
                    }
                    return Err(err);
                }
            }
        }

        session.commit_transaction().await.map_err(classify(""))?;
        Ok(ids)
    }

    async fn ensure_expiry(
        &self,
        collection: &str,
        field: &str,
        after: Duration,
    ) -> Result<(), StoreError> {
        let mut keys = BsonDocument::new();
        keys.insert(field, 1);
        let options = IndexOptions::builder()
            .expire_after(after)
            .name(format!("{field}_ttl"))
            .build();
        let model = IndexModel::builder().keys(keys).options(options).build();
        self.collection(collection)
            .create_index(model)
            .await
            .map_err(classify(collection))?;
        tracing::info!(collection, field, ttl_secs = after.as_secs(), "Mongo TTL index ensured");
        Ok(())
    }
}

fn classify(collection: &str) -> impl Fn(MongoError) -> StoreError + '_ {
    move |err| {
        if let ErrorKind::Command(command) = err.kind.as_ref() {
            if let Some(classified) = classify_command(collection, command.code, &command.message) {
                return classified;
            }
        }
        if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
            return StoreError::Conflict {
                collection: collection.to_string(),
                detail: err.to_string(),
            };
        }
        StoreError::backend(err)
    }
}

/// Server command failures with a typed meaning; `None` for the rest.
fn classify_command(collection: &str, code: i32, message: &str) -> Option<StoreError> {
    if SORT_MEMORY_LIMIT_CODES.contains(&code) {
        Some(StoreError::IndexMissing {
            collection: collection.to_string(),
            detail: message.to_string(),
        })
    } else if code == WRITE_CONFLICT_CODE {
        Some(StoreError::Conflict {
            collection: collection.to_string(),
            detail: message.to_string(),
        })
    } else {
        None
    }
}

fn field_path(field: &str) -> &str {
    if field == ID_FIELD {
        MONGO_ID
    } else {
        field
    }
}

fn to_bson_date(at: DateTime<Utc>) -> Bson {
    Bson::DateTime(bson::DateTime::from_millis(at.timestamp_millis()))
}

fn encode_document(id: ObjectId, fields: Fields, stamped_at: DateTime<Utc>) -> BsonDocument {
    let mut document = BsonDocument::new();
    document.insert(MONGO_ID, id);
    for (key, value) in fields {
        document.insert(key, json_to_bson(value));
    }
    document.insert(CREATED_AT_FIELD, to_bson_date(stamped_at));
    document.insert(UPDATED_AT_FIELD, to_bson_date(stamped_at));
    document
}

fn set_document(fields: Fields, stamped_at: DateTime<Utc>) -> BsonDocument {
    let mut set = BsonDocument::new();
    for (key, value) in fields {
        set.insert(key, json_to_bson(value));
    }
    set.insert(UPDATED_AT_FIELD, to_bson_date(stamped_at));
    doc! { "$set": set }
}

fn decode_document(mut raw: BsonDocument) -> Result<Document, StoreError> {
    let id = match raw.remove(MONGO_ID) {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(id)) => id,
        other => {
            return Err(StoreError::Backend(format!(
                "document has unusable _id: {other:?}"
            )))
        }
    };
    let created_at = take_timestamp(&mut raw, CREATED_AT_FIELD)?;
    let updated_at = take_timestamp(&mut raw, UPDATED_AT_FIELD)?;
    let fields = raw
        .into_iter()
        .map(|(key, value)| (key, bson_to_json(value)))
        .collect();
    Ok(Document {
        id,
        fields,
        created_at,
        updated_at,
    })
}

fn take_timestamp(raw: &mut BsonDocument, field: &str) -> Result<DateTime<Utc>, StoreError> {
    match raw.remove(field) {
        Some(Bson::DateTime(at)) => from_bson_date(at),
        Some(Bson::String(text)) => DateTime::parse_from_rfc3339(&text)
            .map(|at| at.with_timezone(&Utc))
            .map_err(StoreError::backend),
        other => Err(StoreError::Backend(format!(
            "document has unusable {field}: {other:?}"
        ))),
    }
}

fn from_bson_date(at: bson::DateTime) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {at}")))
}

fn json_to_bson(value: Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(flag),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => Bson::Int64(integer),
            None => Bson::Double(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => match DateTime::parse_from_rfc3339(&text) {
            Ok(at) => to_bson_date(at.with_timezone(&Utc)),
            Err(_) => Bson::String(text),
        },
        Value::Array(items) => Bson::Array(items.into_iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut document = BsonDocument::new();
            for (key, value) in map {
                document.insert(key, json_to_bson(value));
            }
            Bson::Document(document)
        }
    }
}

fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(flag) => Value::Bool(flag),
        Bson::Int32(integer) => Value::from(integer),
        Bson::Int64(integer) => Value::from(integer),
        Bson::Double(float) => Number::from_f64(float)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(text) => Value::String(text),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(at) => from_bson_date(at)
            .map(|at| Value::String(format_timestamp(&at)))
            .unwrap_or_else(|_| Bson::DateTime(at).into_relaxed_extjson()),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(document) => Value::Object(
            document
                .into_iter()
                .map(|(key, value)| (key, bson_to_json(value)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.into_relaxed_extjson(),
    }
}

fn filter_value(field: &str, value: &Value) -> Bson {
    if field == ID_FIELD {
        if let Some(oid) = value.as_str().and_then(|id| ObjectId::parse_str(id).ok()) {
            return Bson::ObjectId(oid);
        }
    }
    json_to_bson(value.clone())
}

fn filter_values(filter: &Filter) -> Result<Bson, StoreError> {
    let Value::Array(items) = &filter.value else {
        return Err(StoreError::InvalidQuery(format!(
            "operator on `{}` expects an array value",
            filter.field
        )));
    };
    Ok(Bson::Array(
        items
            .iter()
            .map(|item| filter_value(&filter.field, item))
            .collect(),
    ))
}

/// Translates AND-combined filters into a Mongo filter document. `!=` and
/// `not-in` also require the field to exist, matching Firestore.
fn encode_filters(filters: &[Filter]) -> Result<BsonDocument, StoreError> {
    let mut clauses = Vec::with_capacity(filters.len());
    for filter in filters {
        let value = filter_value(&filter.field, &filter.value);
        let condition = match filter.operator {
            FilterOp::Eq | FilterOp::ArrayContains => doc! { "$eq": value },
            FilterOp::NotEq => doc! { "$exists": true, "$ne": value },
            FilterOp::Lt => doc! { "$lt": value },
            FilterOp::Lte => doc! { "$lte": value },
            FilterOp::Gt => doc! { "$gt": value },
            FilterOp::Gte => doc! { "$gte": value },
            FilterOp::In | FilterOp::ArrayContainsAny => doc! { "$in": filter_values(filter)? },
            FilterOp::NotIn => doc! { "$exists": true, "$nin": filter_values(filter)? },
        };
        let mut clause = BsonDocument::new();
        clause.insert(field_path(&filter.field), condition);
        clauses.push(Bson::Document(clause));
    }
    Ok(match clauses.len() {
        0 => BsonDocument::new(),
        _ => doc! { "$and": clauses },
    })
}
