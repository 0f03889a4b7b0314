//! Firestore backend over the Firestore REST API.
//!
//! Documents are addressed as `{collection}/{id}` under the default
//! database. Ids are generated client-side so batched creates can report
//! them. RFC 3339 strings are written as `timestampValue` (TTL policies and
//! range filters need native timestamps) and read back as RFC 3339 strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{DocumentStore, StoreBackend, StoreError};
use crate::models::{
    document::{format_timestamp, Document, Fields, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD},
    query::{Direction, Filter, FilterOp, Guard, PreparedWrite, Query},
};

const PRODUCTION_HOST: &str = "https://firestore.googleapis.com";
const NAME_FIELD_PATH: &str = "__name__";

#[derive(Debug, Clone)]
pub struct FirestoreSettings {
    pub project_id: String,
    /// `host:port` of a local emulator; requests then go over plain HTTP
    /// without credentials.
    pub emulator_host: Option<String>,
    /// OAuth2 bearer token for production access.
    pub access_token: Option<String>,
}

pub struct FirestoreStore {
    http: Client,
    settings: FirestoreSettings,
    /// `https://host/v1/projects/{p}/databases/(default)/documents`
    documents_url: String,
    /// `projects/{p}/databases/(default)/documents`
    documents_path: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<RestDocument>,
    error: Option<ErrorStatus>,
}

#[derive(Debug, Deserialize)]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    transaction: String,
}

impl FirestoreStore {
    pub fn new(settings: FirestoreSettings) -> Self {
        let host = settings
            .emulator_host
            .as_ref()
            .map(|host| format!("http://{host}"))
            .unwrap_or_else(|| PRODUCTION_HOST.to_string());
        let documents_path = format!(
            "projects/{}/databases/(default)/documents",
            settings.project_id
        );
        Self {
            http: Client::new(),
            documents_url: format!("{host}/v1/{documents_path}"),
            documents_path,
            settings,
        }
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.documents_path)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.documents_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.settings.emulator_host, &self.settings.access_token) {
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        self.authorize(request)
            .send()
            .await
            .map_err(StoreError::backend)
    }

    async fn commit_writes(
        &self,
        writes: Vec<Value>,
        transaction: Option<&str>,
    ) -> Result<(), StoreError> {
        let url = format!("{}:commit", self.documents_url);
        let mut body = json!({ "writes": writes });
        if let Some(transaction) = transaction {
            body["transaction"] = Value::String(transaction.to_string());
        }
        let response = self.send(self.http.post(url).json(&body)).await?;
        let response = ensure_success(response, "").await?;
        response
            .json::<CommitResponse>()
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<String, StoreError> {
        let url = format!("{}:beginTransaction", self.documents_url);
        let body = json!({ "options": { "readWrite": {} } });
        let response = self.send(self.http.post(url).json(&body)).await?;
        let response = ensure_success(response, "").await?;
        let begun = response
            .json::<TransactionResponse>()
            .await
            .map_err(StoreError::backend)?;
        Ok(begun.transaction)
    }

    async fn rollback(&self, transaction: &str) {
        let url = format!("{}:rollback", self.documents_url);
        let body = json!({ "transaction": transaction });
        let outcome = match self.send(self.http.post(url).json(&body)).await {
            Ok(response) => ensure_success(response, "").await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            tracing::warn!(error = %err, "Failed to roll back Firestore transaction");
        }
    }

    async fn read(
        &self,
        collection: &str,
        id: &str,
        transaction: Option<&str>,
    ) -> Result<Option<Document>, StoreError> {
        if !valid_id(id) {
            return Ok(None);
        }
        let mut request = self.http.get(self.document_url(collection, id));
        if let Some(transaction) = transaction {
            request = request.query(&[("transaction", transaction)]);
        }
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, collection).await?;
        let document = response
            .json::<RestDocument>()
            .await
            .map_err(StoreError::backend)?;
        decode_document(document).map(Some)
    }

    /// Reads every guarded document inside `transaction`, which locks them
    /// until the commit.
    async fn check_guards(
        &self,
        guarded: &[(String, String, Guard)],
        transaction: &str,
    ) -> Result<(), StoreError> {
        for (collection, id, guard) in guarded {
            let Some(document) = self.read(collection, id, Some(transaction)).await? else {
                return Err(StoreError::NotFound {
                    collection: collection.clone(),
                    id: id.clone(),
                });
            };
            if !guard.holds(&document.fields) {
                return Err(StoreError::Conflict {
                    collection: collection.clone(),
                    detail: format!("`{}` on {id} no longer matches", guard.field),
                });
            }
        }
        Ok(())
    }

    fn encode_write(&self, write: PreparedWrite) -> (String, Value) {
        match write {
            PreparedWrite::Create {
                collection,
                fields,
                stamped_at,
            } => {
                let id = new_id();
                let write = json!({
                    "update": {
                        "name": self.document_name(&collection, &id),
                        "fields": encode_fields(fields, Some(stamped_at), stamped_at),
                    },
                    "currentDocument": { "exists": false },
                });
                (id, write)
            }
            PreparedWrite::Update {
                collection,
                id,
                fields,
                stamped_at,
                ..
            } => {
                let mask = update_mask(&fields);
                let write = json!({
                    "update": {
                        "name": self.document_name(&collection, &id),
                        "fields": encode_fields(fields, None, stamped_at),
                    },
                    "updateMask": { "fieldPaths": mask },
                    "currentDocument": { "exists": true },
                });
                (id, write)
            }
            PreparedWrite::Delete { collection, id } => {
                let write = json!({ "delete": self.document_name(&collection, &id) });
                (id, write)
            }
        }
    }

    fn encode_query(&self, collection: &str, query: &Query) -> Result<Value, StoreError> {
        let mut structured = Map::new();
        structured.insert("from".into(), json!([{ "collectionId": collection }]));

        let mut clauses = Vec::with_capacity(query.filters.len());
        for filter in &query.filters {
            clauses.push(self.encode_filter(collection, filter)?);
        }
        match clauses.len() {
            0 => {}
            1 => {
                structured.insert("where".into(), clauses.remove(0));
            }
            _ => {
                structured.insert(
                    "where".into(),
                    json!({ "compositeFilter": { "op": "AND", "filters": clauses } }),
                );
            }
        }

        if let Some(order) = &query.order_by {
            let direction = match order.direction {
                Direction::Asc => "ASCENDING",
                Direction::Desc => "DESCENDING",
            };
            structured.insert(
                "orderBy".into(),
                json!([{ "field": { "fieldPath": field_path(&order.field) }, "direction": direction }]),
            );
        }
        if let Some(limit) = query.limit {
            structured.insert("limit".into(), json!(limit));
        }
        Ok(json!({ "structuredQuery": structured }))
    }

    fn encode_filter(&self, collection: &str, filter: &Filter) -> Result<Value, StoreError> {
        let op = match filter.operator {
            FilterOp::Eq => "EQUAL",
            FilterOp::NotEq => "NOT_EQUAL",
            FilterOp::Lt => "LESS_THAN",
            FilterOp::Lte => "LESS_THAN_OR_EQUAL",
            FilterOp::Gt => "GREATER_THAN",
            FilterOp::Gte => "GREATER_THAN_OR_EQUAL",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT_IN",
            FilterOp::ArrayContains => "ARRAY_CONTAINS",
            FilterOp::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
        };
        let takes_array = matches!(
            filter.operator,
            FilterOp::In | FilterOp::NotIn | FilterOp::ArrayContainsAny
        );
        if takes_array && !filter.value.is_array() {
            return Err(StoreError::InvalidQuery(format!(
                "operator on `{}` expects an array value",
                filter.field
            )));
        }

        let value = if filter.field == ID_FIELD {
            self.encode_reference(collection, &filter.value)
        } else {
            encode_value(filter.value.clone())
        };
        Ok(json!({
            "fieldFilter": {
                "field": { "fieldPath": field_path(&filter.field) },
                "op": op,
                "value": value,
            }
        }))
    }

    fn encode_reference(&self, collection: &str, value: &Value) -> Value {
        match value {
            Value::String(id) => json!({ "referenceValue": self.document_name(collection, id) }),
            Value::Array(ids) => json!({
                "arrayValue": {
                    "values": ids
                        .iter()
                        .map(|id| self.encode_reference(collection, id))
                        .collect::<Vec<_>>()
                }
            }),
            other => encode_value(other.clone()),
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Firestore
    }

    async fn insert(
        &self,
        collection: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let id = new_id();
        let url = format!("{}/{collection}", self.documents_url);
        let body = json!({ "fields": encode_fields(fields, Some(stamped_at), stamped_at) });
        let response = self
            .send(self.http.post(url).query(&[("documentId", &id)]).json(&body))
            .await?;
        ensure_success(response, collection).await?;
        Ok(id)
    }

    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.read(collection, id, None).await
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if !valid_id(id) {
            return Ok(false);
        }
        let mut query: Vec<(&str, String)> = update_mask(&fields)
            .into_iter()
            .map(|path| ("updateMask.fieldPaths", path))
            .collect();
        query.push(("currentDocument.exists", "true".to_string()));

        let body = json!({ "fields": encode_fields(fields, None, stamped_at) });
        let response = self
            .send(
                self.http
                    .patch(self.document_url(collection, id))
                    .query(&query)
                    .json(&body),
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response, collection).await?;
        Ok(true)
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        if !valid_id(id) {
            return Ok(());
        }
        let response = self
            .send(self.http.delete(self.document_url(collection, id)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response, collection).await?;
        Ok(())
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let body = self.encode_query(collection, query)?;
        let url = format!("{}:runQuery", self.documents_url);
        let response = self.send(self.http.post(url).json(&body)).await?;
        let response = ensure_success(response, collection).await?;
        let items = response
            .json::<Vec<RunQueryItem>>()
            .await
            .map_err(StoreError::backend)?;

        let mut documents = Vec::with_capacity(items.len());
        for item in items {
            if let Some(status) = item.error {
                return Err(classify_status(collection, status));
            }
            if let Some(document) = item.document {
                documents.push(decode_document(document)?);
            }
        }
        Ok(documents)
    }

    /// Unguarded batches go straight to `:commit`. Batches with a guarded
    /// update run in a read-write transaction; Firestore answers `ABORTED`
    /// when another transaction got to the documents first.
    async fn commit(&self, writes: Vec<PreparedWrite>) -> Result<Vec<String>, StoreError> {
        let guarded: Vec<(String, String, Guard)> = writes
            .iter()
            .filter_map(|write| match write {
                PreparedWrite::Update {
                    collection,
                    id,
                    guard: Some(guard),
                    ..
                } => Some((collection.clone(), id.clone(), guard.clone())),
                _ => None,
            })
            .collect();
        let (ids, encoded): (Vec<String>, Vec<Value>) = writes
            .into_iter()
            .map(|write| self.encode_write(write))
            .unzip();

        if guarded.is_empty() {
            self.commit_writes(encoded, None).await?;
            return Ok(ids);
        }
        let transaction = self.begin_transaction().await?;
        if let Err(err) = self.check_guards(&guarded, &transaction).await {
            self.rollback(&transaction).await;
            return Err(err);
        }
        self.commit_writes(encoded, Some(&transaction)).await?;
        Ok(ids)
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains('/') && id != "." && id != ".."
}

async fn ensure_success(response: Response, collection: &str) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error)
        .or_else(|_| {
            serde_json::from_str::<Vec<ErrorEnvelope>>(&body)
                .map_err(|_| ())
                .and_then(|mut items| items.pop().map(|envelope| envelope.error).ok_or(()))
        }) {
        Ok(error) => Err(classify_status(collection, error)),
        Err(_) => Err(StoreError::Backend(format!(
            "firestore responded {status}: {body}"
        ))),
    }
}

fn classify_status(collection: &str, error: ErrorStatus) -> StoreError {
    let mentions_index = error.message.to_ascii_lowercase().contains("index");
    match error.status.as_str() {
        "FAILED_PRECONDITION" if mentions_index => StoreError::IndexMissing {
            collection: collection.to_string(),
            detail: error.message,
        },
        "NOT_FOUND" => StoreError::NotFound {
            collection: collection.to_string(),
            id: error.message,
        },
        "INVALID_ARGUMENT" => StoreError::InvalidQuery(error.message),
        "ABORTED" => StoreError::Conflict {
            collection: collection.to_string(),
            detail: error.message,
        },
        status => StoreError::Backend(format!("{status}: {}", error.message)),
    }
}

fn field_path(field: &str) -> String {
    if field == ID_FIELD {
        return NAME_FIELD_PATH.to_string();
    }
    let simple = field
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn update_mask(fields: &Fields) -> Vec<String> {
    fields
        .keys()
        .map(|key| field_path(key))
        .chain(std::iter::once(UPDATED_AT_FIELD.to_string()))
        .collect()
}

fn encode_timestamp(at: &DateTime<Utc>) -> Value {
    json!({ "timestampValue": format_timestamp(at) })
}

fn encode_fields(
    fields: Fields,
    created_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
) -> Value {
    let mut encoded: Map<String, Value> = fields
        .into_iter()
        .map(|(key, value)| (key, encode_value(value)))
        .collect();
    if let Some(created_at) = created_at {
        encoded.insert(CREATED_AT_FIELD.into(), encode_timestamp(&created_at));
    }
    encoded.insert(UPDATED_AT_FIELD.into(), encode_timestamp(&updated_at));
    Value::Object(encoded)
}

fn encode_value(value: Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => json!({ "integerValue": integer.to_string() }),
            None => json!({ "doubleValue": number.as_f64() }),
        },
        Value::String(text) => match DateTime::parse_from_rfc3339(&text) {
            Ok(at) => encode_timestamp(&at.with_timezone(&Utc)),
            Err(_) => json!({ "stringValue": text }),
        },
        Value::Array(items) => json!({
            "arrayValue": { "values": items.into_iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({
            "mapValue": {
                "fields": map
                    .into_iter()
                    .map(|(key, value)| (key, encode_value(value)))
                    .collect::<Map<String, Value>>()
            }
        }),
    }
}

fn decode_value(value: Value) -> Value {
    let Value::Object(mut typed) = value else {
        return Value::Null;
    };
    if let Some(text) = typed.remove("integerValue") {
        return text
            .as_str()
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or(text);
    }
    if let Some(timestamp) = typed.remove("timestampValue") {
        return timestamp
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| Value::String(format_timestamp(&at.with_timezone(&Utc))))
            .unwrap_or(timestamp);
    }
    if let Some(reference) = typed.remove("referenceValue") {
        return reference;
    }
    if let Some(array) = typed.remove("arrayValue") {
        let values = array
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        return Value::Array(values.into_iter().map(decode_value).collect());
    }
    if let Some(map) = typed.remove("mapValue") {
        let fields = map
            .get("fields")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        return Value::Object(
            fields
                .into_iter()
                .map(|(key, value)| (key, decode_value(value)))
                .collect(),
        );
    }
    ["booleanValue", "doubleValue", "stringValue", "bytesValue", "geoPointValue"]
        .into_iter()
        .find_map(|kind| typed.remove(kind))
        .unwrap_or(Value::Null)
}

fn decode_document(document: RestDocument) -> Result<Document, StoreError> {
    let id = document
        .name
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::Backend(format!("unusable document name {}", document.name)))?
        .to_string();

    let mut fields: Fields = document
        .fields
        .into_iter()
        .map(|(key, value)| (key, decode_value(value)))
        .collect();
    let created_at = take_timestamp(&mut fields, CREATED_AT_FIELD)?;
    let updated_at = take_timestamp(&mut fields, UPDATED_AT_FIELD)?;
    Ok(Document {
        id,
        fields,
        created_at,
        updated_at,
    })
}

fn take_timestamp(fields: &mut Fields, field: &str) -> Result<DateTime<Utc>, StoreError> {
    fields
        .remove(field)
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| StoreError::Backend(format!("document is missing {field}")))
}
