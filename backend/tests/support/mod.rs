#![allow(dead_code)]
use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use caseledger_backend::{
    app::build_app,
    config::Config,
    db::{memory::MemoryStore, DocumentStore, StoreBackend, StoreError},
    models::{
        activity::ACTIVITIES_COLLECTION,
        document::{Document, Fields},
        query::{PreparedWrite, Query},
        user::User,
    },
    repositories::users,
    state::AppState,
    utils::{jwt::create_session_token, password::hash_password},
};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub const TEST_PASSWORD: &str = "correct-horse-42";

pub fn test_config() -> Config {
    Config {
        jwt_secret: "a_secure_token_that_is_long_enough_123".into(),
        jwt_expiration_hours: 1,
        ..Config::default()
    }
}

pub fn test_app(store: Arc<dyn DocumentStore>) -> Router {
    build_app(AppState::new(store, test_config()))
}

pub async fn seed_user(store: &dyn DocumentStore, email: &str) -> User {
    let password_hash = hash_password(TEST_PASSWORD).expect("hash password");
    users::create_user(store, email, "Test Counsel", &password_hash)
        .await
        .expect("seed user")
}

pub fn create_test_token(user: &User) -> String {
    let config = test_config();
    create_session_token(
        user.id.clone(),
        user.email.clone(),
        &config.jwt_secret,
        config.jwt_expiration_hours,
    )
    .expect("create token")
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn set_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Polls `check` until it holds; deferred activity writes land on a
/// detached task after the response is returned.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Memory store whose activity inserts always fail.
pub struct FailingActivityStore {
    pub inner: MemoryStore,
}

impl FailingActivityStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl DocumentStore for FailingActivityStore {
    fn backend(&self) -> StoreBackend {
        self.inner.backend()
    }

    async fn insert(
        &self,
        collection: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        if collection == ACTIVITIES_COLLECTION {
            return Err(StoreError::Backend("activities are read-only".into()));
        }
        self.inner.insert(collection, fields, stamped_at).await
    }

    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.fetch(collection, id).await
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.merge(collection, id, fields, stamped_at).await
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.inner.remove(collection, id).await
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.inner.find(collection, query).await
    }

    async fn commit(&self, writes: Vec<PreparedWrite>) -> Result<Vec<String>, StoreError> {
        self.inner.commit(writes).await
    }
}
