//! Document store abstraction and its backends.
//!
//! Every backend speaks the same small vocabulary (insert, fetch, merge,
//! remove, find, commit) over [`Document`]s. Backend-specific failures are
//! classified into [`StoreError`] once, inside the backend, so callers never
//! inspect driver error codes or messages.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    document::{Document, Fields},
    query::{PreparedWrite, Query},
};

pub mod connection;
pub mod firestore;
pub mod memory;
pub mod mongo;

/// Most writes one batch may carry; Firestore rejects larger commits.
pub const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot serve the filter + order combination without a
    /// composite index that has not been provisioned.
    #[error("query on `{collection}` requires a missing index: {detail}")]
    IndexMissing { collection: String, detail: String },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// A batch referenced a document that does not exist.
    #[error("document `{collection}/{id}` does not exist")]
    NotFound { collection: String, id: String },
    /// A guarded write lost a race with a concurrent writer.
    #[error("concurrent write to `{collection}`: {detail}")]
    Conflict { collection: String, detail: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    pub fn is_index_missing(&self) -> bool {
        matches!(self, StoreError::IndexMissing { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    Mongo,
    Firestore,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Mongo => "mongo",
            StoreBackend::Firestore => "firestore",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "firestore" => Ok(StoreBackend::Firestore),
            other => Err(format!("unknown data backend `{other}`")),
        }
    }
}

/// Low-level collection operations implemented by each backend.
///
/// Timestamps are decided by the caller and passed in as `stamped_at`; a
/// backend stores them as given.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    /// Inserts a new document and returns its generated id.
    async fn insert(
        &self,
        collection: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<String, StoreError>;

    /// `Ok(None)` when no document has that id, including ids the backend
    /// cannot parse.
    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Shallow-merges `fields` into an existing document and sets
    /// `updatedAt`. Returns `false` when the document does not exist.
    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Removes a document. Removing an absent document succeeds.
    async fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Applies all writes or none of them. Returns the affected ids in order.
    async fn commit(&self, writes: Vec<PreparedWrite>) -> Result<Vec<String>, StoreError>;

    /// Provisions native expiry of documents `after` the time held in
    /// `field`. Backends without native expiry accept and ignore the call.
    async fn ensure_expiry(
        &self,
        _collection: &str,
        _field: &str,
        _after: Duration,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!("Mongo".parse::<StoreBackend>(), Ok(StoreBackend::Mongo));
        assert_eq!("mongodb".parse::<StoreBackend>(), Ok(StoreBackend::Mongo));
        assert_eq!(
            "firestore".parse::<StoreBackend>(),
            Ok(StoreBackend::Firestore)
        );
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn index_missing_is_classified() {
        let err = StoreError::IndexMissing {
            collection: "activities".into(),
            detail: "owner+createdAt".into(),
        };
        assert!(err.is_index_missing());
        assert!(!StoreError::backend("boom").is_index_missing());
    }
}
