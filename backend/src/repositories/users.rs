//! Repository functions for user accounts stored in the `users` collection.

use serde_json::{json, Value};

use crate::{
    db::{DocumentStore, StoreError},
    models::{
        document::{Document, Fields},
        preferences::{Preferences, PREFERENCES_FIELD},
        query::{Filter, Query},
        user::{normalize_email, User, EMAIL_FIELD, USERS_COLLECTION},
    },
    repositories::documents,
};

fn to_user(document: Document) -> Result<User, StoreError> {
    let id = document.id.clone();
    User::try_from(document)
        .map_err(|err| StoreError::Backend(format!("user {id} is malformed: {err}")))
}

pub async fn find_user_by_email(
    store: &dyn DocumentStore,
    email: &str,
) -> Result<Option<User>, StoreError> {
    let query = Query::new()
        .filter(Filter::eq(EMAIL_FIELD, normalize_email(email)))
        .limit(1);
    let page = documents::query_documents(store, USERS_COLLECTION, &query).await?;
    page.documents.into_iter().next().map(to_user).transpose()
}

pub async fn find_user_by_id(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<Option<User>, StoreError> {
    documents::get_document(store, USERS_COLLECTION, id)
        .await?
        .map(to_user)
        .transpose()
}

/// Creates an account. Uniqueness of the email is checked by the caller.
pub async fn create_user(
    store: &dyn DocumentStore,
    email: &str,
    name: &str,
    password_hash: &str,
) -> Result<User, StoreError> {
    let fields = json!({
        EMAIL_FIELD: normalize_email(email),
        "name": name.trim(),
        "passwordHash": password_hash,
    });
    let fields = match fields {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    };
    let document = documents::create_document(store, USERS_COLLECTION, fields).await?;
    to_user(document)
}

/// Replaces the stored preferences. `Ok(None)` when the user is gone.
pub async fn save_preferences(
    store: &dyn DocumentStore,
    user_id: &str,
    preferences: &Preferences,
) -> Result<Option<User>, StoreError> {
    let value = serde_json::to_value(preferences).map_err(StoreError::backend)?;
    let mut fields = Fields::new();
    fields.insert(PREFERENCES_FIELD.to_string(), value);
    documents::update_document(store, USERS_COLLECTION, user_id, fields)
        .await?
        .map(to_user)
        .transpose()
}
