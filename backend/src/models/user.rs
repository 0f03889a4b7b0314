//! Models that represent users and authentication payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::document::Document;
use super::preferences::Preferences;
use crate::validation::rules::validate_password;

pub const USERS_COLLECTION: &str = "users";
pub const EMAIL_FIELD: &str = "email";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Stored representation of an account in the `users` collection.
pub struct User {
    pub id: String,
    /// Lower-cased login address, unique across accounts.
    pub email: String,
    pub name: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    /// Absent until the user saves preferences for the first time.
    #[serde(default)]
    pub preferences: Option<Preferences>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<Document> for User {
    type Error = serde_json::Error;

    fn try_from(document: Document) -> Result<Self, Self::Error> {
        serde_json::from_value(document.to_json())
    }
}

impl User {
    pub fn effective_preferences(&self) -> Preferences {
        self.preferences.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Account data safe to return to clients.
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        let preferences = user.effective_preferences();
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            preferences,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
/// Payload for creating a new account.
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(custom(function = "validate_password"))]
    pub password: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
/// Credentials submitted by a user attempting to authenticate.
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
/// Response returned after a successful login or registration.
pub struct LoginResponse {
    /// Signed session token, also set as the `token` cookie.
    pub token: String,
    pub user: UserResponse,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_reads_document_without_preferences() {
        let document: Document = serde_json::from_value(json!({
            "id": "user-1",
            "email": "counsel@example.com",
            "name": "Ada Counsel",
            "passwordHash": "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z"
        }))
        .expect("document");

        let user = User::try_from(document).expect("user");
        assert!(user.preferences.is_none());
        let response = UserResponse::from(user);
        assert_eq!(response.preferences, Preferences::default());
        let body = serde_json::to_value(&response).expect("serialize");
        assert!(body.get("passwordHash").is_none());
    }

    #[test]
    fn register_request_validates_fields() {
        let request = RegisterRequest {
            email: "not-an-email".into(),
            password: "short".into(),
            name: String::new(),
        };
        let errors = request.validate().expect_err("invalid");
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("name"));
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
