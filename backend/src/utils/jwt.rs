use anyhow::anyhow;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::session::Identity;

/// Session token payload. `userId` and `email` default to empty so tokens
/// missing them decode and are rejected by [`SessionClaims::identity`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signature or expiry is invalid: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token payload is missing `{0}`")]
    MissingClaim(&'static str),
}

impl SessionClaims {
    pub fn new(user_id: String, email: String, expiration_hours: u64) -> anyhow::Result<Self> {
        let now = Utc::now();
        let exp = i64::try_from(expiration_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                anyhow!("session lifetime of {expiration_hours} hours is out of range")
            })?;

        Ok(Self {
            user_id,
            email,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        })
    }

    pub fn identity(self) -> Result<Identity, TokenError> {
        if self.user_id.trim().is_empty() {
            return Err(TokenError::MissingClaim("userId"));
        }
        if self.email.trim().is_empty() {
            return Err(TokenError::MissingClaim("email"));
        }
        Ok(Identity {
            user_id: self.user_id,
            email: self.email,
        })
    }
}

pub fn create_session_token(
    user_id: String,
    email: String,
    secret: &str,
    expiration_hours: u64,
) -> anyhow::Result<String> {
    let claims = SessionClaims::new(user_id, email, expiration_hours)?;
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(token)
}

/// Verifies signature (HS256) and expiry, then requires both identity claims.
pub fn verify_session_token(token: &str, secret: &str) -> Result<Identity, TokenError> {
    let validation = Validation::default();
    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    token_data.claims.identity()
}
