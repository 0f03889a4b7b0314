use std::{env, time::Duration};

use anyhow::anyhow;

use crate::{
    db::StoreBackend,
    utils::cookies::CookieOptions,
};

const DEFAULT_JWT_SECRET: &str = "your-secret-key-change-this-in-production";
/// One year.
const MAX_JWT_EXPIRATION_HOURS: u64 = 8760;

#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_hours: u64,
    pub data_backend: StoreBackend,
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub firestore_project_id: Option<String>,
    pub firestore_emulator_host: Option<String>,
    pub firestore_access_token: Option<String>,
    pub activity_retention_days: u32,
    pub cors_allowed_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_env: "development".to_string(),
            port: 3000,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expiration_hours: 24,
            data_backend: StoreBackend::Memory,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_database: "caseledger".to_string(),
            firestore_project_id: None,
            firestore_emulator_host: None,
            firestore_access_token: None,
            activity_retention_days: 90,
            cors_allowed_origin: None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from a variable lookup; unset or empty
    /// variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Config::default();

        let app_env = var("APP_ENV").unwrap_or(defaults.app_env);
        let port = var("APP_PORT")
            .map(|raw| {
                raw.parse()
                    .map_err(|_| anyhow!("Invalid APP_PORT value: {}", raw))
            })
            .transpose()?
            .unwrap_or(defaults.port);

        let jwt_secret = var("JWT_SECRET").unwrap_or(defaults.jwt_secret);
        if app_env.eq_ignore_ascii_case("production") && jwt_secret == DEFAULT_JWT_SECRET {
            return Err(anyhow!("JWT_SECRET must be set in production"));
        }

        let jwt_expiration_hours = var("JWT_EXPIRATION_HOURS")
            .map(|raw| match raw.parse::<u64>() {
                Ok(hours) if (1..=MAX_JWT_EXPIRATION_HOURS).contains(&hours) => Ok(hours),
                _ => Err(anyhow!(
                    "JWT_EXPIRATION_HOURS must be between 1 and {}, got {}",
                    MAX_JWT_EXPIRATION_HOURS,
                    raw
                )),
            })
            .transpose()?
            .unwrap_or(defaults.jwt_expiration_hours);

        let data_backend = var("DATA_BACKEND")
            .map(|raw| raw.parse::<StoreBackend>().map_err(|err| anyhow!(err)))
            .transpose()?
            .unwrap_or(defaults.data_backend);

        let activity_retention_days = var("ACTIVITY_RETENTION_DAYS")
            .and_then(|raw| raw.parse().ok())
            .filter(|days| *days > 0)
            .unwrap_or(defaults.activity_retention_days);

        Ok(Config {
            app_env,
            port,
            jwt_secret,
            jwt_expiration_hours,
            data_backend,
            mongodb_uri: var("MONGODB_URI").unwrap_or(defaults.mongodb_uri),
            mongodb_database: var("MONGODB_DATABASE").unwrap_or(defaults.mongodb_database),
            firestore_project_id: var("FIRESTORE_PROJECT_ID"),
            firestore_emulator_host: var("FIRESTORE_EMULATOR_HOST"),
            firestore_access_token: var("FIRESTORE_ACCESS_TOKEN"),
            activity_retention_days,
            cors_allowed_origin: var("CORS_ALLOWED_ORIGIN"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Attributes shared by every session cookie the server sets or clears.
    pub fn cookie_options(&self) -> CookieOptions {
        CookieOptions {
            secure: self.is_production(),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_hours.saturating_mul(3600))
    }
}
