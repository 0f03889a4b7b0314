use std::sync::Arc;

use anyhow::Context;

use super::{
    firestore::{FirestoreSettings, FirestoreStore},
    memory::MemoryStore,
    mongo::MongoStore,
    DocumentStore, StoreBackend,
};
use crate::config::Config;

pub type StoreHandle = Arc<dyn DocumentStore>;

/// Builds the store selected by `DATA_BACKEND`. Called once at startup; the
/// handle is then shared through `AppState`.
pub async fn connect_store(config: &Config) -> anyhow::Result<StoreHandle> {
    let store: StoreHandle = match config.data_backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Mongo => {
            let store = MongoStore::connect(&config.mongodb_uri, &config.mongodb_database)
                .await
                .with_context(|| format!("connecting to MongoDB database {}", config.mongodb_database))?;
            Arc::new(store)
        }
        StoreBackend::Firestore => {
            let project_id = config
                .firestore_project_id
                .clone()
                .context("FIRESTORE_PROJECT_ID is required when DATA_BACKEND=firestore")?;
            Arc::new(FirestoreStore::new(FirestoreSettings {
                project_id,
                emulator_host: config.firestore_emulator_host.clone(),
                access_token: config.firestore_access_token.clone(),
            }))
        }
    };
    tracing::info!(backend = %store.backend(), "Document store ready");
    Ok(store)
}
