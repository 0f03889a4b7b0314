use crate::{config::Config, db::connection::StoreHandle, services::activity::ActivityLogger};

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub config: Config,
    pub activity: ActivityLogger,
}

impl AppState {
    pub fn new(store: StoreHandle, config: Config) -> Self {
        let activity = ActivityLogger::new(store.clone(), config.activity_retention_days);
        Self {
            store,
            config,
            activity,
        }
    }
}
