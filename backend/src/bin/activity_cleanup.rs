use caseledger_backend::{
    config::Config, db::connection::connect_store, services::activity::ActivityLogger,
    utils::time::now_utc,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "caseledger_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let store = connect_store(&config).await?;
    let logger = ActivityLogger::new(store, config.activity_retention_days);

    let removed = logger.purge_expired(now_utc()).await?;
    tracing::info!("Deleted {} expired activities", removed);

    Ok(())
}
