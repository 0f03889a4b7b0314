use std::{net::SocketAddr, time::Duration};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caseledger_backend::{
    app::build_app,
    config::Config,
    db::{connection::connect_store, StoreBackend},
    services::activity::ActivityLogger,
    state::AppState,
    utils::time::now_utc,
};

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

/// Backends without native expiry get their stale activities removed here.
fn spawn_activity_purge(logger: ActivityLogger) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(err) = logger.purge_expired(now_utc()).await {
                tracing::warn!(error = %err, "Activity purge failed");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "caseledger_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        app_env = %config.app_env,
        data_backend = %config.data_backend,
        jwt_secret = %mask_secret(&config.jwt_secret),
        jwt_expiration_hours = config.jwt_expiration_hours,
        activity_retention_days = config.activity_retention_days,
        "Loaded configuration from environment/.env"
    );

    let store = connect_store(&config).await?;
    let state = AppState::new(store, config.clone());

    if let Err(err) = state.activity.ensure_retention().await {
        tracing::warn!(error = %err, "Could not provision activity expiry");
    }
    if config.data_backend != StoreBackend::Mongo {
        spawn_activity_purge(state.activity.clone());
    }

    let app = build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
