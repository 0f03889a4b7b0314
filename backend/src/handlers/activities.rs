use axum::{
    extract::{Extension, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    handlers::records::fallback_headers,
    models::{
        activity::{ActivityRecord, EntityType},
        clamp_limit,
        session::Identity,
    },
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFeedQuery {
    pub limit: Option<usize>,
    pub entity_type: Option<EntityType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityFeedResponse {
    pub activities: Vec<ActivityRecord>,
}

pub async fn list_activities(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<ActivityFeedQuery>,
) -> Result<impl IntoResponse, AppError> {
    let feed = state
        .activity
        .recent(
            &identity.user_id,
            params.entity_type,
            clamp_limit(params.limit),
        )
        .await?;

    Ok((
        fallback_headers(feed.index_fallback),
        Json(ActivityFeedResponse {
            activities: feed.activities,
        }),
    ))
}
