use axum::{
    extract::{Extension, State},
    Json,
};

use crate::{
    error::AppError,
    models::{
        preferences::{Preferences, UpdatePreferencesPayload},
        session::Identity,
    },
    repositories::users,
    state::AppState,
    validation::Validate,
};

fn user_gone() -> AppError {
    AppError::NotFound("User not found".into())
}

/// Stored preferences, or the defaults for a user who never saved any.
pub async fn get_preferences(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Preferences>, AppError> {
    let user = users::find_user_by_id(state.store.as_ref(), &identity.user_id)
        .await?
        .ok_or_else(user_gone)?;
    Ok(Json(user.effective_preferences()))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<UpdatePreferencesPayload>,
) -> Result<Json<Preferences>, AppError> {
    payload.validate()?;

    let user = users::find_user_by_id(state.store.as_ref(), &identity.user_id)
        .await?
        .ok_or_else(user_gone)?;
    let preferences = user.effective_preferences().apply(payload);

    let saved = users::save_preferences(state.store.as_ref(), &user.id, &preferences)
        .await?
        .ok_or_else(user_gone)?;
    tracing::debug!(user_id = %saved.id, theme = ?preferences.theme, "Saved preferences");

    Ok(Json(saved.effective_preferences()))
}
