use axum::{
    extract::{Extension, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::{
    error::AppError,
    models::{
        session::Identity,
        user::{LoginRequest, LoginResponse, RegisterRequest, User, UserResponse},
    },
    repositories::users,
    state::AppState,
    utils::{
        cookies::{build_clear_session_cookie, build_session_cookie},
        jwt::create_session_token,
        password::{hash_password_blocking, verify_password_blocking},
    },
    validation::Validate,
};

fn issue_session(state: &AppState, user: User) -> Result<impl IntoResponse, AppError> {
    let token = create_session_token(
        user.id.clone(),
        user.email.clone(),
        &state.config.jwt_secret,
        state.config.jwt_expiration_hours,
    )?;
    let cookie = build_session_cookie(
        &token,
        state.config.session_ttl(),
        state.config.cookie_options(),
    );
    let body = LoginResponse {
        token,
        user: UserResponse::from(user),
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)))
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    if users::find_user_by_email(state.store.as_ref(), &payload.email)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Email is already registered".into()));
    }

    let password_hash = hash_password_blocking(payload.password).await?;
    let user = users::create_user(
        state.store.as_ref(),
        &payload.email,
        &payload.name,
        &password_hash,
    )
    .await?;
    tracing::info!(user_id = %user.id, "Registered new user");

    let session = issue_session(&state, user)?;
    Ok((StatusCode::CREATED, session))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let invalid = || AppError::Unauthorized("Invalid email or password".into());

    let user = users::find_user_by_email(state.store.as_ref(), &payload.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password_blocking(payload.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    issue_session(&state, user)
}

/// Always succeeds and always clears the session cookie.
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = build_clear_session_cookie(state.config.cookie_options());
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)])
}

pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<UserResponse>, AppError> {
    let user = users::find_user_by_id(state.store.as_ref(), &identity.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(UserResponse::from(user)))
}
