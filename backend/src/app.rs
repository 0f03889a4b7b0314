use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{handlers, middleware, state::AppState};

const CORS_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);
const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Cookie sessions need a concrete origin with credentials; without one the
/// API is open to bearer-token clients from anywhere.
fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let origin = allowed_origin.and_then(|origin| match HeaderValue::from_str(origin) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(origin, error = %err, "Ignoring unusable CORS origin");
            None
        }
    });

    match origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods(ALLOWED_METHODS)
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .max_age(CORS_MAX_AGE),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(ALLOWED_METHODS)
            .allow_headers(Any)
            .max_age(CORS_MAX_AGE),
    }
}

pub fn build_app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/logout", post(handlers::logout));

    let user_routes = Router::new()
        .route("/api/auth/me", get(handlers::me))
        .route(
            "/api/users/me/preferences",
            get(handlers::get_preferences).put(handlers::update_preferences),
        )
        .route("/api/activities", get(handlers::list_activities))
        .route(
            "/api/records/{kind}",
            get(handlers::list_records).post(handlers::create_record),
        )
        .route(
            "/api/records/{kind}/{id}",
            get(handlers::get_record)
                .patch(handlers::update_record)
                .delete(handlers::delete_record),
        )
        .route(
            "/api/records/{kind}/{id}/payments",
            post(handlers::record_payment),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(state.config.cors_allowed_origin.as_deref()))
                .layer(axum_middleware::from_fn(middleware::request_id))
                .layer(axum_middleware::from_fn(middleware::log_error_responses))
                .layer(axum_middleware::from_fn_with_state(
                    state.clone(),
                    middleware::record_activity,
                )),
        )
        .with_state(state)
}
