use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    config::Config,
    error::ErrorResponse,
    state::AppState,
    utils::{
        cookies::{build_clear_session_cookie, extract_cookie_value, SESSION_COOKIE_NAME},
        jwt::{verify_session_token, TokenError},
    },
};

/// Why a request was turned away. All variants produce the same 401
/// response; the distinction only shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingToken,
    InvalidToken,
    IncompleteClaims,
}

/// 401 response that also expires the session cookie.
#[derive(Debug)]
pub struct AuthRejection {
    pub failure: AuthFailure,
    clear_cookie: String,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: "Authentication required".to_string(),
            code: "UNAUTHENTICATED".to_string(),
            details: None,
        });
        let mut response = (StatusCode::UNAUTHORIZED, body).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.clear_cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        response
    }
}

/// Requires a valid session token from the `token` cookie or, failing
/// that, an `Authorization: Bearer` header. The decoded [`Identity`] is put
/// on the request for handlers and on the response for outer middleware.
///
/// [`Identity`]: crate::models::session::Identity
pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthRejection> {
    let token = extract_token(request.headers());
    let identity = match token {
        None => return Err(reject(AuthFailure::MissingToken, &state.config)),
        Some(token) => verify_session_token(&token, &state.config.jwt_secret).map_err(|err| {
            tracing::debug!(error = %err, "Rejected session token");
            let failure = match err {
                TokenError::MissingClaim(_) => AuthFailure::IncompleteClaims,
                TokenError::Invalid(_) => AuthFailure::InvalidToken,
            };
            reject(failure, &state.config)
        })?,
    };

    request.extensions_mut().insert(identity.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(identity);
    Ok(response)
}

fn reject(failure: AuthFailure, config: &Config) -> AuthRejection {
    AuthRejection {
        failure,
        clear_cookie: build_clear_session_cookie(config.cookie_options()),
    }
}

fn parse_bearer_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        let token = rest.trim();
        (!token.is_empty()).then_some(token)
    } else {
        None
    }
}

/// Cookie first, then bearer header.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| extract_cookie_value(raw, SESSION_COOKIE_NAME));
    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_bearer_token)
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_takes_precedence_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_token(&headers).as_deref(), Some("from-header"));

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; token=from-cookie"));
        assert_eq!(extract_token(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(parse_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("BEARER  abc "), Some("abc"));
        assert_eq!(parse_bearer_token("Basic abc"), None);
        assert_eq!(parse_bearer_token("Bearer "), None);
    }

    #[test]
    fn rejection_clears_cookie() {
        let config = Config::default();
        let response = reject(AuthFailure::MissingToken, &config).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .expect("set-cookie");
        assert!(cookie.starts_with("token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
