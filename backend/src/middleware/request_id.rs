use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const CORRELATION_ID_HEADER: &str = "x-correlation-id";
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Accepts a caller-supplied id only if it is short and printable ASCII.
fn usable_request_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let printable = trimmed.chars().all(|c| c.is_ascii_graphic());
    (!trimmed.is_empty() && trimmed.len() <= MAX_REQUEST_ID_LEN && printable)
        .then(|| trimmed.to_string())
}

/// Tags the request with an id (from `x-request-id`, `x-correlation-id`, or
/// a fresh UUID), runs it inside a span carrying that id and echoes it back
/// on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    let id = [REQUEST_ID_HEADER, CORRELATION_ID_HEADER]
        .into_iter()
        .filter_map(|name| req.headers().get(name))
        .filter_map(|value| value.to_str().ok())
        .find_map(usable_request_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(header_name, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_ids_are_sanitized() {
        assert_eq!(usable_request_id(" abc-123 ").as_deref(), Some("abc-123"));
        assert!(usable_request_id("").is_none());
        assert!(usable_request_id("has space").is_none());
        assert!(usable_request_id(&"x".repeat(200)).is_none());
    }
}
