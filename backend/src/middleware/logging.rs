use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header::CONTENT_LENGTH, Request, StatusCode},
    middleware::Next,
    response::Response,
    Error as AxumError,
};
use std::time::Instant;

use crate::middleware::request_id::RequestId;

const MAX_BUFFERED_BODY_BYTES: usize = 64 * 1024;
const MAX_LOGGED_BODY_BYTES: usize = 2048;

struct ErrorEvent<'a> {
    status: StatusCode,
    method: &'a str,
    path: &'a str,
    request_id: &'a str,
    latency_ms: u64,
}

/// Logs every 4xx/5xx response with a preview of its body. The body is
/// buffered and forwarded unchanged. Plain 401s are logged at debug level:
/// expired sessions are routine.
pub async fn log_error_responses(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let start = Instant::now();

    let response = next.run(req).await;
    let status = response.status();

    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let event = ErrorEvent {
        status,
        method: &method,
        path: &path,
        request_id: &request_id,
        latency_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    let (mut parts, body) = response.into_parts();
    match buffer_body(body).await {
        Ok((bytes, preview)) => {
            log_error_event(&event, &preview);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            parts.headers.remove(CONTENT_LENGTH);
            tracing::error!(
                status = event.status.as_u16(),
                method = event.method,
                path = event.path,
                request_id = event.request_id,
                error = ?err,
                "Failed to read error response body"
            );
            Response::from_parts(parts, Body::empty())
        }
    }
}

async fn buffer_body(body: Body) -> Result<(Bytes, String), AxumError> {
    let bytes = to_bytes(body, MAX_BUFFERED_BODY_BYTES).await?;
    Ok((bytes.clone(), body_preview(&bytes)))
}

fn body_preview(bytes: &Bytes) -> String {
    if bytes.len() > MAX_LOGGED_BODY_BYTES {
        let slice = bytes.slice(0..MAX_LOGGED_BODY_BYTES);
        format!(
            "{}... (truncated, {} bytes total)",
            String::from_utf8_lossy(&slice),
            bytes.len()
        )
    } else {
        String::from_utf8_lossy(bytes).to_string()
    }
}

fn log_error_event(event: &ErrorEvent<'_>, body: &str) {
    let status = event.status.as_u16();
    if event.status.is_server_error() {
        tracing::error!(
            status,
            method = event.method,
            path = event.path,
            request_id = event.request_id,
            latency_ms = event.latency_ms,
            body,
            "Request completed with error status"
        );
    } else if event.status == StatusCode::UNAUTHORIZED {
        tracing::debug!(
            status,
            method = event.method,
            path = event.path,
            request_id = event.request_id,
            "Request rejected as unauthenticated"
        );
    } else {
        tracing::warn!(
            status,
            method = event.method,
            path = event.path,
            request_id = event.request_id,
            latency_ms = event.latency_ms,
            body,
            "Request completed with error status"
        );
    }
}
