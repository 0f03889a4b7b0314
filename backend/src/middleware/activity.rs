use std::convert::Infallible;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponseParts, Response, ResponseParts},
};
use serde_json::{Map, Value};

use crate::{
    middleware::request_id::RequestId,
    models::{
        activity::{ActivityType, EntityType, NewActivity},
        document::Document,
        record::RecordKind,
        session::Identity,
    },
    state::AppState,
};

/// Activity a handler wants recorded once its response is known to be a
/// success. Returned as a response part; [`record_activity`] picks it up.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingActivity {
    pub activity_type: ActivityType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub message: String,
    pub metadata: Map<String, Value>,
}

impl PendingActivity {
    pub fn new(
        activity_type: ActivityType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            activity_type,
            entity_type,
            entity_id: entity_id.into(),
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Activity about a stored record, with a message such as
    /// `Case "Doe v. Roe" closed`.
    pub fn for_record(
        kind: RecordKind,
        activity_type: ActivityType,
        verb: &str,
        document: &Document,
    ) -> Self {
        Self::new(
            activity_type,
            kind.entity_type(),
            document.id.clone(),
            kind.message(verb, document),
        )
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn into_activity(self, owner: String) -> NewActivity {
        NewActivity {
            owner,
            activity_type: self.activity_type,
            message: self.message,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            metadata: self.metadata,
        }
    }
}

impl IntoResponseParts for PendingActivity {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        res.extensions_mut().insert(self);
        Ok(res)
    }
}

/// Persists the response's [`PendingActivity`] on a detached task when the
/// status is 2xx and the request was authenticated. The response is
/// returned without waiting for the write.
pub async fn record_activity(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone());

    let mut response = next.run(request).await;

    let Some(pending) = response.extensions_mut().remove::<PendingActivity>() else {
        return response;
    };
    if !response.status().is_success() {
        return response;
    }
    let Some(identity) = response.extensions().get::<Identity>().cloned() else {
        tracing::debug!(
            activity_type = ?pending.activity_type,
            "Dropping activity for unauthenticated response"
        );
        return response;
    };

    let mut activity = pending.into_activity(identity.user_id);
    if let Some(request_id) = request_id {
        activity
            .metadata
            .insert("requestId".to_string(), Value::String(request_id));
    }

    let logger = state.activity.clone();
    tokio::spawn(async move {
        logger.log_activity(activity).await;
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn pending_activity_travels_in_response_extensions() {
        let now = Utc::now();
        let document = Document {
            id: "case-1".into(),
            fields: json!({"title": "Doe v. Roe"}).as_object().cloned().unwrap(),
            created_at: now,
            updated_at: now,
        };
        let pending = PendingActivity::for_record(
            RecordKind::Cases,
            ActivityType::CaseClosed,
            "closed",
            &document,
        )
        .with_metadata("status", "closed");

        let response = (pending.clone(), "ok").into_response();
        let carried = response
            .extensions()
            .get::<PendingActivity>()
            .expect("pending activity");
        assert_eq!(carried, &pending);
        assert_eq!(carried.message, "Case \"Doe v. Roe\" closed");

        let activity = pending.into_activity("user-1".into());
        assert_eq!(activity.owner, "user-1");
        assert_eq!(activity.entity_type, EntityType::Case);
        assert_eq!(activity.metadata["status"], "closed");
    }
}
