use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::document::Document;

pub const ACTIVITIES_COLLECTION: &str = "activities";
pub const EXPIRES_AT_FIELD: &str = "expiresAt";

/// Audit event types. Closed set: adding one is a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    CaseCreated,
    CaseUpdated,
    CaseClosed,
    CaseDeleted,
    ClientCreated,
    ClientUpdated,
    ClientDeleted,
    InvoiceCreated,
    InvoiceUpdated,
    InvoicePaid,
    InvoiceDeleted,
    PaymentReceived,
    HearingScheduled,
    HearingUpdated,
    HearingDeleted,
    DocumentUploaded,
    DocumentUpdated,
    DocumentDeleted,
    AlertCreated,
    AlertUpdated,
    AlertResolved,
    AlertDeleted,
    TimeLogged,
    TimeEntryUpdated,
    TimeEntryDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Case,
    Client,
    Invoice,
    TimeEntry,
    Document,
    Alert,
    Hearing,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Case => "case",
            EntityType::Client => "client",
            EntityType::Invoice => "invoice",
            EntityType::TimeEntry => "time_entry",
            EntityType::Document => "document",
            EntityType::Alert => "alert",
            EntityType::Hearing => "hearing",
        }
    }
}

/// Input of the direct activity log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub owner: String,
    pub activity_type: ActivityType,
    pub message: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub metadata: Map<String, Value>,
}

/// Stored activity record as returned by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: String,
    pub owner: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub message: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<Document> for ActivityRecord {
    type Error = serde_json::Error;

    fn try_from(document: Document) -> Result<Self, Self::Error> {
        serde_json::from_value(document.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enumerations_use_snake_case() {
        assert_eq!(
            serde_json::to_value(ActivityType::PaymentReceived).unwrap(),
            json!("payment_received")
        );
        assert_eq!(
            serde_json::to_value(EntityType::TimeEntry).unwrap(),
            json!("time_entry")
        );
        assert_eq!(EntityType::TimeEntry.as_str(), "time_entry");
        assert!(serde_json::from_value::<ActivityType>(json!("case_archived")).is_err());
    }

    #[test]
    fn activity_record_reads_stored_document() {
        let document: Document = serde_json::from_value(json!({
            "id": "act-1",
            "owner": "user-1",
            "type": "case_created",
            "message": "Case \"Doe v. Roe\" created",
            "entityType": "case",
            "entityId": "case-1",
            "metadata": {"requestId": "req-1"},
            "expiresAt": "2024-04-30T00:00:00Z",
            "createdAt": "2024-01-31T00:00:00Z",
            "updatedAt": "2024-01-31T00:00:00Z"
        }))
        .expect("document");

        let record = ActivityRecord::try_from(document).expect("activity");
        assert_eq!(record.activity_type, ActivityType::CaseCreated);
        assert_eq!(record.entity_type, EntityType::Case);
        assert_eq!(record.metadata.get("requestId"), Some(&json!("req-1")));
        assert!(record.expires_at.is_some());
    }
}
