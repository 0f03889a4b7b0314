//! Practice records (cases, clients, invoices, ...) and the activity
//! vocabulary attached to each kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use super::activity::{ActivityType, EntityType};
use super::document::{Document, Fields};
use crate::validation::rules::validate_positive_amount;

pub const OWNER_FIELD: &str = "owner";
pub const STATUS_FIELD: &str = "status";
pub const PAYMENTS_COLLECTION: &str = "payments";

/// Record collections reachable under `/api/records/{kind}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Cases,
    Clients,
    Invoices,
    Hearings,
    TimeEntries,
    Documents,
    Alerts,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Cases,
        RecordKind::Clients,
        RecordKind::Invoices,
        RecordKind::Hearings,
        RecordKind::TimeEntries,
        RecordKind::Documents,
        RecordKind::Alerts,
    ];

    pub fn collection(&self) -> &'static str {
        match self {
            RecordKind::Cases => "cases",
            RecordKind::Clients => "clients",
            RecordKind::Invoices => "invoices",
            RecordKind::Hearings => "hearings",
            RecordKind::TimeEntries => "time_entries",
            RecordKind::Documents => "documents",
            RecordKind::Alerts => "alerts",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            RecordKind::Cases => EntityType::Case,
            RecordKind::Clients => EntityType::Client,
            RecordKind::Invoices => EntityType::Invoice,
            RecordKind::Hearings => EntityType::Hearing,
            RecordKind::TimeEntries => EntityType::TimeEntry,
            RecordKind::Documents => EntityType::Document,
            RecordKind::Alerts => EntityType::Alert,
        }
    }

    /// Human-readable noun used in activity messages.
    pub fn noun(&self) -> &'static str {
        match self {
            RecordKind::Cases => "Case",
            RecordKind::Clients => "Client",
            RecordKind::Invoices => "Invoice",
            RecordKind::Hearings => "Hearing",
            RecordKind::TimeEntries => "Time entry",
            RecordKind::Documents => "Document",
            RecordKind::Alerts => "Alert",
        }
    }

    /// Field whose value names a record in messages.
    pub fn label_field(&self) -> &'static str {
        match self {
            RecordKind::Cases | RecordKind::Hearings | RecordKind::Alerts => "title",
            RecordKind::Clients | RecordKind::Documents => "name",
            RecordKind::Invoices => "invoiceNumber",
            RecordKind::TimeEntries => "description",
        }
    }

    /// Fields a create request must carry with a non-null value.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Cases => &["title"],
            RecordKind::Clients => &["name"],
            RecordKind::Invoices => &["invoiceNumber", "amount"],
            RecordKind::Hearings => &["title", "hearingDate"],
            RecordKind::TimeEntries => &["description", "hours"],
            RecordKind::Documents => &["name"],
            RecordKind::Alerts => &["title"],
        }
    }

    /// Values filled in on create when the request leaves them out.
    pub fn defaults(&self) -> Fields {
        let value = match self {
            RecordKind::Cases => json!({"status": "open"}),
            RecordKind::Invoices => json!({"status": "unpaid", "amountPaid": 0}),
            RecordKind::Alerts => json!({"status": "active"}),
            _ => json!({}),
        };
        value.as_object().cloned().unwrap_or_default()
    }

    /// Status value that ends the record's lifecycle, if the kind has one.
    pub fn terminal_status(&self) -> Option<&'static str> {
        match self {
            RecordKind::Cases => Some("closed"),
            RecordKind::Invoices => Some("paid"),
            RecordKind::Alerts => Some("resolved"),
            _ => None,
        }
    }

    pub fn created_activity(&self) -> ActivityType {
        match self {
            RecordKind::Cases => ActivityType::CaseCreated,
            RecordKind::Clients => ActivityType::ClientCreated,
            RecordKind::Invoices => ActivityType::InvoiceCreated,
            RecordKind::Hearings => ActivityType::HearingScheduled,
            RecordKind::TimeEntries => ActivityType::TimeLogged,
            RecordKind::Documents => ActivityType::DocumentUploaded,
            RecordKind::Alerts => ActivityType::AlertCreated,
        }
    }

    /// Activity for an update. A patch that moves the record into its
    /// terminal status is reported as that transition instead.
    pub fn updated_activity(&self, before: &Document, patch: &Fields) -> ActivityType {
        if let Some(terminal) = self.terminal_status() {
            let entering = patch.get(STATUS_FIELD).and_then(Value::as_str) == Some(terminal);
            let already = before.str_field(STATUS_FIELD) == Some(terminal);
            if entering && !already {
                return match self {
                    RecordKind::Cases => ActivityType::CaseClosed,
                    RecordKind::Invoices => ActivityType::InvoicePaid,
                    _ => ActivityType::AlertResolved,
                };
            }
        }
        match self {
            RecordKind::Cases => ActivityType::CaseUpdated,
            RecordKind::Clients => ActivityType::ClientUpdated,
            RecordKind::Invoices => ActivityType::InvoiceUpdated,
            RecordKind::Hearings => ActivityType::HearingUpdated,
            RecordKind::TimeEntries => ActivityType::TimeEntryUpdated,
            RecordKind::Documents => ActivityType::DocumentUpdated,
            RecordKind::Alerts => ActivityType::AlertUpdated,
        }
    }

    pub fn deleted_activity(&self) -> ActivityType {
        match self {
            RecordKind::Cases => ActivityType::CaseDeleted,
            RecordKind::Clients => ActivityType::ClientDeleted,
            RecordKind::Invoices => ActivityType::InvoiceDeleted,
            RecordKind::Hearings => ActivityType::HearingDeleted,
            RecordKind::TimeEntries => ActivityType::TimeEntryDeleted,
            RecordKind::Documents => ActivityType::DocumentDeleted,
            RecordKind::Alerts => ActivityType::AlertDeleted,
        }
    }

    /// Label of a stored record, falling back to its id.
    pub fn label_of(&self, document: &Document) -> String {
        match document.fields.get(self.label_field()) {
            Some(Value::String(label)) if !label.trim().is_empty() => label.clone(),
            Some(Value::Number(number)) => number.to_string(),
            _ => document.id.clone(),
        }
    }

    pub fn message(&self, verb: &str, document: &Document) -> String {
        format!("{} \"{}\" {}", self.noun(), self.label_of(document), verb)
    }
}

/// Query parameters for record listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRecordsQuery {
    pub limit: Option<usize>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
/// Payment recorded against an invoice.
pub struct PaymentRequest {
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: f64,
    #[validate(length(min = 1, max = 40))]
    pub method: Option<String>,
    #[validate(length(max = 120))]
    pub reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub payment: Document,
    pub invoice: Document,
}
