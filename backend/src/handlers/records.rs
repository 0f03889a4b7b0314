//! Owner-scoped CRUD over every practice record kind, plus invoice payments.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::{
    error::AppError,
    middleware::activity::PendingActivity,
    models::{
        activity::ActivityType,
        clamp_limit,
        document::{Document, Fields},
        record::{ListRecordsQuery, PaymentRequest, PaymentResponse, RecordKind},
        session::Identity,
    },
    repositories::{
        invoices,
        records::{self, DeleteOutcome, RecordFilters},
    },
    state::AppState,
    validation::Validate,
};

pub const INDEX_FALLBACK_HEADER: &str = "x-index-fallback";

fn not_found(kind: RecordKind) -> AppError {
    AppError::NotFound(format!("{} not found", kind.noun()))
}

/// Headers signalling that a listing was sorted in memory and may not hold
/// the globally newest records.
pub(crate) fn fallback_headers(index_fallback: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if index_fallback {
        headers.insert(INDEX_FALLBACK_HEADER, HeaderValue::from_static("true"));
    }
    headers
}

fn missing_required(kind: RecordKind, fields: &Fields) -> Vec<&'static str> {
    kind.required_fields()
        .iter()
        .copied()
        .filter(|field| match fields.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(value)) => value.trim().is_empty(),
            Some(_) => false,
        })
        .collect()
}

pub async fn list_records(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(kind): Path<RecordKind>,
    Query(params): Query<ListRecordsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filters = RecordFilters {
        status: params.status.filter(|status| !status.trim().is_empty()),
    };
    let page = records::list_records(
        state.store.as_ref(),
        kind,
        &identity.user_id,
        &filters,
        clamp_limit(params.limit),
    )
    .await?;

    Ok((fallback_headers(page.index_fallback), Json(page.documents)))
}

pub async fn create_record(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(kind): Path<RecordKind>,
    Json(fields): Json<Fields>,
) -> Result<impl IntoResponse, AppError> {
    let missing = missing_required(kind, &fields);
    if !missing.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    let record =
        records::create_record(state.store.as_ref(), kind, &identity.user_id, fields).await?;
    let activity = PendingActivity::for_record(kind, kind.created_activity(), "created", &record);

    Ok((StatusCode::CREATED, activity, Json(record)))
}

pub async fn get_record(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((kind, id)): Path<(RecordKind, String)>,
) -> Result<Json<Document>, AppError> {
    records::find_record(state.store.as_ref(), kind, &identity.user_id, &id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(kind))
}

pub async fn update_record(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((kind, id)): Path<(RecordKind, String)>,
    Json(patch): Json<Fields>,
) -> Result<impl IntoResponse, AppError> {
    let activity_patch = patch.clone();
    let (before, after) =
        records::update_record(state.store.as_ref(), kind, &identity.user_id, &id, patch)
            .await?
            .ok_or_else(|| not_found(kind))?;

    let activity_type = kind.updated_activity(&before, &activity_patch);
    let verb = match activity_type {
        ActivityType::CaseClosed => "closed",
        ActivityType::InvoicePaid => "marked as paid",
        ActivityType::AlertResolved => "resolved",
        _ => "updated",
    };
    let changed: Vec<Value> = activity_patch
        .keys()
        .map(|key| Value::String(key.clone()))
        .collect();
    let activity = PendingActivity::for_record(kind, activity_type, verb, &after)
        .with_metadata("changedFields", changed);

    Ok((activity, Json(after)))
}

/// 204 whether or not the record existed; another owner's record is 404.
pub async fn delete_record(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((kind, id)): Path<(RecordKind, String)>,
) -> Result<Response, AppError> {
    match records::delete_record(state.store.as_ref(), kind, &identity.user_id, &id).await? {
        DeleteOutcome::Deleted(record) => {
            let activity =
                PendingActivity::for_record(kind, kind.deleted_activity(), "deleted", &record);
            Ok((StatusCode::NO_CONTENT, activity, ()).into_response())
        }
        DeleteOutcome::Absent => Ok(StatusCode::NO_CONTENT.into_response()),
        DeleteOutcome::Foreign => Err(not_found(kind)),
    }
}

pub async fn record_payment(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((kind, id)): Path<(RecordKind, String)>,
    Json(payload): Json<PaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if kind != RecordKind::Invoices {
        return Err(AppError::NotFound("Payments are only accepted for invoices".into()));
    }
    payload.validate()?;

    let outcome = invoices::record_payment(state.store.as_ref(), &identity.user_id, &id, &payload)
        .await?
        .ok_or_else(|| not_found(kind))?;

    let label = kind.label_of(&outcome.invoice);
    let activity = PendingActivity::new(
        ActivityType::PaymentReceived,
        kind.entity_type(),
        outcome.invoice.id.clone(),
        format!("Payment of {:.2} received for Invoice \"{}\"", payload.amount, label),
    )
    .with_metadata("paymentId", outcome.payment.id.clone())
    .with_metadata("amount", payload.amount)
    .with_metadata("invoicePaid", outcome.settled);

    let body = PaymentResponse {
        payment: outcome.payment,
        invoice: outcome.invoice,
    };
    Ok((StatusCode::CREATED, activity, Json(body)))
}
