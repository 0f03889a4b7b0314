//! Invoice payments: a payment record and the invoice balance change are
//! written in one batch.

use serde_json::{json, Value};

use crate::{
    db::{DocumentStore, StoreError},
    models::{
        document::{format_timestamp, Document, Fields},
        query::{BatchOp, Guard},
        record::{PaymentRequest, RecordKind, OWNER_FIELD, PAYMENTS_COLLECTION, STATUS_FIELD},
    },
    repositories::{documents, records},
};

const AMOUNT_FIELD: &str = "amount";
const AMOUNT_PAID_FIELD: &str = "amountPaid";
const MAX_PAYMENT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub payment: Document,
    pub invoice: Document,
    /// The payment settled the invoice in full.
    pub settled: bool,
}

/// Invoice status after `paid` of `total` has been received.
pub fn status_for(paid: f64, total: f64) -> &'static str {
    if paid <= 0.0 {
        "unpaid"
    } else if paid + f64::EPSILON >= total {
        "paid"
    } else {
        "partial"
    }
}

/// `Ok(None)` when the invoice does not exist or belongs to another owner.
///
/// The balance update is guarded on the `amountPaid` that was read, so a
/// payment racing another one re-reads the invoice and tries again instead
/// of overwriting it.
pub async fn record_payment(
    store: &dyn DocumentStore,
    owner: &str,
    invoice_id: &str,
    payment: &PaymentRequest,
) -> Result<Option<PaymentOutcome>, StoreError> {
    let mut attempt = 1;
    loop {
        let Some(invoice) =
            records::find_record(store, RecordKind::Invoices, owner, invoice_id).await?
        else {
            return Ok(None);
        };
        match apply_payment(store, owner, &invoice, payment).await {
            Err(StoreError::Conflict { detail, .. }) if attempt < MAX_PAYMENT_ATTEMPTS => {
                tracing::debug!(
                    invoice_id,
                    attempt,
                    detail = %detail,
                    "Invoice balance moved; retrying payment"
                );
                attempt += 1;
            }
            Err(StoreError::NotFound { .. }) => return Ok(None),
            outcome => return outcome.map(Some),
        }
    }
}

async fn apply_payment(
    store: &dyn DocumentStore,
    owner: &str,
    invoice: &Document,
    payment: &PaymentRequest,
) -> Result<PaymentOutcome, StoreError> {
    let invoice_id = invoice.id.as_str();
    let total = invoice.f64_field(AMOUNT_FIELD).unwrap_or(0.0);
    let previously_paid = invoice.f64_field(AMOUNT_PAID_FIELD).unwrap_or(0.0);
    let paid = previously_paid + payment.amount;
    let status = status_for(paid, total);
    let was_paid = invoice.str_field(STATUS_FIELD) == Some("paid");

    let mut payment_fields = json!({
        OWNER_FIELD: owner,
        "invoiceId": invoice_id,
        "amount": payment.amount,
        "method": payment.method,
        "reference": payment.reference,
    });
    if let Some(paid_at) = payment.paid_at {
        payment_fields["paidAt"] = Value::String(format_timestamp(&paid_at));
    }

    let ops = vec![
        BatchOp::Create {
            collection: PAYMENTS_COLLECTION.to_string(),
            data: as_fields(payment_fields),
        },
        BatchOp::Update {
            collection: RecordKind::Invoices.collection().to_string(),
            id: invoice_id.to_string(),
            data: as_fields(json!({ AMOUNT_PAID_FIELD: paid, STATUS_FIELD: status })),
            guard: Some(Guard::current(invoice, AMOUNT_PAID_FIELD)),
        },
    ];
    let ids = documents::batch_write(store, ops).await?;
    let payment_id = ids.first().cloned().ok_or_else(|| {
        StoreError::Backend("batch returned no id for the payment".to_string())
    })?;

    let payment = documents::get_document(store, PAYMENTS_COLLECTION, &payment_id).await?;
    let invoice =
        documents::get_document(store, RecordKind::Invoices.collection(), invoice_id).await?;
    match (payment, invoice) {
        (Some(payment), Some(invoice)) => Ok(PaymentOutcome {
            payment,
            invoice,
            settled: status == "paid" && !was_paid,
        }),
        _ => Err(StoreError::Backend(format!(
            "payment {payment_id} for invoice {invoice_id} not readable after commit"
        ))),
    }
}

fn as_fields(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory::MemoryStore, StoreBackend};
    use crate::models::query::{PreparedWrite, Query};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    /// Memory store whose reads yield before returning, the way a network
    /// round trip would, so concurrent payments interleave.
    struct YieldingReads(MemoryStore);

    #[async_trait]
    impl DocumentStore for YieldingReads {
        fn backend(&self) -> StoreBackend {
            self.0.backend()
        }

        async fn insert(
            &self,
            collection: &str,
            fields: Fields,
            stamped_at: DateTime<Utc>,
        ) -> Result<String, StoreError> {
            self.0.insert(collection, fields, stamped_at).await
        }

        async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
            let found = self.0.fetch(collection, id).await;
            tokio::task::yield_now().await;
            found
        }

        async fn merge(
            &self,
            collection: &str,
            id: &str,
            fields: Fields,
            stamped_at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.0.merge(collection, id, fields, stamped_at).await
        }

        async fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError> {
            self.0.remove(collection, id).await
        }

        async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
            self.0.find(collection, query).await
        }

        async fn commit(&self, writes: Vec<PreparedWrite>) -> Result<Vec<String>, StoreError> {
            self.0.commit(writes).await
        }
    }

    fn payment(amount: f64) -> PaymentRequest {
        PaymentRequest {
            amount,
            method: Some("wire".into()),
            reference: None,
            paid_at: None,
        }
    }

    #[test]
    fn status_follows_balance() {
        assert_eq!(status_for(0.0, 100.0), "unpaid");
        assert_eq!(status_for(40.0, 100.0), "partial");
        assert_eq!(status_for(100.0, 100.0), "paid");
        assert_eq!(status_for(120.0, 100.0), "paid");
    }

    #[tokio::test]
    async fn payments_accumulate_until_settled() {
        let store = MemoryStore::new();
        let invoice = records::create_record(
            &store,
            RecordKind::Invoices,
            "u1",
            as_fields(json!({"invoiceNumber": "INV-7", "amount": 100})),
        )
        .await
        .unwrap();

        let first = record_payment(&store, "u1", &invoice.id, &payment(40.0))
            .await
            .unwrap()
            .expect("invoice");
        assert_eq!(first.invoice.str_field("status"), Some("partial"));
        assert!(!first.settled);
        assert!(first.payment.fields.get("reference").is_none());

        let second = record_payment(&store, "u1", &invoice.id, &payment(60.0))
            .await
            .unwrap()
            .expect("invoice");
        assert_eq!(second.invoice.str_field("status"), Some("paid"));
        assert_eq!(second.invoice.f64_field("amountPaid"), Some(100.0));
        assert!(second.settled);
        assert_eq!(store.len(PAYMENTS_COLLECTION).await, 2);
    }

    #[tokio::test]
    async fn foreign_invoices_are_not_found() {
        let store = MemoryStore::new();
        let invoice = records::create_record(
            &store,
            RecordKind::Invoices,
            "u1",
            as_fields(json!({"invoiceNumber": "INV-8", "amount": 50})),
        )
        .await
        .unwrap();
        assert!(record_payment(&store, "u2", &invoice.id, &payment(10.0))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.len(PAYMENTS_COLLECTION).await, 0);
    }

    #[tokio::test]
    async fn concurrent_payments_both_count() {
        let store = YieldingReads(MemoryStore::new());
        let invoice = records::create_record(
            &store,
            RecordKind::Invoices,
            "u1",
            as_fields(json!({"invoiceNumber": "INV-9", "amount": 100})),
        )
        .await
        .unwrap();

        let payment_a = payment(40.0);
        let payment_b = payment(40.0);
        let (first, second) = tokio::join!(
            record_payment(&store, "u1", &invoice.id, &payment_a),
            record_payment(&store, "u1", &invoice.id, &payment_b),
        );
        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_some());

        let stored = store
            .fetch(RecordKind::Invoices.collection(), &invoice.id)
            .await
            .unwrap()
            .expect("invoice");
        assert_eq!(store.0.len(PAYMENTS_COLLECTION).await, 2);
        assert_eq!(stored.f64_field("amountPaid"), Some(80.0));
        assert_eq!(stored.str_field("status"), Some("partial"));
    }
}
