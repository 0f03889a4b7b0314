//! Query, ordering and batch shapes understood by every document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{strip_undefined, Document, Fields, SortKey};

/// Filter operators, spelled the way Firestore spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Evaluates the filter against a document. Documents without the field
    /// never match; range operators only match values of the same kind.
    pub fn matches(&self, document: &Document) -> bool {
        let key = document.sort_key(&self.field);
        if key.is_missing() {
            return false;
        }
        let expected = SortKey::from_value(Some(&self.value));

        match self.operator {
            FilterOp::Eq => key.compare(&expected).is_eq(),
            FilterOp::NotEq => !key.compare(&expected).is_eq(),
            FilterOp::Lt => key.same_kind(&expected) && key.compare(&expected).is_lt(),
            FilterOp::Lte => key.same_kind(&expected) && key.compare(&expected).is_le(),
            FilterOp::Gt => key.same_kind(&expected) && key.compare(&expected).is_gt(),
            FilterOp::Gte => key.same_kind(&expected) && key.compare(&expected).is_ge(),
            FilterOp::In => any_equal(&key, &self.value),
            FilterOp::NotIn => !any_equal(&key, &self.value),
            FilterOp::ArrayContains => element_keys(document, &self.field)
                .iter()
                .any(|element| element.compare(&expected).is_eq()),
            FilterOp::ArrayContainsAny => element_keys(document, &self.field)
                .iter()
                .any(|element| any_equal(element, &self.value)),
        }
    }
}

fn any_equal(key: &SortKey, candidates: &Value) -> bool {
    candidates.as_array().is_some_and(|values| {
        values
            .iter()
            .any(|value| key.compare(&SortKey::from_value(Some(value))).is_eq())
    })
}

fn element_keys(document: &Document, field: &str) -> Vec<SortKey> {
    document
        .fields
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| SortKey::from_value(Some(item)))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }

    /// Stable in-memory sort. Null or missing keys end up last when
    /// ascending and first when descending.
    pub fn sort(&self, documents: &mut [Document]) {
        documents.sort_by(|a, b| {
            let ordering = a
                .sort_key(&self.field)
                .compare(&b.sort_key(&self.field));
            match self.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        });
    }
}

/// AND-combined filters with an optional ordering and limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same filters and limit, no ordering clause.
    pub fn without_order(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            order_by: None,
            limit: self.limit,
        }
    }

    /// Distinct fields referenced by filters and ordering, in first-seen order.
    pub fn indexed_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        let ordered = self.order_by.iter().map(|order| &order.field);
        for field in self.filters.iter().map(|f| &f.field).chain(ordered) {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }
}

/// Result of a query through the access layer.
///
/// `index_fallback` is set when the store could not order the query natively
/// and the page was sorted in memory instead. Such a page holds the first
/// `limit` matches in store order, sorted afterwards, which is not the same
/// window a natively ordered query would return.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    pub documents: Vec<Document>,
    pub index_fallback: bool,
}

/// Expected current value of a field; an update carrying it only applies
/// while it holds. `null` expects the field to be absent or null. Numbers
/// compare by value, so `40` matches `40.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard {
    pub field: String,
    pub value: Value,
}

impl Guard {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Guard on whatever `document` currently holds in `field`.
    pub fn current(document: &Document, field: &str) -> Self {
        Self::new(field, document.fields.get(field).cloned().unwrap_or(Value::Null))
    }

    pub fn holds(&self, fields: &Fields) -> bool {
        let current = fields.get(&self.field).unwrap_or(&Value::Null);
        match (current.as_f64(), self.value.as_f64()) {
            (Some(current), Some(expected)) => current == expected,
            _ => *current == self.value,
        }
    }
}

/// Caller-facing batch operation: `{type, collection, id?, data?, guard?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatchOp {
    Create {
        collection: String,
        data: Fields,
    },
    Update {
        collection: String,
        id: String,
        data: Fields,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guard: Option<Guard>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl BatchOp {
    /// Strips undefined fields and attaches the write timestamp.
    pub fn prepare(self, stamped_at: DateTime<Utc>) -> PreparedWrite {
        match self {
            BatchOp::Create { collection, data } => PreparedWrite::Create {
                collection,
                fields: strip_undefined(data),
                stamped_at,
            },
            BatchOp::Update {
                collection,
                id,
                data,
                guard,
            } => PreparedWrite::Update {
                collection,
                id,
                fields: strip_undefined(data),
                guard,
                stamped_at,
            },
            BatchOp::Delete { collection, id } => PreparedWrite::Delete { collection, id },
        }
    }
}

/// Batch operation as handed to a store backend.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedWrite {
    Create {
        collection: String,
        fields: Fields,
        stamped_at: DateTime<Utc>,
    },
    /// Fails the whole batch with [`StoreError::NotFound`] when the document
    /// is missing and [`StoreError::Conflict`] when `guard` does not hold.
    ///
    /// [`StoreError::NotFound`]: crate::db::StoreError::NotFound
    /// [`StoreError::Conflict`]: crate::db::StoreError::Conflict
    Update {
        collection: String,
        id: String,
        fields: Fields,
        guard: Option<Guard>,
        stamped_at: DateTime<Utc>,
    },
    Delete {
        collection: String,
        id: String,
    },
}
