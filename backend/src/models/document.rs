//! Store-agnostic document representation shared by every backend.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field mapping of a document, without its identity and timestamps.
pub type Fields = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

const RESERVED_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

/// A stored document: `{id, ...fields, createdAt, updatedAt}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn f64_field(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    /// Normalized ordering key for `field`.
    pub fn sort_key(&self, field: &str) -> SortKey {
        match field {
            CREATED_AT_FIELD => SortKey::Timestamp(self.created_at),
            UPDATED_AT_FIELD => SortKey::Timestamp(self.updated_at),
            ID_FIELD => SortKey::Text(self.id.clone()),
            _ => SortKey::from_value(self.fields.get(field)),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Drops `null` entries (the JSON spelling of an undefined field) and the
/// store-managed keys a caller must not set.
pub fn strip_undefined(fields: Fields) -> Fields {
    fields
        .into_iter()
        .filter(|(key, value)| !value.is_null() && !RESERVED_FIELDS.contains(&key.as_str()))
        .collect()
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Ordering key that puts values from different stores on one scale.
///
/// Timestamps arrive as RFC 3339 strings, Mongo extended JSON (`{"$date": ..}`)
/// or Firestore second/nanosecond pairs; all of them become `Timestamp`.
/// `Missing` (null or absent) compares greater than everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Bool(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
    Composite(String),
    Missing,
}

impl SortKey {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => SortKey::Missing,
            Some(Value::Bool(flag)) => SortKey::Bool(*flag),
            Some(Value::Number(number)) => number
                .as_f64()
                .map(SortKey::Number)
                .unwrap_or(SortKey::Missing),
            Some(Value::String(text)) => parse_timestamp(text)
                .map(SortKey::Timestamp)
                .unwrap_or_else(|| SortKey::Text(text.clone())),
            Some(Value::Object(map)) => timestamp_from_object(map)
                .map(SortKey::Timestamp)
                .unwrap_or_else(|| SortKey::Composite(Value::Object(map.clone()).to_string())),
            Some(other @ Value::Array(_)) => SortKey::Composite(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Bool(_) => 0,
            SortKey::Number(_) => 1,
            SortKey::Timestamp(_) => 2,
            SortKey::Text(_) => 3,
            SortKey::Composite(_) => 4,
            SortKey::Missing => 5,
        }
    }

    pub fn same_kind(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, SortKey::Missing)
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Bool(a), SortKey::Bool(b)) => a.cmp(b),
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Timestamp(a), SortKey::Timestamp(b)) => a.cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Composite(a), SortKey::Composite(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

fn timestamp_from_object(map: &Map<String, Value>) -> Option<DateTime<Utc>> {
    if let Some(date) = map.get("$date") {
        return match date {
            Value::String(text) => parse_timestamp(text),
            Value::Number(millis) => millis
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            Value::Object(inner) => inner
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<i64>().ok())
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            _ => None,
        };
    }

    let seconds = map.get("seconds").or_else(|| map.get("_seconds"))?;
    let seconds = seconds
        .as_i64()
        .or_else(|| seconds.as_str().and_then(|raw| raw.parse().ok()))?;
    let nanos = map
        .get("nanos")
        .or_else(|| map.get("_nanoseconds"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
}
