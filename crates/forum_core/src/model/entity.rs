//! Entity contract implemented by every persisted forum record.
//!
//! # Responsibility
//! - Describe how one entity type maps onto its SQLite table.
//! - Give the session uniform access to the audit envelope.
//!
//! # Invariants
//! - `COLUMNS` lists domain columns only; envelope columns are implied.
//! - `column_values()` yields values in `COLUMNS` order.

use crate::error::PersistenceResult;
use crate::model::audit::AuditEnvelope;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;

/// Store-assigned surrogate identity.
pub type EntityId = i64;

/// Identity of an acting principal. Users are entities too.
pub type UserId = EntityId;

/// A persisted record carrying the audit envelope.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Backing table name.
    const TABLE: &'static str;
    /// Domain columns, excluding the envelope.
    const COLUMNS: &'static [&'static str];

    fn audit(&self) -> &AuditEnvelope;
    fn audit_mut(&mut self) -> &mut AuditEnvelope;

    /// Domain column values in `COLUMNS` order.
    fn column_values(&self) -> Vec<Value>;

    /// Decodes one row selected with envelope and domain columns.
    fn from_row(row: &Row<'_>) -> PersistenceResult<Self>;

    fn id(&self) -> Option<EntityId> {
        self.audit().id
    }
}

/// Conversion into a bindable SQLite value.
///
/// Timestamps are stored as fixed-width RFC 3339 text with nanosecond
/// precision so lexical order matches chronological order.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for &String {
    fn into_value(self) -> Value {
        Value::Text(self.clone())
    }
}

impl IntoValue for DateTime<Utc> {
    fn into_value(self) -> Value {
        Value::Text(self.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string())
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(value) => value.into_value(),
            None => Value::Null,
        }
    }
}
