//! Record model for structured log entries submitted by callers.
//!
//! A [`Record`] is an immutable mapping of field names to values, captured
//! at enqueue time. Records carry no identity of their own; ordering is
//! defined entirely by their position in the delivery queue.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name used by the timestamp convenience constructor.
const TIMESTAMP_FIELD: &str = "@timestamp";

/// Field name used for the primary message payload.
const LINE_FIELD: &str = "line";

/// A single structured log record.
///
/// Fields are kept in a sorted map so that iteration order, and therefore
/// the wire encoding, is deterministic. Values may be any JSON value;
/// non-string values are rendered as compact JSON text when framed.
///
/// # Examples
///
/// ```
/// use logship::Record;
///
/// let record = Record::new()
///     .with_field("line", "disk almost full")
///     .with_field("host", "edge-07")
///     .with_field("usage_pct", 93);
///
/// assert_eq!(record.len(), 3);
/// assert!(record.field("host").is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Create a record carrying a message line and an RFC 3339 `@timestamp`
    /// field, the shape collectors in this protocol family expect.
    pub fn event(line: impl Into<String>) -> Self {
        Self::new()
            .with_field(LINE_FIELD, line.into())
            .with_field(TIMESTAMP_FIELD, Utc::now().to_rfc3339())
    }

    /// Add a field to the record, replacing any previous value under the
    /// same name.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Iterate over fields in sorted name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields in the record.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}
