//! Core event types for rivulex.
//!
//! An [`Event`] is what a handler sees: one record read from a stream on
//! behalf of a consumer group, together with the delivery attempt the log
//! has recorded for it. [`Headers`] is the JSON header block that travels
//! with every record; rivulex reserves a handful of keys and passes
//! everything else through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header block carried by every record.
///
/// The publisher stamps `timestamp` and `group`; a rejecting group adds
/// `rejected`, `rejectedGroup` and `rejectedTimestamp` before the record is
/// appended to the dead-letter stream. User-defined keys survive the full
/// round trip in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Headers {
    /// RFC-3339 creation time, set by the publisher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Group label of the publisher that appended the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Set to `true` when a group rejected this record to the dead-letter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<bool>,

    /// Group that performed the rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_group: Option<String>,

    /// RFC-3339 time of the rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_timestamp: Option<String>,

    /// User-defined header keys, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Headers {
    /// True when this record was rejected by a group other than `group`.
    ///
    /// Consumers of the dead-letter stream use this to skip records that
    /// belong to some other group's failure flow.
    pub fn rejected_by_other(&self, group: &str) -> bool {
        self.rejected == Some(true) && self.rejected_group.as_deref() != Some(group)
    }
}

/// A decoded record as dispatched to handlers.
#[derive(Debug, Clone)]
pub struct Event {
    /// Stream-assigned record ID (e.g. `"1234567890123-0"`).
    pub id: String,

    /// Stream the record was read from.
    pub stream: String,

    /// Action name used for handler lookup.
    pub action: String,

    /// Delivery attempt recorded by the log. `0` on the live path; the
    /// pending path reports the count observed at claim time.
    pub attempt: u64,

    /// Header block.
    pub headers: Headers,

    /// Opaque JSON payload.
    pub payload: Value,
}

/// One entry of a batched publish.
///
/// `stream` overrides the publisher's default stream when set.
#[derive(Debug, Clone)]
pub struct PublishEntry {
    /// Target stream; the publisher's `default_stream` when `None`.
    pub stream: Option<String>,

    /// Action name.
    pub action: String,

    /// Opaque JSON payload.
    pub payload: Value,

    /// Caller-supplied headers; `timestamp` and `group` are stamped on top.
    pub headers: Headers,
}

impl PublishEntry {
    /// Entry targeting the publisher's default stream.
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            stream: None,
            action: action.into(),
            payload,
            headers: Headers::default(),
        }
    }

    /// Redirect this entry to an explicit stream.
    pub fn to_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Attach caller headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn headers_serialize_camel_case() {
        let headers = Headers {
            rejected: Some(true),
            rejected_group: Some("billing".to_string()),
            rejected_timestamp: Some("2026-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };

        let json_str = serde_json::to_string(&headers).unwrap();
        assert!(json_str.contains("rejectedGroup"));
        assert!(json_str.contains("rejectedTimestamp"));
        assert!(!json_str.contains("timestamp"));
    }

    #[test]
    fn headers_preserve_user_keys() {
        let raw = r#"{"timestamp":"2026-01-01T00:00:00Z","group":"g","traceId":"abc"}"#;
        let headers: Headers = serde_json::from_str(raw).unwrap();

        assert_eq!(headers.group.as_deref(), Some("g"));
        assert_eq!(headers.extra.get("traceId"), Some(&json!("abc")));

        let round = serde_json::to_string(&headers).unwrap();
        assert!(round.contains("traceId"));
    }

    #[test]
    fn rejected_by_other_requires_foreign_group() {
        let mut headers = Headers {
            rejected: Some(true),
            rejected_group: Some("a".to_string()),
            ..Default::default()
        };

        assert!(headers.rejected_by_other("b"));
        assert!(!headers.rejected_by_other("a"));

        headers.rejected = None;
        assert!(!headers.rejected_by_other("b"));
    }
}
