//! Wire codec for stream records.
//!
//! A record travels as ordered field pairs: `action`, `payload` (JSON
//! text), `headers` (JSON text) and, on claim responses, `attempt`. The
//! encoder stamps `timestamp` and `group` into the headers; the decoder
//! accepts both the 3-pair and the 4-pair shape and defaults a missing
//! attempt to 0.
//!
//! A record that fails to decode is a per-event error: the caller skips it
//! without acknowledging, so the pending path surfaces it again for
//! operator attention.

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::event::{Event, Headers};
use crate::log::RawRecord;

pub const FIELD_ACTION: &str = "action";
pub const FIELD_PAYLOAD: &str = "payload";
pub const FIELD_HEADERS: &str = "headers";
pub const FIELD_ATTEMPT: &str = "attempt";

/// Per-record decode failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record {id} is missing field '{field}'")]
    MissingField { id: String, field: &'static str },

    #[error("record {id} has malformed JSON in '{field}': {source}")]
    MalformedJson {
        id: String,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Encode an entry for appending, stamping `timestamp = now` and `group`
/// into the headers.
pub fn encode(action: &str, payload: &Value, headers: &Headers, group: &str) -> Vec<(String, String)> {
    let mut headers = headers.clone();
    headers.timestamp = Some(Utc::now().to_rfc3339());
    headers.group = Some(group.to_string());
    reencode(action, payload, &headers)
}

/// Encode with the headers exactly as given. Used by the rejection path,
/// which must preserve the original `timestamp` and `group` while adding
/// the rejection keys.
pub fn reencode(action: &str, payload: &Value, headers: &Headers) -> Vec<(String, String)> {
    // Value and Headers serialize infallibly; any non-string map key would
    // already have failed at construction.
    let payload_json = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    let headers_json = serde_json::to_string(headers).unwrap_or_else(|_| "{}".to_string());

    vec![
        (FIELD_ACTION.to_string(), action.to_string()),
        (FIELD_PAYLOAD.to_string(), payload_json),
        (FIELD_HEADERS.to_string(), headers_json),
    ]
}

/// Decode a raw record read from `stream` into an in-memory event.
pub fn decode(stream: &str, record: &RawRecord) -> Result<Event, CodecError> {
    let action = require(record, FIELD_ACTION)?;
    let payload_raw = require(record, FIELD_PAYLOAD)?;
    let headers_raw = require(record, FIELD_HEADERS)?;

    let payload: Value = serde_json::from_str(payload_raw).map_err(|source| CodecError::MalformedJson {
        id: record.id.clone(),
        field: FIELD_PAYLOAD,
        source,
    })?;
    let headers: Headers = serde_json::from_str(headers_raw).map_err(|source| CodecError::MalformedJson {
        id: record.id.clone(),
        field: FIELD_HEADERS,
        source,
    })?;

    let attempt = record
        .field(FIELD_ATTEMPT)
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(Event {
        id: record.id.clone(),
        stream: stream.to_string(),
        action: action.to_string(),
        attempt,
        headers,
        payload,
    })
}

fn require<'a>(record: &'a RawRecord, field: &'static str) -> Result<&'a str, CodecError> {
    record.field(field).ok_or_else(|| CodecError::MissingField {
        id: record.id.clone(),
        field,
    })
}
