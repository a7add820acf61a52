#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime};
use metasession_contracts::event::{
    EventCandidate, EventFingerprint, EventType, SessionId, TenantId, EVENT_TIMESTAMP_FORMAT,
    EVENT_TYPE_MAX_LEN, SESSION_ID_MAX_LEN, TENANT_ID_MAX_LEN,
};
use metasession_contracts::ContractViolation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};

pub const FIELD_TENANT_ID: &str = "tenant_id";
pub const FIELD_SESSION_ID: &str = "session_id";
pub const FIELD_EVENT_TYPE: &str = "event_type";
pub const FIELD_TIMESTAMP: &str = "timestamp";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload json must be an object")]
    NotAnObject,
    #[error("payload field {field} is missing")]
    MissingField { field: &'static str },
    #[error("payload field {field} has an unsupported type")]
    InvalidFieldType { field: &'static str },
    #[error("payload field timestamp is not a valid date-time")]
    InvalidTimestamp,
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

/// Decodes a base64 JSON transport payload into an event candidate.
///
/// The fingerprint covers `raw` exactly as received, so two payloads carrying the same
/// fields with different key order or whitespace are distinct events.
pub fn decode_payload(raw: &str) -> Result<EventCandidate, DecodeError> {
    let json_bytes = BASE64.decode(raw.as_bytes())?;
    let doc: Value = serde_json::from_slice(&json_bytes)?;
    let Value::Object(doc) = doc else {
        return Err(DecodeError::NotAnObject);
    };

    // Presence is checked for all four fields before any typing so that a missing
    // field always reports as missing.
    let tenant = required_field(&doc, FIELD_TENANT_ID)?;
    let session = required_field(&doc, FIELD_SESSION_ID)?;
    let event_type = required_field(&doc, FIELD_EVENT_TYPE)?;
    let timestamp = required_field(&doc, FIELD_TIMESTAMP)?;

    let tenant_id = TenantId::new(identifier_text(tenant, FIELD_TENANT_ID)?)?;
    let session_id = SessionId::new(identifier_text(session, FIELD_SESSION_ID)?)?;
    let event_type = EventType::new(string_field(event_type, FIELD_EVENT_TYPE)?)?;
    let event_timestamp = parse_event_timestamp(&string_field(timestamp, FIELD_TIMESTAMP)?)
        .ok_or(DecodeError::InvalidTimestamp)?;

    Ok(EventCandidate::v1(
        tenant_id,
        session_id,
        event_type,
        event_timestamp,
        payload_fingerprint(raw.as_bytes())?,
    )?)
}

pub fn payload_fingerprint(raw: &[u8]) -> Result<EventFingerprint, ContractViolation> {
    let digest = Sha1::digest(raw);
    let hex = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    EventFingerprint::new(hex)
}

/// Accepts the wire layout, its `T`-separated variant and RFC 3339 (normalized to UTC).
pub fn parse_event_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn required_field<'a>(
    doc: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, DecodeError> {
    match doc.get(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField { field }),
        Some(v) => Ok(v),
    }
}

fn identifier_text(v: &Value, field: &'static str) -> Result<String, DecodeError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(DecodeError::InvalidFieldType { field }),
    }
}

fn string_field(v: &Value, field: &'static str) -> Result<String, DecodeError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        _ => Err(DecodeError::InvalidFieldType { field }),
    }
}

/// Input of the encode helper. Absent and `null` fields are both treated as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodeRequest {
    #[serde(default)]
    pub tenant_id: Option<Value>,
    #[serde(default)]
    pub session_id: Option<Value>,
    #[serde(default)]
    pub event_type: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload missing or invalid")]
pub struct EncodeValidationError {
    pub details: BTreeMap<String, Vec<String>>,
}

#[derive(Serialize)]
struct EncodedPayloadBody<'a> {
    tenant_id: &'a Value,
    session_id: &'a str,
    event_type: &'a str,
    timestamp: &'a str,
}

/// Validates the four fields and returns base64 of their JSON object, keys in
/// `tenant_id, session_id, event_type, timestamp` order.
pub fn encode_payload(request: &EncodeRequest) -> Result<String, EncodeValidationError> {
    let mut details: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let tenant_id = match request.tenant_id.as_ref().filter(|v| is_present(v)) {
        None => {
            reject(&mut details, FIELD_TENANT_ID, required_message(FIELD_TENANT_ID));
            None
        }
        Some(v @ (Value::String(_) | Value::Number(_))) => {
            let text = identifier_text(v, FIELD_TENANT_ID).unwrap_or_default();
            within_max_chars(&mut details, FIELD_TENANT_ID, &text, TENANT_ID_MAX_LEN).then_some(v)
        }
        Some(_) => {
            reject(
                &mut details,
                FIELD_TENANT_ID,
                format!("The {} field must be a string or number.", attribute(FIELD_TENANT_ID)),
            );
            None
        }
    };
    let session_id = required_string(&mut details, request.session_id.as_ref(), FIELD_SESSION_ID)
        .filter(|s| within_max_chars(&mut details, FIELD_SESSION_ID, s, SESSION_ID_MAX_LEN));
    let event_type = required_string(&mut details, request.event_type.as_ref(), FIELD_EVENT_TYPE)
        .filter(|s| within_max_chars(&mut details, FIELD_EVENT_TYPE, s, EVENT_TYPE_MAX_LEN));
    let timestamp = match request.timestamp.as_ref().filter(|v| is_present(v)) {
        None => {
            reject(&mut details, FIELD_TIMESTAMP, required_message(FIELD_TIMESTAMP));
            None
        }
        Some(Value::String(s)) if matches_wire_timestamp(s) => Some(s.as_str()),
        Some(_) => {
            reject(
                &mut details,
                FIELD_TIMESTAMP,
                format!(
                    "The {} field must match the format Y-m-d H:i:s.",
                    attribute(FIELD_TIMESTAMP)
                ),
            );
            None
        }
    };

    match (tenant_id, session_id, event_type, timestamp) {
        (Some(tenant_id), Some(session_id), Some(event_type), Some(timestamp))
            if details.is_empty() =>
        {
            let body = EncodedPayloadBody {
                tenant_id,
                session_id,
                event_type,
                timestamp,
            };
            // Serializing a struct of strings and a JSON value cannot fail.
            let json = serde_json::to_vec(&body).unwrap_or_default();
            Ok(BASE64.encode(json))
        }
        _ => Err(EncodeValidationError { details }),
    }
}

fn required_string<'a>(
    details: &mut BTreeMap<String, Vec<String>>,
    value: Option<&'a Value>,
    field: &'static str,
) -> Option<&'a str> {
    match value.filter(|v| is_present(v)) {
        None => {
            reject(details, field, required_message(field));
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            reject(
                details,
                field,
                format!("The {} field must be a string.", attribute(field)),
            );
            None
        }
    }
}

fn is_present(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn matches_wire_timestamp(s: &str) -> bool {
    NaiveDateTime::parse_from_str(s, EVENT_TIMESTAMP_FORMAT)
        .map(|ts| ts.format(EVENT_TIMESTAMP_FORMAT).to_string() == s)
        .unwrap_or(false)
}

/// Same character limits the contracts enforce on decode.
fn within_max_chars(
    details: &mut BTreeMap<String, Vec<String>>,
    field: &str,
    text: &str,
    max_chars: usize,
) -> bool {
    if text.chars().count() <= max_chars {
        return true;
    }
    reject(
        details,
        field,
        format!(
            "The {} field must not be greater than {} characters.",
            attribute(field),
            max_chars
        ),
    );
    false
}

fn attribute(field: &str) -> String {
    field.replace('_', " ")
}

fn required_message(field: &str) -> String {
    format!("The {} field is required.", attribute(field))
}

fn reject(details: &mut BTreeMap<String, Vec<String>>, field: &str, message: String) {
    details.entry(field.to_string()).or_default().push(message);
}
