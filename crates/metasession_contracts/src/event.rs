#![forbid(unsafe_code)]

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const EVENT_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Wire format of `timestamp` accepted by the encode helper and echoed back on output.
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const TENANT_ID_MAX_LEN: usize = 64;
pub const SESSION_ID_MAX_LEN: usize = 128;
pub const EVENT_TYPE_MAX_LEN: usize = 255;
pub const EVENT_FINGERPRINT_HEX_LEN: usize = 40;

macro_rules! string_id {
    ($name:ident, $field:literal, $validate:ident, $max:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
                let v = Self(id.into());
                v.validate()?;
                Ok(v)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Validate for $name {
            fn validate(&self) -> Result<(), ContractViolation> {
                $validate($field, &self.0, $max)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ContractViolation;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(TenantId, "tenant_id", validate_text, TENANT_ID_MAX_LEN);
string_id!(SessionId, "session_id", validate_text, SESSION_ID_MAX_LEN);
string_id!(EventType, "event_type", validate_text, EVENT_TYPE_MAX_LEN);
string_id!(
    EventFingerprint,
    "event_fingerprint",
    validate_fingerprint,
    EVENT_FINGERPRINT_HEX_LEN
);

fn validate_fingerprint(
    field: &'static str,
    s: &str,
    hex_len: usize,
) -> Result<(), ContractViolation> {
    if s.len() != hex_len
        || !s
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be lowercase hex sha1 (40 chars)",
        });
    }
    Ok(())
}

/// A decoded, validated event that has not been admitted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCandidate {
    pub schema_version: SchemaVersion,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub event_type: EventType,
    pub event_timestamp: NaiveDateTime,
    /// Hash of the transport payload exactly as received; the dedup key.
    pub fingerprint: EventFingerprint,
}

impl EventCandidate {
    pub fn v1(
        tenant_id: TenantId,
        session_id: SessionId,
        event_type: EventType,
        event_timestamp: NaiveDateTime,
        fingerprint: EventFingerprint,
    ) -> Result<Self, ContractViolation> {
        let c = Self {
            schema_version: EVENT_CONTRACT_VERSION,
            tenant_id,
            session_id,
            event_type,
            event_timestamp,
            fingerprint,
        };
        c.validate()?;
        Ok(c)
    }
}

impl Validate for EventCandidate {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != EVENT_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "event_candidate.schema_version",
                reason: "must match EVENT_CONTRACT_VERSION",
            });
        }
        self.tenant_id.validate()?;
        self.session_id.validate()?;
        self.event_type.validate()?;
        self.fingerprint.validate()?;
        Ok(())
    }
}

pub fn format_event_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(EVENT_TIMESTAMP_FORMAT).to_string()
}
