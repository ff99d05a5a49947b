use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the session was earned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMethod {
    Otp,
    Webauthn,
    Passwordless,
    Temporary,
}

impl SessionMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Otp => "otp",
            Self::Webauthn => "webauthn",
            Self::Passwordless => "passwordless",
            Self::Temporary => "temporary",
        }
    }
}

/// An `AuthSession` node as persisted in the store.
///
/// Only the token hash persists. A session is effectively valid iff
/// `valid && now < expires_at`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub uid: String,
    pub user_id: String,
    pub method: SessionMethod,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Optional request metadata captured on issuance.
#[derive(Clone, Debug, Default)]
pub struct SessionMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

/// A freshly minted session.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub token: String,
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Validation verdict. Invalid tokens carry no detail beyond `message`.
#[derive(Clone, Debug)]
pub struct SessionValidation {
    pub valid: bool,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl SessionValidation {
    pub(crate) fn invalid() -> Self {
        Self {
            valid: false,
            user_id: None,
            expires_at: None,
            message: "invalid session".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RevocationOutcome {
    pub revoked: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_record_deserializes_from_store_row() {
        let row = json!({
            "uid": "0x9",
            "userId": "user_1_abcdef12",
            "method": "webauthn",
            "tokenHash": "deadbeef",
            "createdAt": "2025-06-01T12:00:00+00:00",
            "expiresAt": "2025-06-02T12:00:00+00:00",
            "valid": true
        });
        let record: SessionRecord = serde_json::from_value(row).expect("deserialize");
        assert_eq!(record.method, SessionMethod::Webauthn);
        assert!(record.valid);
        assert_eq!(record.last_used, None);
        assert_eq!(record.device_id, None);
    }
}
