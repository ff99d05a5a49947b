use crate::session::models::IssuedSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which ceremony a challenge belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    Registration,
    Authentication,
}

impl ChallengeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }
}

/// A `WebAuthnChallenge` node. Single-use: deleted on successful
/// consumption, garbage-collected past expiry otherwise.
///
/// `state` holds the serialized ceremony state issued alongside the
/// challenge; verification replays it into the library.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRecord {
    pub uid: String,
    pub challenge: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub state: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A `WebAuthnCredential` node. `public_key` is the serialized credential
/// (COSE key plus verification state) exactly as the library emitted it;
/// `sign_count` is monotonically non-decreasing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub uid: String,
    pub user_id: String,
    pub credential_id: String,
    pub public_key: String,
    pub sign_count: u32,
    #[serde(default)]
    pub transports: Vec<String>,
    pub added_at: DateTime<Utc>,
}

/// Enrollment verdict. Protocol rejections are reported with `success =
/// false` and an opaque message; the audit trail has the detail.
#[derive(Clone, Debug)]
pub struct RegistrationOutcome {
    pub success: bool,
    pub credential_id: Option<String>,
    pub message: String,
}

impl RegistrationOutcome {
    pub(crate) fn rejected() -> Self {
        Self {
            success: false,
            credential_id: None,
            message: "registration verification failed".to_string(),
        }
    }
}

/// Assertion verdict; a success carries the session minted for it.
#[derive(Clone, Debug)]
pub struct AuthenticationOutcome {
    pub success: bool,
    pub session_id: Option<String>,
    pub session: Option<IssuedSession>,
    pub message: String,
}

impl AuthenticationOutcome {
    pub(crate) fn rejected() -> Self {
        Self {
            success: false,
            session_id: None,
            session: None,
            message: "authentication verification failed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn challenge_record_uses_type_predicate() {
        let row = json!({
            "uid": "0x5",
            "challenge": "Y2hhbGxlbmdl",
            "userId": "user_1_abcdef12",
            "type": "registration",
            "state": "{}",
            "expiresAt": "2025-06-01T12:05:00+00:00",
            "createdAt": "2025-06-01T12:00:00+00:00"
        });
        let record: ChallengeRecord = serde_json::from_value(row).expect("deserialize");
        assert_eq!(record.challenge_type, ChallengeType::Registration);
        assert_eq!(record.state, "{}");
    }

    #[test]
    fn credential_record_defaults_missing_transports() {
        let row = json!({
            "uid": "0x6",
            "userId": "user_1_abcdef12",
            "credentialId": "Y3JlZA",
            "publicKey": "{}",
            "signCount": 3,
            "addedAt": "2025-06-01T12:00:00+00:00"
        });
        let record: CredentialRecord = serde_json::from_value(row).expect("deserialize");
        assert_eq!(record.sign_count, 3);
        assert!(record.transports.is_empty());
    }
}
