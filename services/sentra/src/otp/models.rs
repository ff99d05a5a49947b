use crate::dispatch::ChannelType;
use crate::routing::models::RouteAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why the code was requested; persisted for audit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpPurpose {
    Signin,
    Signup,
}

impl OtpPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signin => "signin",
            Self::Signup => "signup",
        }
    }
}

/// A `ChannelOTP` node as persisted in the store.
///
/// `channel_hash` and `otp_hash` are SHA-256 digests; the raw recipient and
/// code never persist. Once `used` is set the record is terminal and kept for
/// audit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOtpRecord {
    pub uid: String,
    pub channel_hash: String,
    pub channel_type: ChannelType,
    pub otp_hash: String,
    pub verified: bool,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub purpose: OtpPurpose,
}

/// Result of a send: the record exists even when delivery failed.
#[derive(Clone, Debug)]
pub struct SendOtpOutcome {
    pub otp_id: String,
    pub sent: bool,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

/// Result of a verification attempt. Routing fields are only present on
/// success.
#[derive(Clone, Debug)]
pub struct VerifyOtpOutcome {
    pub verified: bool,
    pub message: String,
    pub user_id: Option<String>,
    pub action: Option<RouteAction>,
    pub channel_did: Option<String>,
}

impl VerifyOtpOutcome {
    pub(crate) fn rejected(message: &str) -> Self {
        Self {
            verified: false,
            message: message.to_string(),
            user_id: None,
            action: None,
            channel_did: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn record_deserializes_from_store_row() {
        let row = json!({
            "uid": "0x1",
            "channelHash": "abc",
            "channelType": "email",
            "otpHash": "def",
            "verified": false,
            "used": false,
            "expiresAt": "2025-06-01T12:05:00+00:00",
            "createdAt": "2025-06-01T12:00:00+00:00",
            "purpose": "signup"
        });
        let record: ChannelOtpRecord = serde_json::from_value(row).expect("deserialize");
        assert_eq!(record.channel_type, ChannelType::Email);
        assert_eq!(record.purpose, OtpPurpose::Signup);
        assert_eq!(record.user_id, None);
        assert_eq!(
            record.expires_at,
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 5, 0).unwrap()
        );
    }
}
