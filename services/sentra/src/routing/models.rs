use crate::dispatch::ChannelType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which flow the caller should continue with after routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    Signin,
    Register,
}

impl RouteAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signin => "signin",
            Self::Register => "register",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Pending,
    Active,
    Suspended,
}

impl UserStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
        }
    }
}

/// A `User` node as persisted in the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: String,
    pub status: UserStatus,
    pub did: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A `UserChannel` node: one verified delivery route owned by one user,
/// unique per `(channelHash, channelType)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChannelRecord {
    pub uid: String,
    pub user_id: String,
    pub channel_type: ChannelType,
    pub channel_hash: String,
    pub verified: bool,
    pub primary: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Routing decision returned to the caller.
#[derive(Clone, Debug)]
pub struct RouteOutcome {
    pub user_exists: bool,
    pub action: RouteAction,
    pub user_id: String,
    pub available_methods: Vec<String>,
    pub next_step: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_status_persists_uppercase() {
        assert_eq!(
            serde_json::to_value(UserStatus::Pending).expect("serialize"),
            json!("PENDING")
        );
        let parsed: UserStatus = serde_json::from_value(json!("SUSPENDED")).expect("parse");
        assert_eq!(parsed, UserStatus::Suspended);
    }

    #[test]
    fn channel_record_deserializes_without_last_used() {
        let row = json!({
            "uid": "0x2",
            "userId": "user_1_abcdef12",
            "channelType": "email",
            "channelHash": "did",
            "verified": true,
            "primary": true,
            "createdAt": "2025-06-01T12:00:00+00:00"
        });
        let record: UserChannelRecord = serde_json::from_value(row).expect("deserialize");
        assert!(record.verified);
        assert_eq!(record.last_used_at, None);
    }
}
