//! Outbound message delivery seam.
//!
//! The real providers (email, SMS, WhatsApp, Telegram) live behind
//! [`MessageDispatcher`]. The core only decides *what* to send (a template id
//! plus variables) and records whether delivery was accepted. Providers are
//! not retried automatically; the caller reports failure and keeps the
//! triggering record so delivery can be re-attempted out of band.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Template for a one-time passcode message; variables: `code`.
pub const TEMPLATE_OTP_CODE: &str = "otp-code";
/// Template greeting a newly registered user; variables: `user_id`.
pub const TEMPLATE_WELCOME: &str = "welcome";

/// Delivery channel for a recipient address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Sms,
    Whatsapp,
    Telegram,
}

impl ChannelType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "whatsapp" => Some(Self::Whatsapp),
            "telegram" => Some(Self::Telegram),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub channel: ChannelType,
    pub recipient: String,
    pub template_id: String,
    pub variables: BTreeMap<String, String>,
}

impl DispatchRequest {
    #[must_use]
    pub fn new(channel: ChannelType, recipient: &str, template_id: &str) -> Self {
        Self {
            channel,
            recipient: recipient.to_string(),
            template_id: template_id.to_string(),
            variables: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_variable(mut self, name: &str, value: &str) -> Self {
        self.variables.insert(name.to_string(), value.to_string());
        self
    }
}

#[derive(Clone, Debug)]
pub struct DispatchResponse {
    pub message_id: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider deadline exceeded")]
    Timeout,
}

#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// Hand a message to the provider for the request's channel.
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError>;
}

/// Local dev dispatcher that logs instead of sending.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl MessageDispatcher for LogDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        info!(
            channel = %request.channel,
            recipient = %request.recipient,
            template = %request.template_id,
            "message dispatch stub"
        );
        Ok(DispatchResponse {
            message_id: format!("log-{}", Uuid::new_v4().simple()),
            success: true,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_round_trips_through_str() {
        for channel in [
            ChannelType::Email,
            ChannelType::Sms,
            ChannelType::Whatsapp,
            ChannelType::Telegram,
        ] {
            assert_eq!(ChannelType::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(ChannelType::parse("carrier-pigeon"), None);
    }

    #[test]
    fn channel_type_serde_uses_lowercase() {
        let json = serde_json::to_string(&ChannelType::Whatsapp).expect("serialize");
        assert_eq!(json, "\"whatsapp\"");
    }

    #[tokio::test]
    async fn log_dispatcher_accepts_everything() {
        let response = LogDispatcher
            .dispatch(
                DispatchRequest::new(ChannelType::Email, "a@b.test", TEMPLATE_OTP_CODE)
                    .with_variable("code", "123456"),
            )
            .await
            .expect("dispatch");
        assert!(response.success);
        assert!(response.message_id.starts_with("log-"));
    }
}
