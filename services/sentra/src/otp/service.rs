//! OTP engine: generation, channel delivery, single-use verification.

use super::models::{OtpPurpose, SendOtpOutcome, VerifyOtpOutcome};
use super::repo::OtpRepo;
use crate::audit::{AuditCategory, AuditEvent, AuditRecorder, AuditSeverity};
use crate::clock::Clock;
use crate::config::OtpConfig;
use crate::dispatch::{
    ChannelType, DispatchRequest, MessageDispatcher, TEMPLATE_OTP_CODE, TEMPLATE_WELCOME,
};
use crate::error::CoreError;
use crate::hashing::{channel_did, sha256_hex};
use crate::routing::models::RouteAction;
use crate::routing::service::RouterService;
use crate::store::{GraphStore, schema};
use chrono::Duration;
use rand::Rng;
use rand::rngs::OsRng;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};

const SOURCE: &str = "otp-engine";
const INVALID_OR_USED: &str = "Invalid OTP code or OTP has already been used";
const EXPIRED: &str = "OTP has expired";

pub struct OtpService {
    store: Arc<dyn GraphStore>,
    dispatcher: Arc<dyn MessageDispatcher>,
    router: Arc<RouterService>,
    clock: Arc<dyn Clock>,
    config: OtpConfig,
    dispatch_timeout: StdDuration,
    audit: AuditRecorder,
}

impl OtpService {
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        dispatcher: Arc<dyn MessageDispatcher>,
        router: Arc<RouterService>,
        clock: Arc<dyn Clock>,
        config: OtpConfig,
        dispatch_timeout: StdDuration,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            store,
            dispatcher,
            router,
            clock,
            config,
            dispatch_timeout,
            audit,
        }
    }

    /// Generate a code, persist its hashes, and attempt delivery.
    ///
    /// The record is persisted even when delivery fails so late manual
    /// delivery and audit can proceed; `sent` reports the delivery result.
    ///
    /// # Errors
    ///
    /// Fails hard on invalid input or a store/CSPRNG failure. Delivery
    /// failure is not an error.
    pub async fn send(
        &self,
        channel: ChannelType,
        recipient: &str,
        purpose: OtpPurpose,
        user_id: Option<&str>,
    ) -> Result<SendOtpOutcome, CoreError> {
        validate_recipient(channel, recipient)?;

        let code = generate_code(self.config.digits());
        let now = self.clock.now();
        let expires_at = now + Duration::minutes(self.config.expiry_minutes());

        let uid = OtpRepo::create(
            self.store.as_ref(),
            &sha256_hex(recipient),
            channel,
            &sha256_hex(&code),
            purpose,
            user_id,
            now,
            expires_at,
        )
        .await?;
        let otp_id = uid.clone();

        let send_error = self.deliver_code(channel, recipient, &code).await;
        let sent = send_error.is_none();
        if let Some(ref reason) = send_error {
            error!(channel = %channel, "failed to deliver OTP: {reason}");
        }

        self.audit.emit(self.event(
            "otp.generated",
            schema::CHANNEL_OTP,
            &uid,
            user_id.unwrap_or(SOURCE),
            json!({
                "channel": channel.as_str(),
                "expiresAt": expires_at.to_rfc3339(),
                "sent": sent,
                "error": send_error.clone(),
            }),
            AuditSeverity::Info,
        ));

        let message = match send_error {
            None => format!("OTP sent successfully via {channel}"),
            Some(reason) => format!("OTP generated but failed to send: {reason}"),
        };
        Ok(SendOtpOutcome {
            otp_id,
            sent,
            expires_at,
            message,
        })
    }

    /// Verify a code for a recipient and route the verified identity.
    ///
    /// Never reveals whether the recipient or the code was wrong; every
    /// rejection reads the same to the caller, with the specific reason in
    /// the audit trail.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures error; a wrong, consumed, or expired code
    /// is a rejected outcome, not an error.
    pub async fn verify(&self, recipient: &str, code: &str) -> Result<VerifyOtpOutcome, CoreError> {
        if recipient.trim().is_empty() || code.trim().is_empty() {
            return Err(CoreError::InputInvalid(
                "recipient and code are required".to_string(),
            ));
        }

        let channel_hash = sha256_hex(recipient);
        let record =
            match OtpRepo::find_unconsumed(self.store.as_ref(), &channel_hash, &sha256_hex(code))
                .await?
            {
                Some(record) => record,
                None => {
                    self.reject(&channel_hash, "no matching unconsumed OTP");
                    return Ok(VerifyOtpOutcome::rejected(INVALID_OR_USED));
                }
            };

        let now = self.clock.now();
        if now >= record.expires_at {
            self.reject(&channel_hash, "OTP past expiry");
            return Ok(VerifyOtpOutcome::rejected(EXPIRED));
        }

        // First writer wins; a concurrent verifier of the same record sees
        // the consumed state and fails the filter above or this guard.
        if !OtpRepo::consume(self.store.as_ref(), &record.uid).await? {
            self.reject(&channel_hash, "OTP consumed concurrently");
            return Ok(VerifyOtpOutcome::rejected(INVALID_OR_USED));
        }

        let did = channel_did(record.channel_type, recipient);
        let route = self.router.route(&did, record.channel_type).await?;

        self.audit.emit(self.event(
            "otp.verified",
            schema::CHANNEL_OTP,
            &record.uid,
            &route.user_id,
            json!({
                "channel": record.channel_type.as_str(),
                "action": route.action.as_str(),
            }),
            AuditSeverity::Info,
        ));

        if route.action == RouteAction::Register {
            self.send_welcome(record.channel_type, recipient, &route.user_id)
                .await;
        }

        info!(user_id = %route.user_id, action = %route.action.as_str(), "OTP verified");
        Ok(VerifyOtpOutcome {
            verified: true,
            message: "OTP verified successfully".to_string(),
            user_id: Some(route.user_id),
            action: Some(route.action),
            channel_did: Some(did),
        })
    }

    async fn deliver_code(
        &self,
        channel: ChannelType,
        recipient: &str,
        code: &str,
    ) -> Option<String> {
        let request = DispatchRequest::new(channel, recipient, TEMPLATE_OTP_CODE)
            .with_variable("code", code);
        match tokio::time::timeout(self.dispatch_timeout, self.dispatcher.dispatch(request)).await {
            Ok(Ok(response)) if response.success => None,
            Ok(Ok(response)) => Some(
                response
                    .error
                    .unwrap_or_else(|| "provider rejected the message".to_string()),
            ),
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("provider deadline exceeded".to_string()),
        }
    }

    /// Courtesy greeting for a fresh registration; strictly fire-and-forget.
    async fn send_welcome(&self, channel: ChannelType, recipient: &str, user_id: &str) {
        let request = DispatchRequest::new(channel, recipient, TEMPLATE_WELCOME)
            .with_variable("user_id", user_id);
        match tokio::time::timeout(self.dispatch_timeout, self.dispatcher.dispatch(request)).await {
            Ok(Ok(response)) if response.success => {}
            Ok(Ok(response)) => {
                warn!(user_id = %user_id, "welcome message rejected: {:?}", response.error);
            }
            Ok(Err(err)) => warn!(user_id = %user_id, "welcome message failed: {err}"),
            Err(_) => warn!(user_id = %user_id, "welcome message timed out"),
        }
    }

    fn reject(&self, channel_hash: &str, reason: &str) {
        self.audit.emit(self.event(
            "otp.verify_failed",
            schema::CHANNEL_OTP,
            channel_hash,
            SOURCE,
            json!({"reason": reason}),
            AuditSeverity::Warn,
        ));
    }

    fn event(
        &self,
        action: &str,
        object_type: &str,
        object_id: &str,
        performed_by: &str,
        details: serde_json::Value,
        severity: AuditSeverity,
    ) -> AuditEvent {
        let mut event = AuditEvent::new(
            AuditCategory::Authentication,
            action,
            object_type,
            object_id,
            performed_by,
        )
        .with_details(details)
        .with_severity(severity);
        event.source = SOURCE.to_string();
        event
    }
}

/// Uniform decimal code of the configured width from the OS CSPRNG.
fn generate_code(digits: u8) -> String {
    let low = 10u32.pow(u32::from(digits) - 1);
    let high = 10u32.pow(u32::from(digits)) - 1;
    let code = OsRng.gen_range(low..=high);
    format!("{code:0width$}", width = digits as usize)
}

fn validate_recipient(channel: ChannelType, recipient: &str) -> Result<(), CoreError> {
    let trimmed = recipient.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InputInvalid("recipient is required".to_string()));
    }
    if channel == ChannelType::Email {
        let valid = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .is_ok_and(|regex| regex.is_match(trimmed));
        if !valid {
            return Err(CoreError::InputInvalid(
                "recipient is not a valid email address".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_decimal_digits() {
        for _ in 0..64 {
            let code = generate_code(6);
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().expect("numeric");
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[test]
    fn recipient_validation_checks_email_shape() {
        assert!(validate_recipient(ChannelType::Email, "a@b.test").is_ok());
        assert!(validate_recipient(ChannelType::Email, "not-an-email").is_err());
        assert!(validate_recipient(ChannelType::Sms, "+15551234").is_ok());
        assert!(validate_recipient(ChannelType::Sms, "  ").is_err());
    }
}
