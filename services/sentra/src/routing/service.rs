//! Routing decisions over verified channel identities.

use super::models::{RouteAction, RouteOutcome};
use super::repo::{UserChannelRepo, UserRepo};
use crate::audit::{AuditCategory, AuditEvent, AuditRecorder, AuditSeverity};
use crate::clock::Clock;
use crate::dispatch::ChannelType;
use crate::error::CoreError;
use crate::store::{GraphStore, is_unique_violation, schema};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const SOURCE: &str = "router";
const REGISTERED_ROLE: &str = "registered";
const SIGNIN_NEXT_STEP: &str =
    "Choose authentication method: WebAuthn (biometric/hardware) or passwordless";
const REGISTER_NEXT_STEP: &str =
    "Complete authentication setup: choose WebAuthn (biometric/hardware) or passwordless";

pub struct RouterService {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    audit: AuditRecorder,
}

impl RouterService {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>, audit: AuditRecorder) -> Self {
        Self {
            store,
            clock,
            audit,
        }
    }

    /// Decide signin vs. register for a verified channel identity, creating a
    /// pending user when no verified channel matches.
    ///
    /// # Errors
    ///
    /// Returns a store-derived error class; losing the duplicate-channel race
    /// is not an error and resolves to the signin path.
    pub async fn route(
        &self,
        channel_did: &str,
        channel_type: ChannelType,
    ) -> Result<RouteOutcome, CoreError> {
        if channel_did.is_empty() {
            return Err(CoreError::InputInvalid("missing channel DID".to_string()));
        }

        match UserChannelRepo::find(self.store.as_ref(), channel_did, channel_type).await? {
            Some(channel) if channel.verified => {
                // Sliding usage marker; a failed touch must not block signin.
                let now = self.clock.now();
                if let Err(err) =
                    UserChannelRepo::touch_last_used(self.store.as_ref(), &channel.uid, now).await
                {
                    warn!(channel = %channel_did, "failed to update channel lastUsedAt: {err}");
                }
                self.audit.emit(self.audit_event(
                    "route.signin",
                    schema::USER_CHANNEL,
                    &channel.uid,
                    &channel.user_id,
                    json!({"channelType": channel_type.as_str()}),
                    AuditSeverity::Info,
                ));
                Ok(Self::signin_outcome(channel.user_id))
            }
            Some(_) => {
                // An unverified channel must not authenticate anyone.
                warn!(channel = %channel_did, "unverified channel treated as unknown");
                self.register(channel_did, channel_type).await
            }
            None => self.register(channel_did, channel_type).await,
        }
    }

    /// Promote a user on first credential enrollment. Idempotent.
    pub(crate) async fn activate_user(&self, user_id: &str) -> Result<(), CoreError> {
        let now = self.clock.now();
        if UserRepo::activate_if_pending(self.store.as_ref(), user_id, now).await? {
            info!(user_id = %user_id, "user activated on first credential");
            self.audit.emit(self.audit_event(
                "user.activated",
                schema::USER,
                user_id,
                user_id,
                json!({"from": "PENDING", "to": "ACTIVE"}),
                AuditSeverity::Info,
            ));
        }
        Ok(())
    }

    async fn register(
        &self,
        channel_did: &str,
        channel_type: ChannelType,
    ) -> Result<RouteOutcome, CoreError> {
        let now = self.clock.now();
        let user_id = Self::mint_user_id(channel_did, now.timestamp());

        // Role binding is best-effort: a missing catalog entry downgrades to
        // an unbound user rather than blocking registration.
        let role_uid = match UserRepo::find_role_uid(self.store.as_ref(), REGISTERED_ROLE).await {
            Ok(role_uid) => role_uid,
            Err(err) => {
                warn!("failed to resolve '{REGISTERED_ROLE}' role: {err}");
                None
            }
        };
        if role_uid.is_none() {
            warn!(user_id = %user_id, "creating user without the '{REGISTERED_ROLE}' role");
        }

        let user_uid =
            UserRepo::create_pending(self.store.as_ref(), &user_id, role_uid.as_deref(), now)
                .await?;

        match UserChannelRepo::create_verified_primary(
            self.store.as_ref(),
            &user_id,
            channel_did,
            channel_type,
            now,
        )
        .await
        {
            Ok(channel_uid) => {
                info!(user_id = %user_id, "created pending user for new channel");
                self.audit.emit(self.audit_event(
                    "user.created",
                    schema::USER,
                    &user_uid,
                    &user_id,
                    json!({"status": "PENDING", "role": role_uid.is_some()}),
                    AuditSeverity::Info,
                ));
                self.audit.emit(self.audit_event(
                    "channel.created",
                    schema::USER_CHANNEL,
                    &channel_uid,
                    &user_id,
                    json!({"channelType": channel_type.as_str(), "primary": true}),
                    AuditSeverity::Info,
                ));
                Ok(Self::register_outcome(user_id))
            }
            Err(err) if is_unique_violation(&err) => {
                // Lost the race: another request registered this channel
                // first. Clean up our orphaned user and follow signin.
                if let Err(cleanup) = self.store.delete(&user_uid).await {
                    warn!(user_id = %user_id, "failed to remove orphaned user: {cleanup}");
                }
                match UserChannelRepo::find(self.store.as_ref(), channel_did, channel_type).await? {
                    Some(channel) if channel.verified => Ok(Self::signin_outcome(channel.user_id)),
                    _ => Err(CoreError::Transient(
                        "channel registration race left no verified channel".to_string(),
                    )),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// `user_<unixSeconds>_<last 8 of the channel DID>`.
    fn mint_user_id(channel_did: &str, unix_seconds: i64) -> String {
        let tail_start = channel_did.len().saturating_sub(8);
        format!("user_{unix_seconds}_{}", &channel_did[tail_start..])
    }

    fn signin_outcome(user_id: String) -> RouteOutcome {
        RouteOutcome {
            user_exists: true,
            action: RouteAction::Signin,
            user_id,
            available_methods: Self::available_methods(),
            next_step: SIGNIN_NEXT_STEP.to_string(),
            message: "Welcome back! Please complete authentication.".to_string(),
        }
    }

    fn register_outcome(user_id: String) -> RouteOutcome {
        RouteOutcome {
            // The user exists now: the record was just created. The action
            // still distinguishes the downstream flow.
            user_exists: true,
            action: RouteAction::Register,
            user_id,
            available_methods: Self::available_methods(),
            next_step: REGISTER_NEXT_STEP.to_string(),
            message: "Welcome! Your account has been created. Please set up secure authentication."
                .to_string(),
        }
    }

    fn available_methods() -> Vec<String> {
        vec!["webauthn".to_string(), "passwordless".to_string()]
    }

    fn audit_event(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::AuditConfig;
    use crate::routing::models::UserStatus;
    use crate::store::NewNode;
    use crate::store::memory::MemoryGraphStore;
    use anyhow::Result;

    fn router(store: &Arc<MemoryGraphStore>) -> RouterService {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (audit, _handle) = AuditRecorder::spawn(
            Arc::clone(store) as Arc<dyn GraphStore>,
            Arc::clone(&clock),
            AuditConfig::default(),
        );
        RouterService::new(Arc::clone(store) as Arc<dyn GraphStore>, clock, audit)
    }

    #[tokio::test]
    async fn unknown_channel_creates_pending_user() -> Result<()> {
        let store = Arc::new(MemoryGraphStore::new());
        store
            .insert(NewNode::new(schema::ROLE).set("name", "registered"))
            .await?;
        let router = router(&store);

        let outcome = router.route("a".repeat(64).as_str(), ChannelType::Email).await?;
        assert!(outcome.user_exists);
        assert_eq!(outcome.action, RouteAction::Register);
        assert!(outcome.user_id.starts_with("user_"));
        assert!(outcome.user_id.ends_with(&"a".repeat(8)));

        let user = UserRepo::find_by_did(store.as_ref(), &outcome.user_id)
            .await?
            .expect("user persisted");
        assert_eq!(user.status, UserStatus::Pending);
        assert_eq!(store.count(schema::USER_CHANNEL).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn known_verified_channel_routes_to_signin() -> Result<()> {
        let store = Arc::new(MemoryGraphStore::new());
        let router = router(&store);
        let did = "b".repeat(64);

        let first = router.route(&did, ChannelType::Email).await?;
        let second = router.route(&did, ChannelType::Email).await?;

        assert_eq!(second.action, RouteAction::Signin);
        assert_eq!(second.user_id, first.user_id);
        assert_eq!(store.count(schema::USER).await, 1);
        assert_eq!(store.count(schema::USER_CHANNEL).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn same_recipient_on_two_channels_is_two_identities() -> Result<()> {
        let store = Arc::new(MemoryGraphStore::new());
        let router = router(&store);
        let email_did = crate::hashing::channel_did(ChannelType::Email, "+15551234");
        let sms_did = crate::hashing::channel_did(ChannelType::Sms, "+15551234");

        let email = router.route(&email_did, ChannelType::Email).await?;
        let sms = router.route(&sms_did, ChannelType::Sms).await?;

        assert_eq!(email.action, RouteAction::Register);
        assert_eq!(sms.action, RouteAction::Register);
        assert_ne!(email.user_id, sms.user_id);
        assert_eq!(store.count(schema::USER).await, 2);
        assert_eq!(store.count(schema::USER_CHANNEL).await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn unverified_channel_does_not_authenticate() -> Result<()> {
        let store = Arc::new(MemoryGraphStore::new());
        let did = "d".repeat(64);
        // Seed an unverified channel, as if verification was never completed.
        store
            .insert(
                NewNode::new(schema::USER_CHANNEL)
                    .set("userId", "user_stale")
                    .set("channelType", "email")
                    .set("channelHash", did.clone())
                    .set("verified", false)
                    .set("primary", false)
                    .set("createdAt", chrono::Utc::now().to_rfc3339()),
            )
            .await?;
        let router = router(&store);

        // The duplicate-channel constraint makes direct re-registration fail
        // and there is no verified channel to fall back to.
        let result = router.route(&did, ChannelType::Email).await;
        assert!(matches!(result, Err(CoreError::Transient(_))));
        Ok(())
    }

    #[tokio::test]
    async fn route_rejects_empty_did() -> Result<()> {
        let store = Arc::new(MemoryGraphStore::new());
        let router = router(&store);
        assert!(matches!(
            router.route("", ChannelType::Email).await,
            Err(CoreError::InputInvalid(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn activation_emits_once() -> Result<()> {
        let store = Arc::new(MemoryGraphStore::new());
        let router = router(&store);
        let outcome = router.route(&"e".repeat(64), ChannelType::Email).await?;

        router.activate_user(&outcome.user_id).await?;
        router.activate_user(&outcome.user_id).await?;

        let user = UserRepo::find_by_did(store.as_ref(), &outcome.user_id)
            .await?
            .expect("user exists");
        assert_eq!(user.status, UserStatus::Active);
        Ok(())
    }
}
