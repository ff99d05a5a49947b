//! The single request boundary over the five engines.
//!
//! `CoreContext` bundles the store handle, dispatcher, configuration, and
//! clock, wires the engines together, and exposes one method per logical
//! front-door operation. Construction validates configuration and starts the
//! audit worker; everything else is per-request.

use crate::audit::AuditRecorder;
use crate::clock::Clock;
use crate::config::Config;
use crate::dispatch::{ChannelType, MessageDispatcher};
use crate::error::CoreError;
use crate::otp::models::{OtpPurpose, SendOtpOutcome, VerifyOtpOutcome};
use crate::otp::repo::OtpRepo;
use crate::otp::service::OtpService;
use crate::routing::models::{RouteAction, RouteOutcome};
use crate::routing::service::RouterService;
use crate::session::models::{
    IssuedSession, RevocationOutcome, SessionMetadata, SessionMethod, SessionValidation,
};
use crate::session::service::SessionService;
use crate::store::GraphStore;
use crate::store::deadline::DeadlineStore;
use crate::webauthn::models::{AuthenticationOutcome, RegistrationOutcome};
use crate::webauthn::service::WebAuthnService;
use crate::webauthn::{CreationChallengeResponse, RequestChallengeResponse};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Counts from an expired-record sweep.
#[derive(Clone, Copy, Debug, Default)]
pub struct PurgeReport {
    pub expired_otps: usize,
    pub expired_challenges: usize,
}

pub struct CoreContext {
    config: Config,
    otp: OtpService,
    router: Arc<RouterService>,
    webauthn: WebAuthnService,
    sessions: Arc<SessionService>,
    audit: AuditRecorder,
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    audit_worker: JoinHandle<()>,
}

impl CoreContext {
    /// Wire the engines over the given collaborators.
    ///
    /// Every store call the engines make runs under the configured operation
    /// deadline.
    ///
    /// # Errors
    ///
    /// `Fatal` when the configuration fails startup validation.
    pub fn new(
        store: Arc<dyn GraphStore>,
        dispatcher: Arc<dyn MessageDispatcher>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let store: Arc<dyn GraphStore> =
            Arc::new(DeadlineStore::new(store, config.op_timeout()));

        let (audit, audit_worker) = AuditRecorder::spawn(
            Arc::clone(&store),
            Arc::clone(&clock),
            *config.audit(),
        );

        let router = Arc::new(RouterService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            audit.clone(),
        ));
        let sessions = Arc::new(SessionService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.session().clone(),
            audit.clone(),
        ));
        let webauthn = WebAuthnService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.webauthn().clone(),
            Arc::clone(&router),
            Arc::clone(&sessions),
            audit.clone(),
        )?;
        let otp = OtpService::new(
            Arc::clone(&store),
            dispatcher,
            Arc::clone(&router),
            Arc::clone(&clock),
            *config.otp(),
            config.op_timeout(),
            audit.clone(),
        );

        Ok(Self {
            config,
            otp,
            router,
            webauthn,
            sessions,
            audit,
            store,
            clock,
            audit_worker,
        })
    }

    /// Generate and deliver an OTP over a channel.
    ///
    /// # Errors
    ///
    /// See [`OtpService::send`].
    pub async fn send_otp(
        &self,
        channel: ChannelType,
        recipient: &str,
        purpose: OtpPurpose,
        user_id: Option<&str>,
    ) -> Result<SendOtpOutcome, CoreError> {
        self.otp.send(channel, recipient, purpose, user_id).await
    }

    /// Verify an OTP and route the verified channel identity.
    ///
    /// # Errors
    ///
    /// See [`OtpService::verify`].
    pub async fn verify_otp(
        &self,
        recipient: &str,
        code: &str,
    ) -> Result<VerifyOtpOutcome, CoreError> {
        self.otp.verify(recipient, code).await
    }

    /// Signin-vs-register decision for an already verified channel identity.
    ///
    /// # Errors
    ///
    /// See [`RouterService::route`].
    pub async fn route(
        &self,
        channel_did: &str,
        channel_type: ChannelType,
    ) -> Result<RouteOutcome, CoreError> {
        self.router.route(channel_did, channel_type).await
    }

    /// # Errors
    ///
    /// See [`WebAuthnService::create_registration_challenge`].
    pub async fn create_webauthn_registration_challenge(
        &self,
        user_id: &str,
        username: &str,
        display_name: &str,
    ) -> Result<CreationChallengeResponse, CoreError> {
        self.webauthn
            .create_registration_challenge(user_id, username, display_name)
            .await
    }

    /// # Errors
    ///
    /// See [`WebAuthnService::verify_registration`].
    pub async fn verify_webauthn_registration(
        &self,
        user_id: &str,
        challenge: &str,
        client_data_json: &str,
        attestation_object: &str,
    ) -> Result<RegistrationOutcome, CoreError> {
        self.webauthn
            .verify_registration(user_id, challenge, client_data_json, attestation_object)
            .await
    }

    /// # Errors
    ///
    /// See [`WebAuthnService::create_authentication_challenge`].
    pub async fn create_webauthn_authentication_challenge(
        &self,
        user_id: &str,
    ) -> Result<RequestChallengeResponse, CoreError> {
        self.webauthn.create_authentication_challenge(user_id).await
    }

    /// # Errors
    ///
    /// See [`WebAuthnService::verify_authentication`].
    #[allow(clippy::too_many_arguments)]
    pub async fn verify_webauthn_authentication(
        &self,
        user_id: &str,
        challenge: &str,
        client_data_json: &str,
        authenticator_data: &str,
        signature: &str,
        user_handle: Option<&str>,
    ) -> Result<AuthenticationOutcome, CoreError> {
        self.webauthn
            .verify_authentication(
                user_id,
                challenge,
                client_data_json,
                authenticator_data,
                signature,
                user_handle,
            )
            .await
    }

    /// Mint a session for a user who just completed the pipeline. The channel
    /// identity and flow action ride along as claims.
    ///
    /// # Errors
    ///
    /// See [`SessionService::issue`].
    pub async fn create_session(
        &self,
        user_id: &str,
        channel_did: &str,
        action: RouteAction,
        method: SessionMethod,
        metadata: &SessionMetadata,
    ) -> Result<IssuedSession, CoreError> {
        let mut extra = BTreeMap::new();
        extra.insert("auth_type".to_string(), json!(method.as_str()));
        extra.insert("channel_did".to_string(), json!(channel_did));
        extra.insert("action".to_string(), json!(action.as_str()));
        self.sessions.issue(user_id, method, extra, metadata).await
    }

    /// # Errors
    ///
    /// See [`SessionService::validate`].
    pub async fn validate_session(&self, token: &str) -> Result<SessionValidation, CoreError> {
        self.sessions.validate(token).await
    }

    /// # Errors
    ///
    /// See [`SessionService::refresh`].
    pub async fn refresh_session(&self, token: &str) -> Result<IssuedSession, CoreError> {
        self.sessions.refresh(token).await
    }

    /// # Errors
    ///
    /// See [`SessionService::revoke`].
    pub async fn revoke_session(
        &self,
        token: &str,
        reason: &str,
    ) -> Result<RevocationOutcome, CoreError> {
        self.sessions.revoke(token, reason).await
    }

    /// Sweep unconsumed OTPs and challenges past expiry.
    ///
    /// # Errors
    ///
    /// Store failures propagate; a partial sweep reports what it removed.
    pub async fn purge_expired(&self) -> Result<PurgeReport, CoreError> {
        let expired_otps = OtpRepo::purge_expired(self.store.as_ref(), self.clock.now()).await?;
        let expired_challenges = self.webauthn.purge_expired_challenges().await?;
        Ok(PurgeReport {
            expired_otps,
            expired_challenges,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wait until queued audit entries have been attempted.
    pub async fn flush_audit(&self) {
        self.audit.flush().await;
    }

    /// Audit entries dropped since startup (full queue or exhausted retries).
    #[must_use]
    pub fn audit_dropped_entries(&self) -> u64 {
        self.audit.dropped_entries()
    }

    /// Drain the audit queue and stop the worker.
    pub async fn shutdown(self) {
        let Self {
            otp,
            router,
            webauthn,
            sessions,
            audit,
            audit_worker,
            ..
        } = self;
        drop(otp);
        drop(webauthn);
        drop(sessions);
        drop(router);
        drop(audit);
        let _ = audit_worker.await;
    }
}
