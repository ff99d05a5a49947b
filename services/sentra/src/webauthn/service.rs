//! WebAuthn engine: challenge issuance and ceremony verification.
//!
//! The protocol itself (challenge generation, attestation and assertion
//! verification, COSE parsing, sign-counter clone detection) is delegated to
//! `webauthn_rs`. This service persists the ceremony state and credentials in
//! the graph store, enforces single-use challenges under expiry, and wires
//! successful ceremonies into user activation and session issuance.

use super::models::{
    AuthenticationOutcome, ChallengeRecord, ChallengeType, CredentialRecord, RegistrationOutcome,
};
use super::repo::{ChallengeRepo, CredentialRepo};
use super::wire;
use crate::audit::{AuditCategory, AuditEvent, AuditRecorder, AuditSeverity};
use crate::clock::Clock;
use crate::config::WebAuthnConfig;
use crate::error::CoreError;
use crate::routing::service::RouterService;
use crate::session::models::{SessionMetadata, SessionMethod};
use crate::session::service::SessionService;
use crate::store::{GraphStore, is_unique_violation, schema};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use webauthn_rs::prelude::{
    AuthenticationResult, CreationChallengeResponse, CredentialID, RequestChallengeResponse,
    SecurityKey, SecurityKeyAuthentication, SecurityKeyRegistration, Url, Webauthn,
    WebauthnBuilder, WebauthnError,
};

const SOURCE: &str = "webauthn-engine";
/// Hinted to the browser when the authenticator did not declare transports.
const DEFAULT_TRANSPORTS: [&str; 4] = ["internal", "usb", "nfc", "ble"];

pub struct WebAuthnService {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    config: WebAuthnConfig,
    router: Arc<RouterService>,
    sessions: Arc<SessionService>,
    audit: AuditRecorder,
    webauthn: Webauthn,
}

impl WebAuthnService {
    /// # Errors
    ///
    /// `Fatal` when the relying-party identity cannot form a valid WebAuthn
    /// configuration.
    pub fn new(
        store: Arc<dyn GraphStore>,
        clock: Arc<dyn Clock>,
        config: WebAuthnConfig,
        router: Arc<RouterService>,
        sessions: Arc<SessionService>,
        audit: AuditRecorder,
    ) -> Result<Self, CoreError> {
        let origin = Url::parse(config.origin())
            .map_err(|err| CoreError::Fatal(format!("webauthn origin is not a URL: {err}")))?;
        let webauthn = WebauthnBuilder::new(config.rp_id(), &origin)
            .map_err(|err| CoreError::Fatal(format!("webauthn relying party invalid: {err}")))?
            .rp_name(config.rp_name())
            .build()
            .map_err(|err| CoreError::Fatal(format!("webauthn configuration invalid: {err}")))?;

        Ok(Self {
            store,
            clock,
            config,
            router,
            sessions,
            audit,
            webauthn,
        })
    }

    /// Issue a registration (attestation) challenge for a user.
    ///
    /// Existing credentials are excluded so an authenticator is not enrolled
    /// twice.
    ///
    /// # Errors
    ///
    /// `InputInvalid` for empty identifiers; store failures propagate.
    pub async fn create_registration_challenge(
        &self,
        user_id: &str,
        username: &str,
        display_name: &str,
    ) -> Result<CreationChallengeResponse, CoreError> {
        if user_id.trim().is_empty() || username.trim().is_empty() {
            return Err(CoreError::InputInvalid(
                "user id and username are required".to_string(),
            ));
        }

        let exclude_credentials = self.exclude_list(user_id).await;
        let (challenge_response, registration) = self
            .webauthn
            .start_securitykey_registration(
                user_handle(user_id),
                username,
                display_name,
                Some(exclude_credentials),
                None,
                None,
            )
            .map_err(|err| ceremony_setup_failed("registration", &err))?;

        self.persist_challenge(
            user_id,
            ChallengeType::Registration,
            &challenge_response.public_key.challenge,
            &registration,
        )
        .await?;
        Ok(challenge_response)
    }

    /// Verify an attestation response and enroll the credential.
    ///
    /// Protocol rejections return `success = false` with an opaque message;
    /// the audit entry carries the reason. The owning user transitions
    /// `PENDING -> ACTIVE` on first successful enrollment.
    ///
    /// # Errors
    ///
    /// `InputInvalid` for undecodable fields; store failures propagate.
    pub async fn verify_registration(
        &self,
        user_id: &str,
        challenge: &str,
        client_data_json: &str,
        attestation_object: &str,
    ) -> Result<RegistrationOutcome, CoreError> {
        wire::b64url_decode("clientDataJSON", client_data_json)?;
        let credential_id = wire::attested_credential_id(attestation_object)?;

        let Some(record) = self
            .load_live_challenge(user_id, challenge, ChallengeType::Registration)
            .await?
        else {
            return Ok(RegistrationOutcome::rejected());
        };
        let registration: SecurityKeyRegistration = deserialize_state(&record.state)?;

        let response = wire::register_response(&credential_id, client_data_json, attestation_object)?;
        let security_key = match self
            .webauthn
            .finish_securitykey_registration(&response, &registration)
        {
            Ok(security_key) => security_key,
            Err(err) => {
                self.reject(user_id, "registration", &err.to_string());
                return Ok(RegistrationOutcome::rejected());
            }
        };

        let credential_id = challenge_string(security_key.cred_id())?;
        let serialized = serde_json::to_string(&security_key)
            .map_err(|err| CoreError::Transient(format!("credential encoding failed: {err}")))?;
        let transports: Vec<String> = DEFAULT_TRANSPORTS.iter().map(ToString::to_string).collect();
        let credential_uid = match CredentialRepo::create(
            self.store.as_ref(),
            user_id,
            &credential_id,
            &serialized,
            0,
            &transports,
            self.clock.now(),
        )
        .await
        {
            Ok(uid) => uid,
            Err(err) if is_unique_violation(&err) => {
                self.reject(user_id, "registration", "credential already registered");
                return Ok(RegistrationOutcome::rejected());
            }
            Err(err) => return Err(err.into()),
        };

        if !ChallengeRepo::consume(self.store.as_ref(), &record.uid).await? {
            warn!(user_id = %user_id, "registration challenge already consumed");
        }
        self.router.activate_user(user_id).await?;

        self.audit.emit(self.event(
            "webauthn.credential_enrolled",
            schema::WEBAUTHN_CREDENTIAL,
            &credential_uid,
            user_id,
            json!({"credentialId": credential_id.clone()}),
            AuditSeverity::Info,
        ));
        info!(user_id = %user_id, "webauthn credential enrolled");

        Ok(RegistrationOutcome {
            success: true,
            credential_id: Some(credential_id),
            message: "WebAuthn registration successful".to_string(),
        })
    }

    /// Issue an authentication (assertion) challenge for a user.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the user has no enrolled credentials.
    pub async fn create_authentication_challenge(
        &self,
        user_id: &str,
    ) -> Result<RequestChallengeResponse, CoreError> {
        if user_id.trim().is_empty() {
            return Err(CoreError::InputInvalid("user id is required".to_string()));
        }
        let credentials = CredentialRepo::list_for_user(self.store.as_ref(), user_id).await?;
        if credentials.is_empty() {
            return Err(CoreError::unauthorized("no credentials enrolled for user"));
        }
        let security_keys = security_keys_of(&credentials);
        if security_keys.is_empty() {
            return Err(CoreError::Transient(
                "stored credentials could not be decoded".to_string(),
            ));
        }

        let (challenge_response, authentication) = self
            .webauthn
            .start_securitykey_authentication(&security_keys)
            .map_err(|err| ceremony_setup_failed("authentication", &err))?;

        self.persist_challenge(
            user_id,
            ChallengeType::Authentication,
            &challenge_response.public_key.challenge,
            &authentication,
        )
        .await?;
        Ok(challenge_response)
    }

    /// Verify an assertion response and mint a session for the user.
    ///
    /// Replay resistance: the challenge record is deleted on success, and a
    /// sign-counter regression is a hard [`CoreError::ChallengeReplay`]
    /// failure surfaced as a potentially cloned authenticator.
    ///
    /// # Errors
    ///
    /// `InputInvalid` for undecodable fields, `ChallengeReplay` for counter
    /// regression; store failures propagate.
    pub async fn verify_authentication(
        &self,
        user_id: &str,
        challenge: &str,
        client_data_json: &str,
        authenticator_data: &str,
        signature: &str,
        user_handle: Option<&str>,
    ) -> Result<AuthenticationOutcome, CoreError> {
        wire::b64url_decode("clientDataJSON", client_data_json)?;
        wire::b64url_decode("authenticatorData", authenticator_data)?;
        wire::b64url_decode("signature", signature)?;

        if let Some(handle) = user_handle
            && handle != user_id
        {
            self.reject(user_id, "authentication", "user handle mismatch");
            return Ok(AuthenticationOutcome::rejected());
        }

        let Some(record) = self
            .load_live_challenge(user_id, challenge, ChallengeType::Authentication)
            .await?
        else {
            return Ok(AuthenticationOutcome::rejected());
        };
        let authentication: SecurityKeyAuthentication = deserialize_state(&record.state)?;

        let credentials = CredentialRepo::list_for_user(self.store.as_ref(), user_id).await?;
        let Some((credential, result)) = self.locate_credential(
            user_id,
            &credentials,
            &authentication,
            client_data_json,
            authenticator_data,
            signature,
        )?
        else {
            self.reject(user_id, "authentication", "credential unknown or signature mismatch");
            return Ok(AuthenticationOutcome::rejected());
        };

        // The library already enforced the counter against the credential
        // state; re-check against the persisted value so a stale state blob
        // can never mask a regression.
        let asserted = result.counter();
        let stored = credential.sign_count;
        if (asserted != 0 || stored != 0) && asserted <= stored {
            self.audit_regression(user_id, &credential.uid, stored, Some(asserted));
            return Err(CoreError::ChallengeReplay {
                credential_id: credential.credential_id.clone(),
            });
        }

        // Single-use: losing the delete race means another verifier already
        // finished this ceremony.
        if !ChallengeRepo::consume(self.store.as_ref(), &record.uid).await? {
            self.reject(user_id, "authentication", "challenge consumed concurrently");
            return Ok(AuthenticationOutcome::rejected());
        }

        if result.needs_update() {
            let refreshed = serde_json::from_str::<SecurityKey>(&credential.public_key)
                .ok()
                .and_then(|mut key| key.update_credential(&result).map(|_| key))
                .and_then(|key| serde_json::to_string(&key).ok());
            CredentialRepo::update_after_authentication(
                self.store.as_ref(),
                &credential.uid,
                asserted,
                refreshed.as_deref(),
            )
            .await?;
        }

        let session = self
            .sessions
            .issue_for_authentication(
                user_id,
                SessionMethod::Webauthn,
                None,
                &SessionMetadata::default(),
            )
            .await?;

        self.audit.emit(self.event(
            "webauthn.authenticated",
            schema::WEBAUTHN_CREDENTIAL,
            &credential.uid,
            user_id,
            json!({"credentialId": credential.credential_id.clone(), "signCount": asserted}),
            AuditSeverity::Info,
        ));
        info!(user_id = %user_id, "webauthn authentication verified");

        Ok(AuthenticationOutcome {
            success: true,
            session_id: Some(session.session_id.clone()),
            session: Some(session),
            message: "WebAuthn authentication successful".to_string(),
        })
    }

    /// Garbage-collect expired challenge records.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn purge_expired_challenges(&self) -> Result<usize, CoreError> {
        Ok(ChallengeRepo::purge_expired(self.store.as_ref(), self.clock.now()).await?)
    }

    async fn persist_challenge(
        &self,
        user_id: &str,
        challenge_type: ChallengeType,
        challenge: &impl Serialize,
        state: &impl Serialize,
    ) -> Result<(), CoreError> {
        let challenge = challenge_string(challenge)?;
        let state = serde_json::to_string(state)
            .map_err(|err| CoreError::Transient(format!("ceremony state encoding: {err}")))?;

        let now = self.clock.now();
        let expires_at = now + chrono::Duration::minutes(self.config.challenge_expiry_minutes());
        let uid = ChallengeRepo::create(
            self.store.as_ref(),
            &challenge,
            user_id,
            challenge_type,
            &state,
            now,
            expires_at,
        )
        .await?;

        self.audit.emit(self.event(
            "webauthn.challenge_issued",
            schema::WEBAUTHN_CHALLENGE,
            &uid,
            user_id,
            json!({"type": challenge_type.as_str()}),
            AuditSeverity::Info,
        ));
        Ok(())
    }

    async fn load_live_challenge(
        &self,
        user_id: &str,
        challenge: &str,
        challenge_type: ChallengeType,
    ) -> Result<Option<ChallengeRecord>, CoreError> {
        let kind = challenge_type.as_str();
        let challenge = wire::normalize_challenge(challenge);
        let Some(record) =
            ChallengeRepo::find(self.store.as_ref(), challenge, user_id, challenge_type).await?
        else {
            self.reject(user_id, kind, "challenge not found");
            return Ok(None);
        };
        if self.clock.now() >= record.expires_at {
            // Left in place for the expiry sweep rather than deleted here.
            self.reject(user_id, kind, "challenge expired");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Resolve the asserting credential. The front door does not carry the
    /// credential id, so the user's enrolled credentials are tried as the
    /// response envelope's id until the library accepts one; the allow-list
    /// issued with the challenge keeps that set small. A counter regression
    /// reported by the library identifies the credential and is returned as
    /// a hard failure.
    #[allow(clippy::too_many_arguments)]
    fn locate_credential<'c>(
        &self,
        user_id: &str,
        credentials: &'c [CredentialRecord],
        authentication: &SecurityKeyAuthentication,
        client_data_json: &str,
        authenticator_data: &str,
        signature: &str,
    ) -> Result<Option<(&'c CredentialRecord, AuthenticationResult)>, CoreError> {
        for credential in credentials {
            let response = wire::assertion_response(
                &credential.credential_id,
                client_data_json,
                authenticator_data,
                signature,
            )?;
            match self
                .webauthn
                .finish_securitykey_authentication(&response, authentication)
            {
                Ok(result) => return Ok(Some((credential, result))),
                Err(WebauthnError::CredentialPossibleCompromise) => {
                    self.audit_regression(user_id, &credential.uid, credential.sign_count, None);
                    return Err(CoreError::ChallengeReplay {
                        credential_id: credential.credential_id.clone(),
                    });
                }
                Err(_) => {}
            }
        }
        Ok(None)
    }

    async fn exclude_list(&self, user_id: &str) -> Vec<CredentialID> {
        match CredentialRepo::list_for_user(self.store.as_ref(), user_id).await {
            Ok(credentials) => credentials
                .iter()
                .filter_map(|credential| {
                    wire::b64url_decode("credentialId", &credential.credential_id)
                        .ok()
                        .map(CredentialID::from)
                })
                .collect(),
            Err(err) => {
                warn!(user_id = %user_id, "could not list credentials for exclusion: {err}");
                Vec::new()
            }
        }
    }

    fn audit_regression(
        &self,
        user_id: &str,
        credential_uid: &str,
        stored: u32,
        asserted: Option<u32>,
    ) {
        self.audit.emit(self.event(
            "webauthn.counter_regression",
            schema::WEBAUTHN_CREDENTIAL,
            credential_uid,
            user_id,
            json!({"stored": stored, "asserted": asserted}),
            AuditSeverity::Warn,
        ));
    }

    fn reject(&self, user_id: &str, ceremony: &str, reason: &str) {
        self.audit.emit(self.event(
            "webauthn.verify_failed",
            schema::WEBAUTHN_CHALLENGE,
            user_id,
            user_id,
            json!({"ceremony": ceremony, "reason": reason}),
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

/// Stable library-side user handle for an application user id.
fn user_handle(user_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, user_id.as_bytes())
}

/// Render a library binary value (challenge, credential id) to its base64url
/// string form.
fn challenge_string(value: &impl Serialize) -> Result<String, CoreError> {
    match serde_json::to_value(value) {
        Ok(Value::String(value)) => Ok(value),
        Ok(_) | Err(_) => Err(CoreError::Transient(
            "challenge encoding failed".to_string(),
        )),
    }
}

fn deserialize_state<T: serde::de::DeserializeOwned>(state: &str) -> Result<T, CoreError> {
    serde_json::from_str(state)
        .map_err(|err| CoreError::Transient(format!("ceremony state corrupt: {err}")))
}

fn security_keys_of(credentials: &[CredentialRecord]) -> Vec<SecurityKey> {
    credentials
        .iter()
        .filter_map(|credential| serde_json::from_str(&credential.public_key).ok())
        .collect()
}

fn ceremony_setup_failed(ceremony: &str, err: &WebauthnError) -> CoreError {
    warn!("webauthn {ceremony} ceremony setup failed: {err}");
    CoreError::Transient("webauthn ceremony setup failed".to_string())
}
