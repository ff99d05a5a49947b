//! Session engine over the signed token envelope.

use super::models::{
    IssuedSession, RevocationOutcome, SessionMetadata, SessionMethod, SessionValidation,
};
use super::repo::SessionRepo;
use crate::audit::{AuditCategory, AuditEvent, AuditRecorder, AuditSeverity};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::hashing::sha256_hex;
use crate::store::{GraphStore, schema};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use session_token::{SessionClaims, sign_hs256, verify_hs256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

const SOURCE: &str = "session-engine";

pub struct SessionService {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    audit: AuditRecorder,
}

impl SessionService {
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            audit,
        }
    }

    /// Mint a signed token and persist its session record.
    ///
    /// # Errors
    ///
    /// Fails on signing or store failure; extra claims that shadow the
    /// standard set are silently dropped rather than rejected.
    pub async fn issue(
        &self,
        user_id: &str,
        method: SessionMethod,
        extra_claims: BTreeMap<String, Value>,
        metadata: &SessionMetadata,
    ) -> Result<IssuedSession, CoreError> {
        if user_id.trim().is_empty() {
            return Err(CoreError::InputInvalid("user id is required".to_string()));
        }

        let now = self.clock.now();
        let claims = SessionClaims::new(user_id, now.timestamp(), self.config.ttl_seconds())
            .with_extra(extra_claims);
        let expires_at = timestamp_to_datetime(claims.exp);
        let session_id = claims.jti.clone();

        let token = sign_hs256(self.config.secret(), &claims)
            .map_err(|err| CoreError::Fatal(format!("token signing failed: {err}")))?;

        let uid = SessionRepo::create(
            self.store.as_ref(),
            user_id,
            method,
            &sha256_hex(&token),
            now,
            expires_at,
            metadata,
        )
        .await?;

        self.audit.emit(self.event(
            "session.issued",
            &uid,
            user_id,
            json!({"method": method.as_str(), "expiresAt": expires_at.to_rfc3339()}),
            AuditSeverity::Info,
        ));

        Ok(IssuedSession {
            token,
            session_id,
            issued_at: now,
            expires_at,
        })
    }

    /// Convenience issuance after a completed authentication ceremony; the
    /// method and channel identity ride along as claims.
    pub async fn issue_for_authentication(
        &self,
        user_id: &str,
        method: SessionMethod,
        channel_did: Option<&str>,
        metadata: &SessionMetadata,
    ) -> Result<IssuedSession, CoreError> {
        let mut extra = BTreeMap::new();
        extra.insert("auth_type".to_string(), json!(method.as_str()));
        if let Some(did) = channel_did {
            extra.insert("channel_did".to_string(), json!(did));
        }
        self.issue(user_id, method, extra, metadata).await
    }

    /// Validate a token against both its signature and the stored record.
    ///
    /// Never distinguishes "never existed", "revoked", and "expired" to the
    /// caller; the audit entry records which it was.
    ///
    /// # Errors
    ///
    /// Only store failures error; a bad token is an invalid outcome.
    pub async fn validate(&self, token: &str) -> Result<SessionValidation, CoreError> {
        let now = self.clock.now();
        let claims = match verify_hs256(token, self.config.secret(), now.timestamp()) {
            Ok(claims) => claims,
            Err(err) => {
                self.reject("unknown", &format!("token rejected by envelope: {err}"));
                return Ok(SessionValidation::invalid());
            }
        };

        let record =
            match SessionRepo::find_by_token_hash(self.store.as_ref(), &sha256_hex(token)).await? {
                Some(record) => record,
                None => {
                    self.reject(&claims.sub, "no session record for token");
                    return Ok(SessionValidation::invalid());
                }
            };
        if !record.valid {
            self.reject(&claims.sub, "session revoked");
            return Ok(SessionValidation::invalid());
        }
        if now >= record.expires_at {
            self.reject(&claims.sub, "session expired");
            return Ok(SessionValidation::invalid());
        }

        // Sliding usage marker; a failed touch must not block validation.
        if let Err(err) = SessionRepo::touch_last_used(self.store.as_ref(), &record.uid, now).await
        {
            warn!(user_id = %record.user_id, "failed to update session lastUsed: {err}");
        }

        Ok(SessionValidation {
            valid: true,
            user_id: Some(record.user_id),
            expires_at: Some(record.expires_at),
            message: "token is valid".to_string(),
        })
    }

    /// Exchange a token nearing expiry for a fresh one.
    ///
    /// Permitted only inside the refresh window (`remaining <= window`); this
    /// bounds how far a stolen token can extend its own lifetime. The old
    /// token is revoked with reason `refreshed`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for an invalid token or a refresh outside the window.
    pub async fn refresh(&self, token: &str) -> Result<IssuedSession, CoreError> {
        let validation = self.validate(token).await?;
        if !validation.valid {
            return Err(CoreError::unauthorized("refresh of an invalid session"));
        }
        let user_id = validation
            .user_id
            .ok_or_else(|| CoreError::unauthorized("refresh of an invalid session"))?;
        let expires_at = validation
            .expires_at
            .ok_or_else(|| CoreError::unauthorized("refresh of an invalid session"))?;

        let now = self.clock.now();
        let remaining = expires_at - now;
        if remaining > Duration::seconds(self.config.refresh_window_seconds()) {
            self.reject(&user_id, "refresh outside window");
            return Err(CoreError::unauthorized("refresh outside the window"));
        }

        // Claims survive the rotation; the record metadata does too.
        let claims = verify_hs256(token, self.config.secret(), now.timestamp())
            .map_err(|err| CoreError::unauthorized(format!("refresh of bad token: {err}")))?;
        let record = SessionRepo::find_by_token_hash(self.store.as_ref(), &sha256_hex(token))
            .await?
            .ok_or_else(|| CoreError::unauthorized("refresh of unknown token"))?;
        let metadata = SessionMetadata {
            ip_address: record.ip_address.clone(),
            user_agent: record.user_agent.clone(),
            device_id: record.device_id.clone(),
        };

        let refreshed = self
            .issue(&user_id, record.method, claims.extra, &metadata)
            .await?;
        self.revoke(token, "refreshed").await?;

        self.audit.emit(self.event(
            "session.refreshed",
            &refreshed.session_id,
            &user_id,
            json!({"expiresAt": refreshed.expires_at.to_rfc3339()}),
            AuditSeverity::Info,
        ));
        Ok(refreshed)
    }

    /// Clear the session's valid flag. Idempotent; revoking an unknown token
    /// reports `revoked: false`.
    ///
    /// # Errors
    ///
    /// Only store failures error.
    pub async fn revoke(&self, token: &str, reason: &str) -> Result<RevocationOutcome, CoreError> {
        let now = self.clock.now();
        let Some(record) =
            SessionRepo::find_by_token_hash(self.store.as_ref(), &sha256_hex(token)).await?
        else {
            return Ok(RevocationOutcome {
                revoked: false,
                timestamp: now,
            });
        };

        SessionRepo::invalidate(self.store.as_ref(), &record.uid).await?;
        self.audit.emit(self.event(
            "session.revoked",
            &record.uid,
            &record.user_id,
            json!({"reason": reason}),
            AuditSeverity::Info,
        ));
        Ok(RevocationOutcome {
            revoked: true,
            timestamp: now,
        })
    }

    fn reject(&self, subject: &str, reason: &str) {
        self.audit.emit(self.event(
            "session.rejected",
            subject,
            SOURCE,
            json!({"reason": reason}),
            AuditSeverity::Warn,
        ));
    }

    fn event(
        &self,
        action: &str,
        object_id: &str,
        performed_by: &str,
        details: Value,
        severity: AuditSeverity,
    ) -> AuditEvent {
        let mut event = AuditEvent::new(
            AuditCategory::Authentication,
            action,
            schema::AUTH_SESSION,
            object_id,
            performed_by,
        )
        .with_details(details)
        .with_severity(severity);
        event.source = SOURCE.to_string();
        event
    }
}

fn timestamp_to_datetime(unix_seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(unix_seconds, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
