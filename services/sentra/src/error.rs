//! Error classes shared by every engine.
//!
//! The split mirrors what the caller is allowed to learn: `Unauthorized`
//! collapses every security-relevant rejection into one opaque message, and
//! the internal reason travels only to the audit log. Store-side error text
//! never reaches the external caller.

use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input (missing channel, bad base64). Not a security event.
    #[error("{0}")]
    InputInvalid(String),

    /// Signature invalid, challenge mismatch, credential unknown, OTP wrong
    /// or consumed, session revoked/expired. One opaque message for all of
    /// them; `reason` is audited, never displayed.
    #[error("authentication failed")]
    Unauthorized { reason: String },

    /// WebAuthn sign-counter regression: the authenticator may be cloned.
    #[error("authentication failed")]
    ChallengeReplay { credential_id: String },

    /// Store or dispatcher unavailable. Safe to retry.
    #[error("service temporarily unavailable")]
    Transient(String),

    /// A write may or may not have persisted. Callers must not blindly retry
    /// state-changing operations.
    #[error("operation outcome unknown")]
    Indeterminate(String),

    /// Configuration missing or invalid. Abort at startup.
    #[error("fatal configuration error: {0}")]
    Fatal(String),
}

impl CoreError {
    pub(crate) fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Internal reason for audit records; falls back to the public text.
    #[must_use]
    pub fn audit_reason(&self) -> String {
        match self {
            Self::Unauthorized { reason } => reason.clone(),
            Self::ChallengeReplay { credential_id } => {
                format!("sign counter regression for credential {credential_id}")
            }
            other => other.to_string(),
        }
    }

    /// Whether a retry of the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => Self::Transient("store deadline exceeded".to_string()),
            StoreError::Indeterminate(detail) => Self::Indeterminate(detail),
            StoreError::Unavailable(_) | StoreError::Malformed(_) => {
                // Store-side text stays internal; the caller sees a class.
                Self::Transient("store unavailable".to_string())
            }
            StoreError::UniqueViolation { .. } | StoreError::NotFound => {
                Self::Transient("store contract violation".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_message_is_opaque() {
        let err = CoreError::unauthorized("otp hash mismatch for recipient a@b.test");
        assert_eq!(err.to_string(), "authentication failed");
        assert_eq!(err.audit_reason(), "otp hash mismatch for recipient a@b.test");
    }

    #[test]
    fn store_errors_translate_without_leaking_text() {
        let err: CoreError =
            StoreError::Unavailable("connection refused 10.0.0.1:9080".to_string()).into();
        assert!(!err.to_string().contains("10.0.0.1"));
        assert!(err.is_retryable());
    }

    #[test]
    fn indeterminate_is_not_retryable() {
        let err: CoreError = StoreError::Indeterminate("write timeout".to_string()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "operation outcome unknown");
    }
}
