//! Process-wide configuration.
//!
//! Read once at startup, validated, then never mutated (the engines hold it
//! behind the [`crate::context::CoreContext`]). Environment variables cover
//! every knob for deployments that configure through the process environment.

use crate::error::CoreError;
use std::env;
use std::time::Duration;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 86_400;
const DEFAULT_REFRESH_WINDOW_SECONDS: i64 = 3_600;
const DEFAULT_OTP_EXPIRY_MINUTES: i64 = 5;
const DEFAULT_OTP_DIGITS: u8 = 6;
const DEFAULT_CHALLENGE_EXPIRY_MINUTES: i64 = 5;
const DEFAULT_WEBAUTHN_TIMEOUT_MILLIS: u64 = 60_000;
const DEFAULT_AUTH_RETENTION_YEARS: u32 = 7;
const DEFAULT_PII_RETENTION_YEARS: u32 = 7;
const DEFAULT_GENERAL_RETENTION_YEARS: u32 = 2;
const DEFAULT_OP_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1_024;

const ENV_SESSION_SECRET: &str = "SENTRA_SESSION_SECRET";
const ENV_SESSION_TTL: &str = "SENTRA_SESSION_TTL_SECONDS";
const ENV_REFRESH_WINDOW: &str = "SENTRA_SESSION_REFRESH_WINDOW_SECONDS";
const ENV_RP_ID: &str = "SENTRA_WEBAUTHN_RP_ID";
const ENV_RP_NAME: &str = "SENTRA_WEBAUTHN_RP_NAME";
const ENV_RP_ORIGIN: &str = "SENTRA_WEBAUTHN_ORIGIN";

#[derive(Clone, Debug)]
pub struct SessionConfig {
    secret: Vec<u8>,
    ttl_seconds: i64,
    refresh_window_seconds: i64,
}

impl SessionConfig {
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            refresh_window_seconds: DEFAULT_REFRESH_WINDOW_SECONDS,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_window_seconds(mut self, seconds: i64) -> Self {
        self.refresh_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    #[must_use]
    pub fn refresh_window_seconds(&self) -> i64 {
        self.refresh_window_seconds
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OtpConfig {
    expiry_minutes: i64,
    digits: u8,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            expiry_minutes: DEFAULT_OTP_EXPIRY_MINUTES,
            digits: DEFAULT_OTP_DIGITS,
        }
    }
}

impl OtpConfig {
    #[must_use]
    pub fn with_expiry_minutes(mut self, minutes: i64) -> Self {
        self.expiry_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_digits(mut self, digits: u8) -> Self {
        self.digits = digits;
        self
    }

    #[must_use]
    pub fn expiry_minutes(&self) -> i64 {
        self.expiry_minutes
    }

    #[must_use]
    pub fn digits(&self) -> u8 {
        self.digits
    }
}

#[derive(Clone, Debug)]
pub struct WebAuthnConfig {
    rp_id: String,
    rp_name: String,
    origin: String,
    challenge_expiry_minutes: i64,
    timeout_millis: u64,
}

impl WebAuthnConfig {
    #[must_use]
    pub fn new(rp_id: String, rp_name: String, origin: String) -> Self {
        Self {
            rp_id,
            rp_name,
            origin,
            challenge_expiry_minutes: DEFAULT_CHALLENGE_EXPIRY_MINUTES,
            timeout_millis: DEFAULT_WEBAUTHN_TIMEOUT_MILLIS,
        }
    }

    #[must_use]
    pub fn with_challenge_expiry_minutes(mut self, minutes: i64) -> Self {
        self.challenge_expiry_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_timeout_millis(mut self, millis: u64) -> Self {
        self.timeout_millis = millis;
        self
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn rp_name(&self) -> &str {
        &self.rp_name
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn challenge_expiry_minutes(&self) -> i64 {
        self.challenge_expiry_minutes
    }

    #[must_use]
    pub fn timeout_millis(&self) -> u64 {
        self.timeout_millis
    }
}

/// Retention policy per audit category, in years.
#[derive(Clone, Copy, Debug)]
pub struct AuditConfig {
    authentication_retention_years: u32,
    pii_access_retention_years: u32,
    general_retention_years: u32,
    queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            authentication_retention_years: DEFAULT_AUTH_RETENTION_YEARS,
            pii_access_retention_years: DEFAULT_PII_RETENTION_YEARS,
            general_retention_years: DEFAULT_GENERAL_RETENTION_YEARS,
            queue_capacity: DEFAULT_AUDIT_QUEUE_CAPACITY,
        }
    }
}

impl AuditConfig {
    #[must_use]
    pub fn with_authentication_retention_years(mut self, years: u32) -> Self {
        self.authentication_retention_years = years;
        self
    }

    #[must_use]
    pub fn with_pii_access_retention_years(mut self, years: u32) -> Self {
        self.pii_access_retention_years = years;
        self
    }

    #[must_use]
    pub fn with_general_retention_years(mut self, years: u32) -> Self {
        self.general_retention_years = years;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn authentication_retention_years(&self) -> u32 {
        self.authentication_retention_years
    }

    #[must_use]
    pub fn pii_access_retention_years(&self) -> u32 {
        self.pii_access_retention_years
    }

    #[must_use]
    pub fn general_retention_years(&self) -> u32 {
        self.general_retention_years
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    session: SessionConfig,
    otp: OtpConfig,
    webauthn: WebAuthnConfig,
    audit: AuditConfig,
    op_timeout: Duration,
}

impl Config {
    #[must_use]
    pub fn new(session: SessionConfig, webauthn: WebAuthnConfig) -> Self {
        Self {
            session,
            otp: OtpConfig::default(),
            webauthn,
            audit: AuditConfig::default(),
            op_timeout: Duration::from_secs(DEFAULT_OP_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_otp(mut self, otp: OtpConfig) -> Self {
        self.otp = otp;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Fatal` when a required variable is missing or malformed.
    pub fn from_env() -> Result<Self, CoreError> {
        let secret = env::var(ENV_SESSION_SECRET)
            .map_err(|_| CoreError::Fatal(format!("{ENV_SESSION_SECRET} is not set")))?;
        let rp_id = env::var(ENV_RP_ID)
            .map_err(|_| CoreError::Fatal(format!("{ENV_RP_ID} is not set")))?;
        let rp_name = env::var(ENV_RP_NAME).unwrap_or_else(|_| rp_id.clone());
        let origin = env::var(ENV_RP_ORIGIN)
            .map_err(|_| CoreError::Fatal(format!("{ENV_RP_ORIGIN} is not set")))?;

        let mut session = SessionConfig::new(secret.into_bytes());
        if let Some(ttl) = read_env_i64(ENV_SESSION_TTL)? {
            session = session.with_ttl_seconds(ttl);
        }
        if let Some(window) = read_env_i64(ENV_REFRESH_WINDOW)? {
            session = session.with_refresh_window_seconds(window);
        }

        let config = Self::new(session, WebAuthnConfig::new(rp_id, rp_name, origin));
        config.validate()?;
        Ok(config)
    }

    /// Startup validation; run before any engine is constructed.
    ///
    /// # Errors
    ///
    /// Returns `Fatal` for an empty session secret, empty relying-party
    /// identity, or non-positive lifetimes.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.session.secret.is_empty() {
            return Err(CoreError::Fatal("session secret is empty".to_string()));
        }
        if self.session.ttl_seconds <= 0 {
            return Err(CoreError::Fatal("session TTL must be positive".to_string()));
        }
        if self.session.refresh_window_seconds <= 0
            || self.session.refresh_window_seconds >= self.session.ttl_seconds
        {
            return Err(CoreError::Fatal(
                "refresh window must be positive and shorter than the session TTL".to_string(),
            ));
        }
        if self.webauthn.rp_id.is_empty() || self.webauthn.origin.is_empty() {
            return Err(CoreError::Fatal(
                "webauthn relying party id and origin are required".to_string(),
            ));
        }
        if self.otp.expiry_minutes <= 0 {
            return Err(CoreError::Fatal("OTP expiry must be positive".to_string()));
        }
        if !(4..=9).contains(&self.otp.digits) {
            return Err(CoreError::Fatal(
                "OTP code width must be between 4 and 9 digits".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    #[must_use]
    pub fn otp(&self) -> &OtpConfig {
        &self.otp
    }

    #[must_use]
    pub fn webauthn(&self) -> &WebAuthnConfig {
        &self.webauthn
    }

    #[must_use]
    pub fn audit(&self) -> &AuditConfig {
        &self.audit
    }

    #[must_use]
    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }
}

fn read_env_i64(name: &str) -> Result<Option<i64>, CoreError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| CoreError::Fatal(format!("{name} is not a valid integer: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    fn base_config() -> Config {
        Config::new(
            SessionConfig::new(b"secret".to_vec()),
            WebAuthnConfig::new(
                "auth.example.test".to_string(),
                "Example".to_string(),
                "https://auth.example.test".to_string(),
            ),
        )
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = base_config();
        assert_eq!(config.session().ttl_seconds(), 86_400);
        assert_eq!(config.session().refresh_window_seconds(), 3_600);
        assert_eq!(config.otp().expiry_minutes(), 5);
        assert_eq!(config.otp().digits(), 6);
        assert_eq!(config.webauthn().challenge_expiry_minutes(), 5);
        assert_eq!(config.webauthn().timeout_millis(), 60_000);
        assert_eq!(config.audit().authentication_retention_years(), 7);
        assert_eq!(config.audit().general_retention_years(), 2);
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn empty_secret_is_fatal() {
        let config = Config::new(
            SessionConfig::new(Vec::new()),
            WebAuthnConfig::new(
                "auth.example.test".to_string(),
                "Example".to_string(),
                "https://auth.example.test".to_string(),
            ),
        );
        assert!(matches!(config.validate(), Err(CoreError::Fatal(_))));
    }

    #[test]
    fn refresh_window_must_fit_inside_ttl() {
        let config = Config::new(
            SessionConfig::new(b"secret".to_vec())
                .with_ttl_seconds(600)
                .with_refresh_window_seconds(600),
            WebAuthnConfig::new(
                "auth.example.test".to_string(),
                "Example".to_string(),
                "https://auth.example.test".to_string(),
            ),
        );
        assert!(matches!(config.validate(), Err(CoreError::Fatal(_))));
    }
}
