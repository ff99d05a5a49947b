use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Retention category of an audit entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    Authentication,
    PiiAccess,
    General,
}

impl AuditCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "AUTHENTICATION",
            Self::PiiAccess => "PII_ACCESS",
            Self::General => "GENERAL",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Info,
    Warn,
    Error,
}

impl AuditSeverity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// An event to record, built by the emitting engine.
///
/// The recorder stamps the emission timestamp; the persistence worker derives
/// the entry id and retention date from it.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub category: AuditCategory,
    pub action: String,
    pub object_type: String,
    pub object_id: String,
    pub performed_by: String,
    pub details: Value,
    pub severity: AuditSeverity,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(
        category: AuditCategory,
        action: &str,
        object_type: &str,
        object_id: &str,
        performed_by: &str,
    ) -> Self {
        Self {
            category,
            action: action.to_string(),
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
            performed_by: performed_by.to_string(),
            details: Value::Null,
            severity: AuditSeverity::Info,
            source: String::new(),
            timestamp: DateTime::<Utc>::MIN_UTC,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Entry id: a nanosecond-timestamp token, lexicographic tiebreaker for
    /// same-instant entries across writers.
    #[must_use]
    pub fn entry_id(&self) -> String {
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_micros().saturating_mul(1_000));
        format!("audit_{nanos}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn category_and_severity_strings_are_screaming() {
        assert_eq!(AuditCategory::PiiAccess.as_str(), "PII_ACCESS");
        assert_eq!(AuditSeverity::Warn.as_str(), "WARN");
    }

    #[test]
    fn entry_id_is_nanosecond_token() {
        let mut event = AuditEvent::new(
            AuditCategory::Authentication,
            "otp.generated",
            "ChannelOTP",
            "0x1",
            "otp-engine",
        );
        event.timestamp = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(event.entry_id(), format!("audit_{}", 1_735_689_600i64 * 1_000_000_000));
    }
}
