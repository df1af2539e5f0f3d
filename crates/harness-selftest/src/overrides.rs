//! Selftest step overrides (§4.7, §9 open question): a named override file
//! causes a step to SKIP, but the audit trail always records that the
//! override fired — the runner never suppresses a result silently.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use harness_error::{ErrorCode, HarnessError};

/// One recorded exception to a selftest step, approved out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelftestOverride {
    /// The step this override applies to.
    pub step_id: String,
    /// Why the override was granted.
    pub reason: String,
    /// Who approved it.
    pub approver: String,
    /// RFC 3339 expiry. Past this time the override is treated as absent
    /// and the step runs normally.
    pub expires_at: String,
}

impl SelftestOverride {
    /// Whether this override is still in force at `now`. An unparseable
    /// `expires_at` is treated as already expired (fail safe: the step
    /// runs rather than silently staying skipped forever).
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        DateTime::parse_from_rfc3339(&self.expires_at).map(|exp| exp.with_timezone(&Utc) > now).unwrap_or(false)
    }
}

/// Parse a JSON array of [`SelftestOverride`] records from file content.
///
/// # Errors
///
/// Returns [`HarnessError`] with [`ErrorCode::ConfigError`] if the content
/// is not a valid JSON array of override records.
pub fn parse_overrides(content: &str) -> Result<Vec<SelftestOverride>, HarnessError> {
    serde_json::from_str(content)
        .map_err(|e| HarnessError::new(ErrorCode::ConfigError, "failed to parse selftest override file").with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn active_override_has_future_expiry() {
        let now = Utc::now();
        let ov = SelftestOverride {
            step_id: "agents-governance".to_string(),
            reason: "known gap, fix scheduled".to_string(),
            approver: "release-manager".to_string(),
            expires_at: (now + Duration::days(1)).to_rfc3339(),
        };
        assert!(ov.is_active(now));
    }

    #[test]
    fn expired_override_is_treated_as_absent() {
        let now = Utc::now();
        let ov = SelftestOverride {
            step_id: "agents-governance".to_string(),
            reason: "known gap".to_string(),
            approver: "release-manager".to_string(),
            expires_at: (now - Duration::days(1)).to_rfc3339(),
        };
        assert!(!ov.is_active(now));
    }

    #[test]
    fn unparseable_expiry_is_treated_as_expired() {
        let ov = SelftestOverride {
            step_id: "x".to_string(),
            reason: "x".to_string(),
            approver: "x".to_string(),
            expires_at: "not-a-date".to_string(),
        };
        assert!(!ov.is_active(Utc::now()));
    }

    #[test]
    fn parses_array_of_overrides() {
        let content = r#"[{"step_id":"a","reason":"r","approver":"ap","expires_at":"2030-01-01T00:00:00Z"}]"#;
        let parsed = parse_overrides(content).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].step_id, "a");
    }

    #[test]
    fn rejects_malformed_content() {
        assert!(parse_overrides("not json").is_err());
    }
}
