use serde::{Deserialize, Serialize};
use thiserror::Error;
use threatgate_models::security::{Severity, SecurityEventType};

/// How a rule's event count is bucketed within its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Count events regardless of who produced them.
    None,
    /// Count per actor; the threshold must be crossed by a single actor.
    Actor,
    /// Count per source IP address.
    Ip,
}

/// One declarative threshold: "at least `threshold` events of `event_type`
/// within `window_minutes`" raises (or re-triggers) an alert of
/// `alert_type`. Rules are evaluated uniformly by the alert engine; adding
/// a rule never requires a new code path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub event_type: SecurityEventType,
    pub window_minutes: i64,
    pub threshold: i64,
    pub group_by: GroupBy,
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to read threshold rules from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed threshold rules in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid threshold rule '{alert_type}': {reason}")]
    Invalid { alert_type: String, reason: String },
}

/// Compiled-in rule set used when no rule file is configured.
pub fn default_rules() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule {
            event_type: SecurityEventType::AuthFailure,
            window_minutes: 15,
            threshold: 10,
            group_by: GroupBy::Actor,
            alert_type: "REPEATED_AUTH_FAILURES".to_string(),
            severity: Severity::High,
            title: "Repeated authentication failures".to_string(),
        },
        ThresholdRule {
            event_type: SecurityEventType::RateLimitExceeded,
            window_minutes: 60,
            threshold: 20,
            group_by: GroupBy::Ip,
            alert_type: "PERSISTENT_RATE_LIMITING".to_string(),
            severity: Severity::Medium,
            title: "Sustained rate limiting from one address".to_string(),
        },
        ThresholdRule {
            event_type: SecurityEventType::SqlInjectionAttempt,
            window_minutes: 10,
            threshold: 5,
            group_by: GroupBy::Ip,
            alert_type: "INJECTION_PROBING".to_string(),
            severity: Severity::Critical,
            title: "Injection probing detected".to_string(),
        },
        ThresholdRule {
            event_type: SecurityEventType::UnauthorizedAccess,
            window_minutes: 30,
            threshold: 10,
            group_by: GroupBy::Ip,
            alert_type: "CREDENTIAL_PROBING".to_string(),
            severity: Severity::High,
            title: "Repeated unauthorized access attempts".to_string(),
        },
        ThresholdRule {
            event_type: SecurityEventType::SuspiciousActivity,
            window_minutes: 30,
            threshold: 15,
            group_by: GroupBy::None,
            alert_type: "ELEVATED_SUSPICIOUS_TRAFFIC".to_string(),
            severity: Severity::Medium,
            title: "Elevated volume of suspicious requests".to_string(),
        },
    ]
}

/// Load rules from `THRESHOLD_RULES_PATH` (default `threshold-rules.json`).
/// A missing file means the compiled-in defaults; an unreadable or
/// malformed file is a fatal configuration error, surfaced at startup
/// rather than at request time.
pub fn load_rules(path: Option<String>) -> Result<Vec<ThresholdRule>, RuleError> {
    let default_path = std::env::var("THRESHOLD_RULES_PATH")
        .unwrap_or_else(|_| "threshold-rules.json".to_string());
    let path = path.unwrap_or(default_path);

    let rules = match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).map_err(|source| RuleError::Parse {
            path: path.clone(),
            source,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No threshold rule file at {}; using built-in rules", path);
            default_rules()
        }
        Err(source) => return Err(RuleError::Io { path, source }),
    };

    validate_rules(&rules)?;
    Ok(rules)
}

pub fn validate_rules(rules: &[ThresholdRule]) -> Result<(), RuleError> {
    for rule in rules {
        if rule.alert_type.trim().is_empty() {
            return Err(RuleError::Invalid {
                alert_type: "<unnamed>".to_string(),
                reason: "alert_type must not be empty".to_string(),
            });
        }
        if rule.threshold < 1 {
            return Err(RuleError::Invalid {
                alert_type: rule.alert_type.clone(),
                reason: "threshold must be at least 1".to_string(),
            });
        }
        if rule.window_minutes < 1 {
            return Err(RuleError::Invalid {
                alert_type: rule.alert_type.clone(),
                reason: "window_minutes must be at least 1".to_string(),
            });
        }
        if rule.title.trim().is_empty() {
            return Err(RuleError::Invalid {
                alert_type: rule.alert_type.clone(),
                reason: "title must not be empty".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_rules_validate() {
        let rules = default_rules();
        assert!(!rules.is_empty());
        validate_rules(&rules).unwrap();
    }

    #[test]
    fn rule_with_zero_threshold_is_rejected() {
        let mut rules = default_rules();
        rules[0].threshold = 0;
        assert!(validate_rules(&rules).is_err());
    }

    #[test]
    fn rule_with_empty_alert_type_is_rejected() {
        let mut rules = default_rules();
        rules[1].alert_type = "  ".to_string();
        assert!(validate_rules(&rules).is_err());
    }

    #[test]
    fn rules_parse_from_json() {
        let json = r#"[{
            "event_type": "AUTH_FAILURE",
            "window_minutes": 15,
            "threshold": 10,
            "group_by": "actor",
            "alert_type": "REPEATED_AUTH_FAILURES",
            "severity": "HIGH",
            "title": "Repeated authentication failures"
        }]"#;
        let rules: Vec<ThresholdRule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].group_by, GroupBy::Actor);
        assert_eq!(rules[0].severity, Severity::High);
        validate_rules(&rules).unwrap();
    }
}
