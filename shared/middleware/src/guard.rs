use once_cell::sync::Lazy;
use regex::Regex;
use threatgate_models::request::RequestSnapshot;
use threatgate_models::security::SecurityEventType;

/// Outcome of inspecting a request envelope.
///
/// `Suspicious` is advisory: the caller decides whether to log-and-continue
/// or log-and-reject. `Reject` is mandatory: content-type and origin
/// failures always deny the request.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardVerdict {
    Clean,
    Suspicious {
        event_type: SecurityEventType,
        detail: String,
    },
    Reject {
        event_type: SecurityEventType,
        code: &'static str,
        detail: String,
    },
}

struct InjectionSignature {
    pattern: &'static Lazy<Regex>,
    event_type: SecurityEventType,
    label: &'static str,
}

static UNION_SELECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"union\s+select").unwrap());
static DROP_TABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"drop\s+table").unwrap());
static INSERT_INTO: Lazy<Regex> = Lazy::new(|| Regex::new(r"insert\s+into").unwrap());
static SCRIPT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<script|javascript:").unwrap());
static EVAL_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\beval\s*\(").unwrap());
static TRAVERSAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\./|%2e%2e%2f").unwrap());
static SENSITIVE_TARGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"etc/passwd|cmd\.exe").unwrap());

static SIGNATURES: &[InjectionSignature] = &[
    InjectionSignature {
        pattern: &UNION_SELECT,
        event_type: SecurityEventType::SqlInjectionAttempt,
        label: "union select",
    },
    InjectionSignature {
        pattern: &DROP_TABLE,
        event_type: SecurityEventType::SqlInjectionAttempt,
        label: "drop table",
    },
    InjectionSignature {
        pattern: &INSERT_INTO,
        event_type: SecurityEventType::SqlInjectionAttempt,
        label: "insert into",
    },
    InjectionSignature {
        pattern: &SCRIPT_TAG,
        event_type: SecurityEventType::XssAttempt,
        label: "script injection",
    },
    InjectionSignature {
        pattern: &EVAL_CALL,
        event_type: SecurityEventType::XssAttempt,
        label: "eval call",
    },
    InjectionSignature {
        pattern: &TRAVERSAL,
        event_type: SecurityEventType::PathTraversalAttempt,
        label: "directory traversal",
    },
    InjectionSignature {
        pattern: &SENSITIVE_TARGET,
        event_type: SecurityEventType::PathTraversalAttempt,
        label: "sensitive file probe",
    },
];

/// User agents of well-known scanning tools.
const SCANNER_USER_AGENTS: &[&str] = &[
    "sqlmap",
    "nikto",
    "nessus",
    "masscan",
    "nmap",
    "dirbuster",
    "metasploit",
];

/// Stateless request heuristics. Pure; no I/O, no side effects. Checks are
/// independent and short-circuit on the first match.
pub struct PatternGuard;

impl PatternGuard {
    pub fn inspect(snapshot: &RequestSnapshot) -> GuardVerdict {
        let raw = format!("{}?{}", snapshot.path, snapshot.query).to_lowercase();
        // Match both the raw and the percent-decoded form so single-encoded
        // payloads cannot slip past literal signatures.
        let decoded = urlencoding::decode(&raw)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| raw.clone());

        for signature in SIGNATURES {
            if signature.pattern.is_match(&raw) || signature.pattern.is_match(&decoded) {
                return GuardVerdict::Suspicious {
                    event_type: signature.event_type,
                    detail: format!("{} signature in request target", signature.label),
                };
            }
        }

        if let Some(agent) = snapshot.user_agent.as_deref() {
            let agent = agent.to_lowercase();
            if let Some(tool) = SCANNER_USER_AGENTS.iter().find(|t| agent.contains(**t)) {
                return GuardVerdict::Suspicious {
                    event_type: SecurityEventType::SuspiciousActivity,
                    detail: format!("scanner user agent: {}", tool),
                };
            }
        }

        if snapshot.is_state_changing() {
            match snapshot.content_type.as_deref() {
                Some(ct) if ct.to_lowercase().starts_with("application/json") => {}
                _ => {
                    return GuardVerdict::Reject {
                        event_type: SecurityEventType::InvalidContentType,
                        code: "invalid_content_type",
                        detail: "state-changing request without JSON content type".to_string(),
                    };
                }
            }

            if let Some(verdict) = Self::check_origin(snapshot) {
                return verdict;
            }
        }

        GuardVerdict::Clean
    }

    /// The Origin (fallback Referer) host must match the Host header for
    /// state-changing requests; absence of both is itself a rejection.
    fn check_origin(snapshot: &RequestSnapshot) -> Option<GuardVerdict> {
        let declared = match snapshot.origin.as_deref().or(snapshot.referer.as_deref()) {
            Some(value) => value,
            None => {
                return Some(GuardVerdict::Reject {
                    event_type: SecurityEventType::CsrfRejected,
                    code: "missing_origin",
                    detail: "state-changing request without Origin or Referer".to_string(),
                })
            }
        };

        let declared_host = extract_host(declared);
        let expected_host = strip_port(&snapshot.host);

        if declared_host.as_deref() == Some(expected_host) {
            None
        } else {
            Some(GuardVerdict::Reject {
                event_type: SecurityEventType::CsrfRejected,
                code: "origin_mismatch",
                detail: format!(
                    "origin host {:?} does not match {}",
                    declared_host, expected_host
                ),
            })
        }
    }
}

fn extract_host(url_or_host: &str) -> Option<String> {
    let rest = url_or_host
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url_or_host);
    let host = rest.split('/').next()?;
    if host.is_empty() {
        None
    } else {
        Some(strip_port(host).to_string())
    }
}

fn strip_port(host: &str) -> &str {
    host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser_get(path: &str, query: &str) -> RequestSnapshot {
        RequestSnapshot {
            method: "GET".to_string(),
            path: path.to_string(),
            query: query.to_string(),
            host: "app.example".to_string(),
            origin: None,
            referer: None,
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0".to_string()),
            content_type: None,
            ip_address: Some("203.0.113.9".to_string()),
        }
    }

    fn json_post(path: &str) -> RequestSnapshot {
        RequestSnapshot {
            method: "POST".to_string(),
            path: path.to_string(),
            query: String::new(),
            host: "app.example".to_string(),
            origin: Some("https://app.example".to_string()),
            referer: None,
            user_agent: Some("Mozilla/5.0".to_string()),
            content_type: Some("application/json".to_string()),
            ip_address: Some("203.0.113.9".to_string()),
        }
    }

    #[test]
    fn normal_browser_request_is_clean() {
        assert_eq!(
            PatternGuard::inspect(&browser_get("/articles/42", "page=2")),
            GuardVerdict::Clean
        );
    }

    #[test]
    fn union_select_in_query_is_suspicious() {
        let verdict = PatternGuard::inspect(&browser_get("/search", "q=1 UNION SELECT password"));
        match verdict {
            GuardVerdict::Suspicious { event_type, .. } => {
                assert_eq!(event_type, SecurityEventType::SqlInjectionAttempt)
            }
            other => panic!("expected suspicious, got {:?}", other),
        }
    }

    #[test]
    fn encoded_traversal_is_suspicious() {
        let verdict = PatternGuard::inspect(&browser_get("/files/%2e%2e%2f%2e%2e%2fetc", ""));
        assert!(matches!(verdict, GuardVerdict::Suspicious {
            event_type: SecurityEventType::PathTraversalAttempt,
            ..
        }));
    }

    #[test]
    fn etc_passwd_probe_is_suspicious() {
        let verdict = PatternGuard::inspect(&browser_get("/download", "file=../../etc/passwd"));
        assert!(matches!(verdict, GuardVerdict::Suspicious {
            event_type: SecurityEventType::PathTraversalAttempt,
            ..
        }));
    }

    #[test]
    fn scanner_user_agent_is_suspicious() {
        let mut snapshot = browser_get("/", "");
        snapshot.user_agent = Some("sqlmap/1.7".to_string());
        assert!(matches!(
            PatternGuard::inspect(&snapshot),
            GuardVerdict::Suspicious {
                event_type: SecurityEventType::SuspiciousActivity,
                ..
            }
        ));
    }

    #[test]
    fn json_post_with_matching_origin_is_clean() {
        assert_eq!(PatternGuard::inspect(&json_post("/contact")), GuardVerdict::Clean);
    }

    #[test]
    fn post_without_json_content_type_is_rejected() {
        let mut snapshot = json_post("/contact");
        snapshot.content_type = Some("text/plain".to_string());
        assert!(matches!(PatternGuard::inspect(&snapshot), GuardVerdict::Reject {
            event_type: SecurityEventType::InvalidContentType,
            ..
        }));

        snapshot.content_type = None;
        assert!(matches!(PatternGuard::inspect(&snapshot), GuardVerdict::Reject {
            event_type: SecurityEventType::InvalidContentType,
            ..
        }));
    }

    #[test]
    fn cross_origin_post_is_rejected_regardless_of_payload() {
        let mut snapshot = json_post("/contact");
        snapshot.origin = Some("https://evil.example".to_string());
        assert!(matches!(PatternGuard::inspect(&snapshot), GuardVerdict::Reject {
            event_type: SecurityEventType::CsrfRejected,
            code: "origin_mismatch",
            ..
        }));
    }

    #[test]
    fn referer_is_accepted_as_origin_fallback() {
        let mut snapshot = json_post("/contact");
        snapshot.origin = None;
        snapshot.referer = Some("https://app.example/form".to_string());
        assert_eq!(PatternGuard::inspect(&snapshot), GuardVerdict::Clean);
    }

    #[test]
    fn post_without_origin_or_referer_is_rejected() {
        let mut snapshot = json_post("/contact");
        snapshot.origin = None;
        snapshot.referer = None;
        assert!(matches!(
            PatternGuard::inspect(&snapshot),
            GuardVerdict::Reject { code: "missing_origin", .. }
        ));
    }

    #[test]
    fn host_port_is_ignored_in_origin_comparison() {
        let mut snapshot = json_post("/contact");
        snapshot.host = "app.example:8443".to_string();
        snapshot.origin = Some("https://app.example:8443".to_string());
        assert_eq!(PatternGuard::inspect(&snapshot), GuardVerdict::Clean);
    }
}
