//! Finding model and canonical-key normalization

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;

/// Severity level for vulnerabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Higher is worse
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
            Severity::Info => 0,
        }
    }

    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" | "moderate" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" | "informational" => Ok(Severity::Info),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Normalized (vulnerability class, asset) pair findings are deduplicated on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalKey {
    pub class: String,
    pub asset: String,
}

impl CanonicalKey {
    pub fn new(class: &str, asset: &str) -> Self {
        Self {
            class: normalize_class(class),
            asset: normalize_asset(asset),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.class.is_empty() && !self.asset.is_empty()
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class, self.asset)
    }
}

/// Common spellings of the same vulnerability class
const CLASS_ALIASES: &[(&str, &[&str])] = &[
    ("sqli", &["sql_injection", "sql_inject", "sqlinjection", "blind_sqli", "blind_sql_injection"]),
    ("xss", &["cross_site_scripting", "reflected_xss", "stored_xss", "dom_xss"]),
    ("ssrf", &["server_side_request_forgery"]),
    ("csrf", &["cross_site_request_forgery", "xsrf"]),
    ("idor", &["insecure_direct_object_reference", "broken_object_level_authorization", "bola"]),
    ("rce", &["remote_code_execution", "command_injection", "os_command_injection"]),
    ("lfi", &["local_file_inclusion", "path_traversal", "directory_traversal"]),
    ("xxe", &["xml_external_entity", "xml_external_entities"]),
    ("open_redirect", &["unvalidated_redirect", "url_redirect"]),
    ("ssti", &["server_side_template_injection", "template_injection"]),
];

/// Lowercase, collapse punctuation to `_`, and fold known aliases
pub fn normalize_class(class: &str) -> String {
    let mut out = String::with_capacity(class.len());
    let mut pending_sep = false;
    for c in class.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    for (canonical, aliases) in CLASS_ALIASES {
        if out == *canonical || aliases.contains(&out.as_str()) {
            return (*canonical).to_string();
        }
    }
    out
}

/// Extensions that mark a leading `name.ext` segment as a file, not a host
const FILE_EXTENSIONS: &[&str] = &[
    "php", "html", "htm", "asp", "aspx", "jsp", "js", "json", "xml", "txt", "cgi", "py", "rb", "pl",
];

/// Whether the first segment of a scheme-less asset names a host
fn looks_like_host(segment: &str) -> bool {
    if let Some((host, port)) = segment.rsplit_once(':') {
        return !host.is_empty() && port.parse::<u16>().is_ok();
    }
    if segment.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match segment.rsplit_once('.') {
        Some((name, ext)) => {
            !name.is_empty()
                && !ext.is_empty()
                && !FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        None => false,
    }
}

/// Reduce an asset to host + path: lowercased scheme/host, default ports,
/// query, fragment and trailing slash dropped. Bare paths keep their path only.
/// `shop.test/login` and `localhost:8080/login` are read as http URLs.
pub fn normalize_asset(asset: &str) -> String {
    let trimmed = asset.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let first_segment = trimmed.split(['/', '?', '#']).next().unwrap_or_default();
    let url = if trimmed.contains("://") {
        url::Url::parse(trimmed).ok()
    } else if looks_like_host(first_segment) {
        url::Url::parse(&format!("http://{trimmed}")).ok()
    } else {
        None
    };

    if let Some(parsed) = url {
        if let Some(host) = parsed.host_str() {
            let mut out = host.to_lowercase();
            if let Some(port) = parsed.port() {
                out.push_str(&format!(":{port}"));
            }
            let path = parsed.path().trim_end_matches('/');
            out.push_str(path);
            return out;
        }
    }

    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let path = without_query.trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// One piece of proof attached to a finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub agent_id: AgentId,
    pub content: String,
    pub severity: Severity,
    pub submitted_at: DateTime<Utc>,
}

/// What an agent submits when it reports a finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingSubmission {
    pub class: String,
    pub asset: String,
    pub title: String,
    pub severity: Severity,
    pub evidence: String,
    pub agent_id: AgentId,
}

/// A deduplicated vulnerability record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub key: CanonicalKey,
    pub title: String,
    pub severity: Severity,
    /// Agent that first reported the key
    pub discovered_by: AgentId,
    pub discovered_at: DateTime<Utc>,
    pub evidence: Vec<Evidence>,
}

impl Finding {
    pub fn from_submission(submission: FindingSubmission, key: CanonicalKey) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            title: submission.title,
            severity: submission.severity,
            discovered_by: submission.agent_id.clone(),
            discovered_at: now,
            evidence: vec![Evidence {
                agent_id: submission.agent_id,
                content: submission.evidence,
                severity: submission.severity,
                submitted_at: now,
            }],
        }
    }

    /// Append the submission's evidence and keep the highest severity seen.
    /// Equal severities keep the existing title.
    pub fn merge(&mut self, submission: FindingSubmission) {
        if submission.severity > self.severity {
            self.severity = submission.severity;
            if !submission.title.is_empty() {
                self.title = submission.title;
            }
        }
        self.evidence.push(Evidence {
            agent_id: submission.agent_id,
            content: submission.evidence,
            severity: submission.severity,
            submitted_at: Utc::now(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn submission(severity: Severity, evidence: &str) -> FindingSubmission {
        FindingSubmission {
            class: "SQLi".into(),
            asset: "/login".into(),
            title: format!("SQL injection ({severity})"),
            severity,
            evidence: evidence.into(),
            agent_id: AgentId::from("agent_a"),
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Info);
        assert_eq!(
            [Severity::Low, Severity::Critical, Severity::Medium].iter().max(),
            Some(&Severity::Critical)
        );
        assert_eq!("Moderate".parse::<Severity>().unwrap(), Severity::Medium);
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn test_class_aliases_fold() {
        assert_eq!(normalize_class("SQLi"), "sqli");
        assert_eq!(normalize_class("SQL Injection"), "sqli");
        assert_eq!(normalize_class("  sql-injection "), "sqli");
        assert_eq!(normalize_class("Cross-Site Scripting"), "xss");
        assert_eq!(normalize_class("Weak TLS config"), "weak_tls_config");
    }

    #[test]
    fn test_asset_normalization() {
        assert_eq!(normalize_asset("/login"), "/login");
        assert_eq!(normalize_asset("login/"), "/login");
        assert_eq!(normalize_asset("/login?user=1#x"), "/login");
        assert_eq!(
            normalize_asset("HTTPS://Example.COM:443/login/?next=/"),
            "example.com/login"
        );
        assert_eq!(normalize_asset("http://example.com:8080/api"), "example.com:8080/api");
    }

    #[test]
    fn test_same_key_for_variants() {
        assert_eq!(
            CanonicalKey::new("SQL injection", "/login/"),
            CanonicalKey::new("sqli", "/login?x=1")
        );
        assert_ne!(
            CanonicalKey::new("sqli", "/login"),
            CanonicalKey::new("xss", "/login")
        );
        assert_eq!(
            CanonicalKey::new("sqli", "https://shop.test/login"),
            CanonicalKey::new("sqli", "shop.test/login")
        );
        assert_eq!(
            CanonicalKey::new("sqli", "http://localhost:8080/login"),
            CanonicalKey::new("sqli", "localhost:8080/login")
        );
        assert_eq!(
            CanonicalKey::new("sqli", "SHOP.test:443/login/?id=1"),
            CanonicalKey::new("sqli", "shop.test:443/login")
        );
    }

    #[test]
    fn test_scheme_less_assets() {
        assert_eq!(normalize_asset("shop.test/login"), "shop.test/login");
        assert_eq!(normalize_asset("localhost:8080/login"), "localhost:8080/login");
        assert_eq!(normalize_asset("10.0.0.5/admin"), "10.0.0.5/admin");
        // file names and plain paths stay paths
        assert_eq!(normalize_asset("login.php"), "/login.php");
        assert_eq!(normalize_asset("admin/users"), "/admin/users");
        assert_eq!(normalize_asset("/login?x=1"), "/login");
    }

    #[test]
    fn test_merge_keeps_max_severity_and_appends_evidence() {
        let key = CanonicalKey::new("sqli", "/login");
        let mut finding = Finding::from_submission(submission(Severity::Medium, "' OR 1=1"), key);

        finding.merge(submission(Severity::Critical, "UNION SELECT password"));
        finding.merge(submission(Severity::Low, "time-based"));

        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.evidence.len(), 3);
        assert_eq!(finding.title, "SQL injection (critical)");
    }
}
