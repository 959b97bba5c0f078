//! Rule document model.
//!
//! Documents are ingested as named text blobs in Envoy's rate limit
//! configuration format: a domain plus a recursive tree of descriptors,
//! each optionally carrying a rate limit. Parsing is pure; file discovery
//! and watching belong to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// A named configuration document, as read by the caller.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Logical document name, used by diffs to target this document.
    pub name: String,
    /// Full document contents.
    pub bytes: String,
}

impl ConfigSource {
    /// Create a source from a name and document contents.
    pub fn new(name: impl Into<String>, bytes: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Time unit for rate limits (matches Envoy's configuration format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Number of seconds in one unit window.
    pub fn seconds(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3600,
            TimeUnit::Day => 86400,
        }
    }

    /// Get the duration of this unit window.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        };
        write!(f, "{}", name)
    }
}

/// A single document: a domain plus its descriptor tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// The domain namespace this document configures.
    pub domain: String,
    /// Top-level descriptors for this domain.
    #[serde(default)]
    pub descriptors: Vec<DescriptorConfig>,
}

impl DomainConfig {
    /// Parse a document from YAML, labeling parse errors with `name`.
    pub fn from_yaml(name: &str, yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(name.to_string(), e.to_string()))
    }
}

/// One node of a document's descriptor tree.
///
/// A node with no `value` matches any value for its key. A node may carry
/// a rate limit, children, or both; both the node's own limit and deeper
/// matches can apply independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// The key to match.
    pub key: String,
    /// Optional value to match (if not set, matches any value for this key).
    #[serde(default)]
    pub value: Option<String>,
    /// Rate limit to apply at this level.
    #[serde(default)]
    pub rate_limit: Option<RateLimitRule>,
    /// Count and report for this rule without ever denying.
    #[serde(default)]
    pub shadow_mode: bool,
    /// Child descriptors for more specific matching.
    #[serde(default)]
    pub descriptors: Vec<DescriptorConfig>,
}

/// A configured limit: so many requests per unit window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Number of requests allowed per unit of time. Ignored when
    /// `unlimited` is set.
    #[serde(default)]
    pub requests_per_unit: u32,
    /// The time unit. Required unless `unlimited` is set.
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    /// Bypass counting entirely; matching requests are always allowed.
    #[serde(default)]
    pub unlimited: bool,
    /// Logical rule name, used as a target for `replaces`.
    #[serde(default)]
    pub name: Option<String>,
    /// Rules this rule supersedes when both match.
    #[serde(default)]
    pub replaces: Vec<ReplacesRef>,
}

/// Reference to a named rule inside a `replaces` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacesRef {
    /// Name of the rule being superseded.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_document() {
        let yaml = r#"
domain: test_domain
descriptors:
  - key: source_cluster
    rate_limit:
      requests_per_unit: 100
      unit: second
"#;
        let doc = DomainConfig::from_yaml("simple", yaml).unwrap();
        assert_eq!(doc.domain, "test_domain");
        assert_eq!(doc.descriptors.len(), 1);
        let rule = doc.descriptors[0].rate_limit.as_ref().unwrap();
        assert_eq!(rule.requests_per_unit, 100);
        assert_eq!(rule.unit, Some(TimeUnit::Second));
        assert!(!rule.unlimited);
    }

    #[test]
    fn test_parse_hierarchical_document() {
        let yaml = r#"
domain: test_domain
descriptors:
  - key: source_cluster
    value: cluster_a
    rate_limit:
      requests_per_unit: 100
      unit: second
    descriptors:
      - key: destination_cluster
        value: cluster_b
        rate_limit:
          requests_per_unit: 50
          unit: second
"#;
        let doc = DomainConfig::from_yaml("nested", yaml).unwrap();
        assert_eq!(doc.descriptors.len(), 1);
        assert_eq!(doc.descriptors[0].descriptors.len(), 1);
        assert_eq!(doc.descriptors[0].value.as_deref(), Some("cluster_a"));
    }

    #[test]
    fn test_parse_unlimited_and_shadow() {
        let yaml = r#"
domain: test_domain
descriptors:
  - key: internal
    shadow_mode: true
    rate_limit:
      unlimited: true
"#;
        let doc = DomainConfig::from_yaml("overrides", yaml).unwrap();
        let descriptor = &doc.descriptors[0];
        assert!(descriptor.shadow_mode);
        assert!(descriptor.rate_limit.as_ref().unwrap().unlimited);
        assert_eq!(descriptor.rate_limit.as_ref().unwrap().unit, None);
    }

    #[test]
    fn test_parse_replaces() {
        let yaml = r#"
domain: test_domain
descriptors:
  - key: path
    value: /login
    rate_limit:
      requests_per_unit: 5
      unit: minute
      name: login_tight
      replaces:
        - name: login_loose
"#;
        let doc = DomainConfig::from_yaml("replaces", yaml).unwrap();
        let rule = doc.descriptors[0].rate_limit.as_ref().unwrap();
        assert_eq!(rule.name.as_deref(), Some("login_tight"));
        assert_eq!(rule.replaces, vec![ReplacesRef { name: "login_loose".to_string() }]);
    }

    #[test]
    fn test_parse_invalid_unit_rejected() {
        let yaml = r#"
domain: test_domain
descriptors:
  - key: k
    rate_limit:
      requests_per_unit: 5
      unit: fortnight
"#;
        let err = DomainConfig::from_yaml("bad_unit", yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(name, _) if name == "bad_unit"));
    }

    #[test]
    fn test_unit_seconds() {
        assert_eq!(TimeUnit::Second.seconds(), 1);
        assert_eq!(TimeUnit::Minute.seconds(), 60);
        assert_eq!(TimeUnit::Hour.seconds(), 3600);
        assert_eq!(TimeUnit::Day.seconds(), 86400);
        assert_eq!(TimeUnit::Minute.window(), Duration::from_secs(60));
    }
}
