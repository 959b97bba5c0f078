//! Trie-backed configuration matcher.
//!
//! Loaded rule documents are compiled into a per-domain trie keyed by
//! descriptor `(key, value)` pairs, with a wildcard slot per key for rules
//! that match any value. Resolution walks the trie in descriptor order and
//! returns the most specific limit whose path fully matched, after
//! suppressing rules superseded through `replaces`.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, trace};

use super::rules::{ConfigSource, DescriptorConfig, DomainConfig, TimeUnit};
use crate::error::ConfigError;
use crate::ratelimit::Descriptor;

/// A resolved rate limit rule.
///
/// Owned by the matcher behind an `Arc`; the limiter clones the `Arc`,
/// never the rule, for the duration of one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
    /// Canonical dotted path identifying this rule instance, e.g.
    /// `domain.key_value.key`. Used for stats and diagnostics.
    pub full_key: String,
    /// Requests allowed per unit window. Zero when `unlimited` is set.
    pub requests_per_unit: u32,
    /// The unit window for this limit.
    pub unit: TimeUnit,
    /// Bypass counting; matching requests are always allowed.
    pub unlimited: bool,
    /// Count and report without ever denying.
    pub shadow_mode: bool,
    /// Logical rule name used for `replaces` matching. Empty if unnamed.
    pub name: String,
    /// Names of rules this rule supersedes when both match.
    pub replaces: Vec<String>,
}

/// One trie node: an optional limit plus children keyed by descriptor key.
#[derive(Debug, Clone, Default)]
struct Node {
    limit: Option<Arc<RateLimit>>,
    children: BTreeMap<String, KeySlot>,
}

/// The children reachable under one descriptor key: exact-value branches
/// plus an optional wildcard branch matching any value.
#[derive(Debug, Clone, Default)]
struct KeySlot {
    wildcard: Option<Node>,
    values: BTreeMap<String, Node>,
}

/// A limit reachable during one resolution, with its specificity.
struct Candidate {
    depth: usize,
    exact: usize,
    limit: Arc<RateLimit>,
}

/// A compiled rate limit configuration.
///
/// Immutable once built; reconfiguration builds a new value and publishes
/// it wholesale (see [`super::SharedConfig`]). The parsed source documents
/// are retained so diffs can rebuild from them.
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    pub(crate) documents: BTreeMap<String, DomainConfig>,
    domains: BTreeMap<String, Node>,
}

impl RateLimitConfig {
    /// An empty configuration that matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a configuration from a full set of named documents.
    pub fn load(sources: &[ConfigSource]) -> Result<Self, ConfigError> {
        let mut documents = BTreeMap::new();
        for source in sources {
            if documents.contains_key(&source.name) {
                return Err(ConfigError::DuplicateDocument(source.name.clone()));
            }
            let doc = DomainConfig::from_yaml(&source.name, &source.bytes)?;
            documents.insert(source.name.clone(), doc);
        }
        let config = Self::build(documents)?;
        info!(
            documents = config.documents.len(),
            domains = config.domains.len(),
            "loaded rate limit configuration"
        );
        Ok(config)
    }

    /// Compile a document set into a validated trie.
    pub(crate) fn build(documents: BTreeMap<String, DomainConfig>) -> Result<Self, ConfigError> {
        let mut domains: BTreeMap<String, Node> = BTreeMap::new();
        let mut domain_owner: BTreeMap<String, String> = BTreeMap::new();
        let mut rule_names: HashSet<String> = HashSet::new();
        let mut replaces_refs: Vec<(String, String)> = Vec::new();

        for (name, doc) in &documents {
            if doc.domain.is_empty() {
                return Err(ConfigError::EmptyDomain(name.clone()));
            }
            if let Some(prev) = domain_owner.insert(doc.domain.clone(), name.clone()) {
                return Err(ConfigError::DuplicateDomain(doc.domain.clone(), prev, name.clone()));
            }
            let root = domains.entry(doc.domain.clone()).or_default();
            Self::descend(
                name,
                &doc.domain,
                &doc.descriptors,
                root,
                &mut rule_names,
                &mut replaces_refs,
            )?;
        }

        for (full_key, target) in replaces_refs {
            if !rule_names.contains(&target) {
                return Err(ConfigError::UnknownReplacesTarget(full_key, target));
            }
        }

        Ok(Self { documents, domains })
    }

    fn descend(
        doc_name: &str,
        prefix: &str,
        configs: &[DescriptorConfig],
        node: &mut Node,
        rule_names: &mut HashSet<String>,
        replaces_refs: &mut Vec<(String, String)>,
    ) -> Result<(), ConfigError> {
        for config in configs {
            if config.key.is_empty() {
                return Err(ConfigError::EmptyKey(doc_name.to_string()));
            }
            let full_key = match &config.value {
                Some(value) => format!("{}.{}_{}", prefix, config.key, value),
                None => format!("{}.{}", prefix, config.key),
            };

            let slot = node.children.entry(config.key.clone()).or_default();
            let child = match &config.value {
                Some(value) => slot.values.entry(value.clone()).or_default(),
                None => slot.wildcard.get_or_insert_with(Node::default),
            };

            if let Some(rule) = &config.rate_limit {
                if !rule.unlimited && (rule.unit.is_none() || rule.requests_per_unit == 0) {
                    return Err(ConfigError::InvalidLimit(full_key));
                }
                let limit = RateLimit {
                    full_key: full_key.clone(),
                    requests_per_unit: if rule.unlimited { 0 } else { rule.requests_per_unit },
                    unit: rule.unit.unwrap_or(TimeUnit::Second),
                    unlimited: rule.unlimited,
                    shadow_mode: config.shadow_mode,
                    name: rule.name.clone().unwrap_or_default(),
                    replaces: rule.replaces.iter().map(|r| r.name.clone()).collect(),
                };
                match &child.limit {
                    Some(existing) if **existing != limit => {
                        return Err(ConfigError::ConflictingRule(full_key));
                    }
                    Some(_) => {}
                    None => {
                        if !limit.name.is_empty() {
                            rule_names.insert(limit.name.clone());
                        }
                        for target in &limit.replaces {
                            replaces_refs.push((full_key.clone(), target.clone()));
                        }
                        child.limit = Some(Arc::new(limit));
                    }
                }
            }

            Self::descend(
                doc_name,
                &full_key,
                &config.descriptors,
                child,
                rule_names,
                replaces_refs,
            )?;
        }
        Ok(())
    }

    /// Get the configured limit for a descriptor, or `None` if no rule
    /// matches. Never fails; an unmatched descriptor is a normal outcome.
    pub fn get_limit(&self, domain: &str, descriptor: &Descriptor) -> Option<Arc<RateLimit>> {
        let root = self.domains.get(domain)?;

        let mut candidates = Vec::new();
        Self::collect(root, descriptor, 0, 0, 0, &mut candidates);
        if candidates.is_empty() {
            return None;
        }

        // A rule named in any matched rule's replaces set is never selected.
        let excluded: HashSet<String> = candidates
            .iter()
            .flat_map(|c| c.limit.replaces.iter().cloned())
            .collect();

        let limit = candidates
            .into_iter()
            .filter(|c| c.limit.name.is_empty() || !excluded.contains(c.limit.name.as_str()))
            .max_by_key(|c| (c.depth, c.exact))
            .map(|c| c.limit);

        trace!(
            domain = domain,
            limit = limit.as_ref().map(|l| l.full_key.as_str()),
            "resolved descriptor"
        );
        limit
    }

    /// Walk every branch the descriptor can fully match, recording each
    /// limit encountered along the way. Once a descriptor's own entries are
    /// exhausted, its nested descriptors continue from the reached node, so
    /// nested matches are strictly deeper than their parent's.
    fn collect(
        node: &Node,
        descriptor: &Descriptor,
        index: usize,
        depth: usize,
        exact: usize,
        out: &mut Vec<Candidate>,
    ) {
        if index == descriptor.entries.len() {
            for nested in &descriptor.descriptors {
                Self::collect(node, nested, 0, depth, exact, out);
            }
            return;
        }

        let entry = &descriptor.entries[index];
        let Some(slot) = node.children.get(entry.key.as_str()) else {
            return;
        };
        if let Some(child) = slot.values.get(entry.value.as_str()) {
            if let Some(limit) = &child.limit {
                out.push(Candidate {
                    depth: depth + 1,
                    exact: exact + 1,
                    limit: limit.clone(),
                });
            }
            Self::collect(child, descriptor, index + 1, depth + 1, exact + 1, out);
        }
        if let Some(child) = &slot.wildcard {
            if let Some(limit) = &child.limit {
                out.push(Candidate {
                    depth: depth + 1,
                    exact,
                    limit: limit.clone(),
                });
            }
            Self::collect(child, descriptor, index + 1, depth + 1, exact, out);
        }
    }

    /// Render the full trie as a stable, human-readable listing.
    ///
    /// Ordering is lexicographic by domain, then key, then value (the
    /// wildcard branch sorts before exact values), so two dumps of an
    /// identical logical configuration are textually equal.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for root in self.domains.values() {
            Self::dump_node(root, &mut out);
        }
        out
    }

    fn dump_node(node: &Node, out: &mut String) {
        if let Some(limit) = &node.limit {
            if limit.unlimited {
                let _ = writeln!(out, "{}: unlimited", limit.full_key);
            } else {
                let _ = write!(
                    out,
                    "{}: unit={} requests_per_unit={}",
                    limit.full_key, limit.unit, limit.requests_per_unit
                );
                if limit.shadow_mode {
                    let _ = write!(out, " shadow_mode=true");
                }
                let _ = writeln!(out);
            }
        }
        for slot in node.children.values() {
            if let Some(child) = &slot.wildcard {
                Self::dump_node(child, out);
            }
            for child in slot.values.values() {
                Self::dump_node(child, out);
            }
        }
    }
}
