//! Live reconfiguration via document diffs.
//!
//! A diff targets one named document with an add, remove, or modify. Diff
//! application is build-then-publish: the mutated document set is compiled
//! and fully validated as a private value before the new snapshot is
//! swapped in, so a failed diff leaves the published configuration exactly
//! as it was and readers never observe a partially-mutated trie.

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::matcher::RateLimitConfig;
use super::rules::DomainConfig;
use crate::error::ConfigError;

/// What a diff does to its target document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Insert a new document. Fails if the name is already loaded.
    Add,
    /// Delete the named document's subtree. Fails if the name is unknown.
    Remove,
    /// Atomically replace the named document. Fails if the name is unknown.
    Modify,
}

/// One incremental change against a named configuration document.
#[derive(Debug, Clone)]
pub struct ConfigDiff {
    /// Target document name.
    pub name: String,
    /// New document contents. Ignored for removes.
    pub bytes: String,
    /// The kind of change.
    pub diff_type: DiffType,
}

impl ConfigDiff {
    /// An add diff carrying a new document.
    pub fn add(name: impl Into<String>, bytes: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            diff_type: DiffType::Add,
        }
    }

    /// A remove diff deleting the named document.
    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: String::new(),
            diff_type: DiffType::Remove,
        }
    }

    /// A modify diff replacing the named document's contents.
    pub fn modify(name: impl Into<String>, bytes: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            diff_type: DiffType::Modify,
        }
    }
}

impl RateLimitConfig {
    /// Build a configuration purely from a diff stream, starting empty.
    ///
    /// This models bootstrapping from a stream where the initial full load
    /// is expressed as a sequence of adds. Diffs apply in the given order;
    /// the first failing diff aborts the whole load.
    pub fn load_diff(diffs: &[ConfigDiff]) -> Result<Self, ConfigError> {
        let mut config = Self::empty();
        for diff in diffs {
            config = config.with_diff(diff)?;
        }
        Ok(config)
    }

    /// Apply one diff, producing a new configuration. `self` is never
    /// mutated; on error the previous configuration remains valid.
    pub fn with_diff(&self, diff: &ConfigDiff) -> Result<Self, ConfigError> {
        let mut documents = self.documents.clone();
        match diff.diff_type {
            DiffType::Add => {
                if documents.contains_key(&diff.name) {
                    return Err(ConfigError::DuplicateDocument(diff.name.clone()));
                }
                let doc = DomainConfig::from_yaml(&diff.name, &diff.bytes)?;
                documents.insert(diff.name.clone(), doc);
            }
            DiffType::Remove => {
                if documents.remove(&diff.name).is_none() {
                    return Err(ConfigError::UnknownDocument(diff.name.clone()));
                }
            }
            DiffType::Modify => {
                if !documents.contains_key(&diff.name) {
                    return Err(ConfigError::UnknownDocument(diff.name.clone()));
                }
                let doc = DomainConfig::from_yaml(&diff.name, &diff.bytes)?;
                documents.insert(diff.name.clone(), doc);
            }
        }
        Self::build(documents)
    }
}

/// The live configuration snapshot shared between the limiter and the
/// reconfiguration path.
///
/// Readers take a reference to one snapshot for the duration of their call
/// and never block; writers build the replacement privately and publish it
/// with a single atomic swap. Diff application is single-writer: callers
/// must not apply two diffs concurrently against the same handle.
#[derive(Debug)]
pub struct SharedConfig {
    inner: ArcSwap<RateLimitConfig>,
}

impl SharedConfig {
    /// Wrap an initial configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: ArcSwap::from_pointee(config),
        }
    }

    /// A handle holding an empty configuration.
    pub fn empty() -> Self {
        Self::new(RateLimitConfig::empty())
    }

    /// The current snapshot. Cheap; safe to hold across a decision call.
    pub fn current(&self) -> Arc<RateLimitConfig> {
        self.inner.load_full()
    }

    /// Replace the whole configuration, e.g. after a full reload.
    pub fn replace(&self, config: RateLimitConfig) {
        self.inner.store(Arc::new(config));
    }

    /// Apply one diff to the live configuration.
    ///
    /// In-flight readers keep the snapshot they started with; new readers
    /// see the published result only after the diff fully validated.
    pub fn apply_diff(&self, diff: &ConfigDiff) -> Result<(), ConfigError> {
        let next = self.current().with_diff(diff).map_err(|e| {
            warn!(document = %diff.name, error = %e, "rejected configuration diff");
            e
        })?;
        debug!(document = %diff.name, diff_type = ?diff.diff_type, "applied configuration diff");
        self.inner.store(Arc::new(next));
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::empty()
    }
}
