//! Error types for the floodgate engine.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration documents or applying diffs.
///
/// These are only ever produced by the load/diff paths; resolving a
/// descriptor against a loaded configuration cannot fail.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A document could not be parsed as rule YAML.
    #[error("failed to parse document '{0}': {1}")]
    Parse(String, String),

    /// A document declared an empty domain.
    #[error("document '{0}' has an empty domain")]
    EmptyDomain(String),

    /// A descriptor entry was declared without a key.
    #[error("document '{0}' has a descriptor with an empty key")]
    EmptyKey(String),

    /// Two documents declared the same domain.
    #[error("domain '{0}' is declared by both '{1}' and '{2}'")]
    DuplicateDomain(String, String, String),

    /// A rule must either be unlimited or carry a unit and a non-zero
    /// request count.
    #[error("rule at '{0}' must set a unit and requests_per_unit, or be unlimited")]
    InvalidLimit(String),

    /// The same descriptor path was configured twice with different limits.
    #[error("descriptor path '{0}' is defined with conflicting limits")]
    ConflictingRule(String),

    /// A rule's replaces list names a rule that does not exist.
    #[error("rule at '{0}' replaces unknown rule '{1}'")]
    UnknownReplacesTarget(String, String),

    /// A diff targeted a document that was never loaded.
    #[error("diff targets unknown document '{0}'")]
    UnknownDocument(String),

    /// An add diff targeted a document name that is already loaded.
    #[error("document '{0}' is already loaded")]
    DuplicateDocument(String),
}

/// Errors raised by the shared counter store.
///
/// Handled inside the limiter according to its failure policy; they are
/// reported to callers as a status alongside synthesized decisions and
/// never propagate past the decision call.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("counter store connection failed: {0}")]
    Connection(String),

    /// The store did not answer within the configured deadline.
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with something the client could not interpret.
    #[error("counter store protocol error: {0}")]
    Protocol(String),
}
