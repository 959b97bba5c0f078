//! Rate limit rule configuration: documents, trie matcher, and live diffs.

mod diff;
mod matcher;
mod rules;

pub use diff::{ConfigDiff, DiffType, SharedConfig};
pub use matcher::{RateLimit, RateLimitConfig};
pub use rules::{ConfigSource, DescriptorConfig, DomainConfig, RateLimitRule, ReplacesRef, TimeUnit};
