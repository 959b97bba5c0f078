//! Cache key derivation.
//!
//! A cache key names one counter in the shared store: a configured prefix,
//! the domain, the descriptor's entries, and a time bucket floored to the
//! limit's unit window, so all requests inside one window share a counter
//! and a new window starts a fresh one. Keys are either the literal
//! concatenation (human-readable) or a fixed-width digest of it (hashed);
//! the digest function is an injected capability.

use parking_lot::Mutex;
use std::fmt::Write;

use crate::config::{RateLimit, TimeUnit};
use crate::ratelimit::Descriptor;

/// A derived counter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    /// The counter key, empty if no counting is needed.
    pub key: String,
    /// True if the key corresponds to a limit with a second unit.
    pub per_second: bool,
}

impl CacheKey {
    fn none() -> Self {
        Self {
            key: String::new(),
            per_second: false,
        }
    }

    /// True if this key identifies a counter to touch.
    pub fn is_some(&self) -> bool {
        !self.key.is_empty()
    }
}

/// An injected digest: raw key bytes to a fixed-width hex string.
pub type HashFn = fn(&[u8]) -> String;

/// 128-bit MurmurHash3 (x64 variant) digest.
pub fn murmur128(bytes: &[u8]) -> String {
    format!("{:032x}", fastmurmur3::hash(bytes))
}

/// 128-bit XXH3 digest.
pub fn xxhash128(bytes: &[u8]) -> String {
    format!("{:032x}", twox_hash::xxh3::hash128(bytes))
}

/// 32-bit CRC digest. Smaller and weaker than the 128-bit options; only
/// suitable where key cardinality is low.
pub fn crc32(bytes: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(bytes))
}

/// Generates cache keys for limit lookups.
///
/// Stateless apart from a pool of reusable string buffers; safe to share
/// across concurrent decision calls.
pub struct CacheKeyGenerator {
    prefix: String,
    hash: Option<HashFn>,
    buffer_pool: Mutex<Vec<String>>,
}

impl CacheKeyGenerator {
    /// A generator emitting the literal concatenated key. Useful for
    /// debugging and for stores where key size is not a concern.
    pub fn human_readable(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            hash: None,
            buffer_pool: Mutex::new(Vec::new()),
        }
    }

    /// A generator that compacts keys through `hash`, trading a small,
    /// bounded collision probability for fixed key size. The digest choice
    /// changes nothing but the key bytes.
    pub fn hashed(prefix: impl Into<String>, hash: HashFn) -> Self {
        Self {
            prefix: prefix.into(),
            hash: Some(hash),
            buffer_pool: Mutex::new(Vec::new()),
        }
    }

    /// Generate a cache key for a limit lookup.
    ///
    /// Returns an empty key when `limit` is `None`, signaling that no
    /// counting is needed. `now` is unix seconds.
    pub fn generate_cache_key(
        &self,
        domain: &str,
        descriptor: &Descriptor,
        limit: Option<&RateLimit>,
        now: i64,
    ) -> CacheKey {
        let Some(limit) = limit else {
            return CacheKey::none();
        };

        let mut buffer = self.buffer_pool.lock().pop().unwrap_or_default();
        buffer.clear();

        buffer.push_str(&self.prefix);
        buffer.push_str(domain);
        buffer.push('_');
        Self::write_entries(descriptor, &mut buffer);

        let divider = limit.unit.seconds() as i64;
        let bucket = (now / divider) * divider;
        let _ = write!(buffer, "{}", bucket);

        let key = match self.hash {
            Some(hash) => hash(buffer.as_bytes()),
            None => buffer.clone(),
        };
        self.buffer_pool.lock().push(buffer);

        CacheKey {
            key,
            per_second: limit.unit == TimeUnit::Second,
        }
    }

    /// Entries in input order, nested descriptors depth-first after their
    /// parent's entries.
    fn write_entries(descriptor: &Descriptor, buffer: &mut String) {
        for entry in &descriptor.entries {
            buffer.push_str(&entry.key);
            buffer.push('_');
            buffer.push_str(&entry.value);
            buffer.push('_');
        }
        for nested in &descriptor.descriptors {
            Self::write_entries(nested, buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Entry;

    fn limit(unit: TimeUnit) -> RateLimit {
        RateLimit {
            full_key: "svc.path_/login".to_string(),
            requests_per_unit: 5,
            unit,
            unlimited: false,
            shadow_mode: false,
            name: String::new(),
            replaces: Vec::new(),
        }
    }

    fn descriptor() -> Descriptor {
        Descriptor::new([Entry::new("path", "/login")])
    }

    #[test]
    fn test_none_limit_yields_empty_key() {
        let generator = CacheKeyGenerator::human_readable("");
        let key = generator.generate_cache_key("svc", &descriptor(), None, 100);
        assert!(!key.is_some());
        assert!(!key.per_second);
    }

    #[test]
    fn test_human_readable_layout() {
        let generator = CacheKeyGenerator::human_readable("gate_");
        let limit = limit(TimeUnit::Minute);
        let key = generator.generate_cache_key("svc", &descriptor(), Some(&limit), 61);
        assert_eq!(key.key, "gate_svc_path_/login_60");
        assert!(!key.per_second);
    }

    #[test]
    fn test_determinism_across_calls() {
        let generator = CacheKeyGenerator::hashed("", murmur128);
        let limit = limit(TimeUnit::Minute);
        let first = generator.generate_cache_key("svc", &descriptor(), Some(&limit), 61);
        let second = generator.generate_cache_key("svc", &descriptor(), Some(&limit), 61);
        assert_eq!(first, second);
    }

    #[test]
    fn test_time_bucketing_minute_window() {
        let generator = CacheKeyGenerator::human_readable("");
        let limit = limit(TimeUnit::Minute);

        let a = generator.generate_cache_key("svc", &descriptor(), Some(&limit), 61);
        let b = generator.generate_cache_key("svc", &descriptor(), Some(&limit), 90);
        let c = generator.generate_cache_key("svc", &descriptor(), Some(&limit), 119);
        let d = generator.generate_cache_key("svc", &descriptor(), Some(&limit), 121);

        assert_eq!(a.key, b.key);
        assert_eq!(a.key, c.key);
        assert_ne!(c.key, d.key);
    }

    #[test]
    fn test_per_second_flag_agrees_across_encodings() {
        let readable = CacheKeyGenerator::human_readable("");
        let hashed = CacheKeyGenerator::hashed("", xxhash128);
        let limit = limit(TimeUnit::Second);

        let a = readable.generate_cache_key("svc", &descriptor(), Some(&limit), 7);
        let b = hashed.generate_cache_key("svc", &descriptor(), Some(&limit), 7);
        assert!(a.per_second);
        assert!(b.per_second);
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_hash_choice_changes_only_the_key_bytes() {
        let limit = limit(TimeUnit::Minute);
        let murmur = CacheKeyGenerator::hashed("", murmur128)
            .generate_cache_key("svc", &descriptor(), Some(&limit), 61);
        let xxh = CacheKeyGenerator::hashed("", xxhash128)
            .generate_cache_key("svc", &descriptor(), Some(&limit), 61);
        let crc = CacheKeyGenerator::hashed("", crc32)
            .generate_cache_key("svc", &descriptor(), Some(&limit), 61);

        assert_eq!(murmur.key.len(), 32);
        assert_eq!(xxh.key.len(), 32);
        assert_eq!(crc.key.len(), 8);
        assert_ne!(murmur.key, xxh.key);
        assert_eq!(murmur.per_second, xxh.per_second);
        assert_eq!(murmur.per_second, crc.per_second);
    }

    #[test]
    fn test_nested_entries_flatten_in_order() {
        let generator = CacheKeyGenerator::human_readable("");
        let limit = limit(TimeUnit::Minute);
        let nested = Descriptor::new([Entry::new("path", "/login")])
            .with_nested(Descriptor::new([Entry::new("method", "POST")]));

        let key = generator.generate_cache_key("svc", &nested, Some(&limit), 0);
        assert_eq!(key.key, "svc_path_/login_method_POST_0");
    }
}
