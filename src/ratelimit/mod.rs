//! Rate limiting decision logic.

mod cache_key;
mod descriptor;
mod limiter;

pub use cache_key::{crc32, murmur128, xxhash128, CacheKey, CacheKeyGenerator, HashFn};
pub use descriptor::{Descriptor, Entry};
pub use limiter::{CheckResult, Clock, Decision, FailurePolicy, RateLimiter, SystemClock};
