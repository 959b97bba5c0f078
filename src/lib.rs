//! Floodgate - Shared Rate Limiting Decision Engine
//!
//! This crate implements the decision core of a global rate limiting
//! service: hierarchical rule configuration with live diff-based
//! reconfiguration, time-bucketed cache key derivation, and a batched
//! limiting algorithm backed by a shared counter store so that limits are
//! enforced consistently across many concurrent callers.
//!
//! The surrounding service transport, process bootstrap, and metrics
//! export are intentionally out of scope; they interact with this crate
//! through [`ratelimit::RateLimiter::should_rate_limit`], the
//! [`store::CounterStore`] capability, and the [`stats::StatsSink`]
//! capability.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod stats;
pub mod store;
