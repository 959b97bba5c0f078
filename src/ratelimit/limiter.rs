//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

use crate::config::{RateLimit, SharedConfig};
use crate::error::StoreError;
use crate::ratelimit::cache_key::CacheKeyGenerator;
use crate::ratelimit::descriptor::Descriptor;
use crate::stats::{NoopSink, StatsSink};
use crate::store::{CounterIncrement, CounterStore};

/// Default fraction of a limit at which the near-limit signal fires.
const DEFAULT_NEAR_LIMIT_RATIO: f64 = 0.8;
/// Default deadline for the store round trip.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Source of the current unix time, injectable for tests.
pub trait Clock: Send + Sync {
    /// Current unix time in seconds.
    fn unix_now(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }
}

/// What to do with counted descriptors when the store is unavailable.
///
/// One explicit policy for the whole limiter; behavior under outage is
/// uniform and never inferred per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Allow everything and report the store error.
    #[default]
    FailOpen,
    /// Deny everything that needed counting and report the store error.
    /// Shadow-mode rules are still allowed.
    FailClosed,
}

/// The outcome for one descriptor.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The rule that applied, if any.
    pub limit: Option<Arc<RateLimit>>,
    /// True if the descriptor exceeded its limit and should be rejected.
    pub over_limit: bool,
    /// True if the count is approaching the limit without exceeding it.
    pub near_limit: bool,
    /// The counter value after this call's increment.
    pub current_count: u64,
    /// Requests left in the current unit window.
    pub limit_remaining: u64,
}

impl Decision {
    fn unmatched() -> Self {
        Self {
            limit: None,
            over_limit: false,
            near_limit: false,
            current_count: 0,
            limit_remaining: 0,
        }
    }
}

/// The result of one decision call: one decision per input descriptor, in
/// input order, plus the store status.
///
/// Callers always receive a decision for every descriptor they submitted;
/// a store failure is reported here rather than thrown.
#[derive(Debug)]
pub struct CheckResult {
    /// Per-descriptor decisions, preserving input order.
    pub decisions: Vec<Decision>,
    /// Set if the store round trip failed and decisions were synthesized
    /// according to the failure policy.
    pub store_error: Option<StoreError>,
}

impl CheckResult {
    /// True if the store round trip succeeded.
    pub fn ok(&self) -> bool {
        self.store_error.is_none()
    }

    /// True if any descriptor in this call is over its limit.
    pub fn any_over_limit(&self) -> bool {
        self.decisions.iter().any(|d| d.over_limit)
    }
}

/// Where one descriptor's counter op landed, so counts can be rejoined
/// after the batched round trip.
enum Slot {
    Unmatched,
    Unlimited(Arc<RateLimit>),
    Counted {
        limit: Arc<RateLimit>,
        op_index: usize,
        per_second_pool: bool,
    },
}

/// The core rate limiter.
///
/// Orchestrates, per decision call, the configuration matcher, the cache
/// key generator, and one pipelined batch against the shared counter
/// store. Thread-safe; one instance is shared across all request tasks.
pub struct RateLimiter {
    config: Arc<SharedConfig>,
    store: Arc<dyn CounterStore>,
    /// Optional dedicated store for second-granularity limits.
    per_second_store: Option<Arc<dyn CounterStore>>,
    key_generator: CacheKeyGenerator,
    stats: Arc<dyn StatsSink>,
    clock: Arc<dyn Clock>,
    near_limit_ratio: f64,
    failure_policy: FailurePolicy,
    store_timeout: Duration,
}

impl RateLimiter {
    /// Create a limiter over a live configuration and a counter store.
    pub fn new(config: Arc<SharedConfig>, store: Arc<dyn CounterStore>) -> Self {
        Self {
            config,
            store,
            per_second_store: None,
            key_generator: CacheKeyGenerator::human_readable(""),
            stats: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
            near_limit_ratio: DEFAULT_NEAR_LIMIT_RATIO,
            failure_policy: FailurePolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Route second-granularity limits to a dedicated store.
    pub fn with_per_second_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.per_second_store = Some(store);
        self
    }

    /// Replace the cache key generator.
    pub fn with_key_generator(mut self, generator: CacheKeyGenerator) -> Self {
        self.key_generator = generator;
        self
    }

    /// Attach a stats sink.
    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the near-limit signaling ratio.
    pub fn with_near_limit_ratio(mut self, ratio: f64) -> Self {
        self.near_limit_ratio = ratio;
        self
    }

    /// Set the behavior under store failure.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the deadline for the store round trip.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Decide, for a batch of descriptors, whether each should be limited.
    ///
    /// Descriptors are evaluated independently; decisions come back in
    /// input order. The store round trip is the only await point and is
    /// bounded by the configured deadline.
    pub async fn should_rate_limit(
        &self,
        domain: &str,
        descriptors: &[Descriptor],
        hits_addend: u32,
    ) -> CheckResult {
        let hits = u64::from(if hits_addend == 0 { 1 } else { hits_addend });
        let now = self.clock.unix_now();
        let config = self.config.current();

        let mut slots = Vec::with_capacity(descriptors.len());
        let mut default_ops: Vec<CounterIncrement> = Vec::new();
        let mut second_ops: Vec<CounterIncrement> = Vec::new();

        for descriptor in descriptors {
            match config.get_limit(domain, descriptor) {
                None => slots.push(Slot::Unmatched),
                Some(limit) if limit.unlimited => {
                    trace!(key = %limit.full_key, "unlimited rule matched");
                    slots.push(Slot::Unlimited(limit));
                }
                Some(limit) => {
                    let cache_key =
                        self.key_generator
                            .generate_cache_key(domain, descriptor, Some(&limit), now);
                    let unit_seconds = limit.unit.seconds() as i64;
                    // A counter created mid-window expires at the window
                    // boundary, not a full unit later.
                    let ttl = unit_seconds - now.rem_euclid(unit_seconds);
                    let op = CounterIncrement {
                        key: cache_key.key,
                        amount: hits,
                        ttl: Duration::from_secs(ttl as u64),
                    };
                    let per_second_pool = cache_key.per_second && self.per_second_store.is_some();
                    let ops = if per_second_pool {
                        &mut second_ops
                    } else {
                        &mut default_ops
                    };
                    let op_index = ops.len();
                    ops.push(op);
                    slots.push(Slot::Counted {
                        limit,
                        op_index,
                        per_second_pool,
                    });
                }
            }
        }

        let mut default_counts = Vec::new();
        let mut second_counts = Vec::new();
        let mut store_error = None;
        if !default_ops.is_empty() || !second_ops.is_empty() {
            match self.increment_all(&default_ops, &second_ops).await {
                Ok((defaults, seconds)) => {
                    default_counts = defaults;
                    second_counts = seconds;
                }
                Err(e) => {
                    warn!(
                        domain = domain,
                        policy = ?self.failure_policy,
                        error = %e,
                        "counter store failure"
                    );
                    store_error = Some(e);
                }
            }
        }

        let decisions = slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Unmatched => Decision::unmatched(),
                Slot::Unlimited(limit) => {
                    self.stats
                        .add(&format!("{}.total_hits", limit.full_key), hits);
                    Decision {
                        limit: Some(limit),
                        over_limit: false,
                        near_limit: false,
                        current_count: 0,
                        limit_remaining: 0,
                    }
                }
                Slot::Counted {
                    limit,
                    op_index,
                    per_second_pool,
                } => {
                    if store_error.is_some() {
                        self.failure_decision(limit)
                    } else {
                        let count = if per_second_pool {
                            second_counts[op_index]
                        } else {
                            default_counts[op_index]
                        };
                        self.counted_decision(limit, count, hits)
                    }
                }
            })
            .collect();

        CheckResult {
            decisions,
            store_error,
        }
    }

    /// Run the pipelined batch(es) under the store deadline. Per-second
    /// and default batches run concurrently; an error in either fails the
    /// whole round trip.
    async fn increment_all(
        &self,
        default_ops: &[CounterIncrement],
        second_ops: &[CounterIncrement],
    ) -> Result<(Vec<u64>, Vec<u64>), StoreError> {
        let round_trip = async {
            let (default_counts, second_counts) = match &self.per_second_store {
                Some(per_second) if !second_ops.is_empty() => {
                    let (defaults, seconds) = tokio::join!(
                        self.store.increment(default_ops),
                        per_second.increment(second_ops)
                    );
                    (defaults?, seconds?)
                }
                _ => (self.store.increment(default_ops).await?, Vec::new()),
            };
            if default_counts.len() != default_ops.len() || second_counts.len() != second_ops.len()
            {
                return Err(StoreError::Protocol(
                    "store returned fewer counts than keys".to_string(),
                ));
            }
            Ok((default_counts, second_counts))
        };

        match tokio::time::timeout(self.store_timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }

    fn counted_decision(&self, limit: Arc<RateLimit>, count: u64, hits: u64) -> Decision {
        let threshold = limit.requests_per_unit as u64;
        let raw_over = count > threshold;
        let near_limit =
            !raw_over && (count as f64) > (threshold as f64) * self.near_limit_ratio;
        let limit_remaining = threshold.saturating_sub(count);

        self.stats
            .add(&format!("{}.total_hits", limit.full_key), hits);
        if raw_over {
            self.stats
                .add(&format!("{}.over_limit", limit.full_key), hits);
        }
        if near_limit {
            self.stats
                .add(&format!("{}.near_limit", limit.full_key), hits);
        }

        let over_limit = raw_over && !limit.shadow_mode;
        if raw_over {
            debug!(
                key = %limit.full_key,
                count = count,
                limit = threshold,
                shadow_mode = limit.shadow_mode,
                "rate limit exceeded"
            );
        }

        Decision {
            limit: Some(limit),
            over_limit,
            near_limit,
            current_count: count,
            limit_remaining,
        }
    }

    fn failure_decision(&self, limit: Arc<RateLimit>) -> Decision {
        match self.failure_policy {
            FailurePolicy::FailOpen => Decision {
                limit_remaining: limit.requests_per_unit as u64,
                limit: Some(limit),
                over_limit: false,
                near_limit: false,
                current_count: 0,
            },
            FailurePolicy::FailClosed => Decision {
                over_limit: !limit.shadow_mode,
                limit: Some(limit),
                near_limit: false,
                current_count: 0,
                limit_remaining: 0,
            },
        }
    }
}
