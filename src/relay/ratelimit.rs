//! Admission-time token buckets: one keyed by remote IP, one keyed by the
//! client-chosen ID. Built directly on `governor`'s keyed rate limiter,
//! which shards its internal state map itself — no extra locking layer
//! needed on top.

use std::hash::Hash;
use std::net::IpAddr;
use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

type Inner<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

/// A per-key token bucket: `per_minute` requests refill per key, `burst` is
/// the bucket capacity. Keys are created lazily on first use and never
/// evicted — acceptable for the expected cardinality of IDs/IPs in a single
/// relay process (mirrors the original's unbounded rate limiter map).
pub struct KeyedRateLimiter<K: Clone + Hash + Eq> {
    inner: Inner<K>,
}

impl<K: Clone + Hash + Eq> KeyedRateLimiter<K> {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute.max(1)).unwrap();
        let burst = NonZeroU32::new(burst.max(1)).unwrap();
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        KeyedRateLimiter { inner: RateLimiter::keyed(quota) }
    }

    pub fn allow(&self, key: &K) -> bool {
        self.inner.check_key(key).is_ok()
    }
}

pub type IpRateLimiter = KeyedRateLimiter<IpAddr>;
pub type IdRateLimiter = KeyedRateLimiter<String>;
