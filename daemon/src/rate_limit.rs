//! Per-agent token-bucket rate limiting.
//!
//! Each agent owns a bucket with `capacity` tokens refilling continuously
//! over the configured window. One token is consumed per allowed call.
//! The same agent may issue calls from several connections concurrently;
//! the bucket map is guarded accordingly.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;

/// Outcome of a rate-limit check. Rejections always carry the retry hint
/// and remaining balance so the caller can return a structured error.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Bucket>>,
    capacity: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            capacity,
            window,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn refill_rate(&self) -> f64 {
        self.capacity as f64 / self.window.as_secs_f64()
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate()).min(self.capacity as f64);
        bucket.last_refill = now;
    }

    /// Atomically consume one token if available.
    pub async fn check(&self, agent_id: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(agent_id.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.capacity as f64,
                last_refill: now,
            });
        self.refill(bucket, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision {
                allowed: true,
                remaining: bucket.tokens as u32,
                retry_after_secs: 0,
            }
        } else {
            let wait_secs = (1.0 - bucket.tokens) / self.refill_rate();
            metrics::counter!("arena_rate_limit_rejections_total").increment(1);
            RateDecision {
                allowed: false,
                remaining: bucket.tokens as u32,
                retry_after_secs: wait_secs.ceil() as u64,
            }
        }
    }

    /// Remaining balance without consuming, for rate-limit headers.
    pub async fn remaining(&self, agent_id: &str) -> u32 {
        let now = Instant::now();
        let buckets = self.buckets.read().await;
        match buckets.get(agent_id) {
            Some(bucket) => {
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                (bucket.tokens + elapsed * self.refill_rate()).min(self.capacity as f64) as u32
            }
            None => self.capacity,
        }
    }

    /// Drop buckets idle for at least two full windows, keeping the map
    /// bounded (should be called periodically).
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let cutoff = self.window * 2;
        let mut buckets = self.buckets.write().await;
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < cutoff);
    }
}
