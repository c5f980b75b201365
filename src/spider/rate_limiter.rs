use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::spider::retry::cancelled;
use crate::spider::ScrapeError;

const BACKOFF_FACTOR: f64 = 0.5;
const RECOVERY_FACTOR: f64 = 1.1;
const BURST: f64 = 1.0;

struct Bucket {
    /// Requests per second.
    current_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.current_rate).min(BURST);
        self.last_refill = now;
    }
}

/// Token bucket with a burst of one whose rate halves on upstream rate limiting
/// and creeps back up by 10% per success, bounded by `[min_rate, base_rate]`.
pub struct DynamicRateLimiter {
    base_rate: f64,
    min_rate: f64,
    bucket: Mutex<Bucket>,
}

impl DynamicRateLimiter {
    pub fn new(requests_per_minute: u32, min_requests_per_minute: u32) -> Self {
        let base_rate = requests_per_minute.max(1) as f64 / 60.0;
        let min_rate = (min_requests_per_minute.max(1) as f64 / 60.0).min(base_rate);
        metrics::gauge!("spider_rate_limit_rpm").set(base_rate * 60.0);
        Self {
            base_rate,
            min_rate,
            bucket: Mutex::new(Bucket {
                current_rate: base_rate,
                tokens: BURST,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Blocks until a token is available or `cancel` flips to true.
    pub async fn wait(&self, cancel: &mut watch::Receiver<bool>) -> Result<(), ScrapeError> {
        loop {
            let delay = {
                let mut bucket = self.bucket.lock();
                bucket.refill(Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.current_rate)
            };

            tokio::select! {
                _ = cancelled(cancel) => return Err(ScrapeError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub fn on_rate_limit_hit(&self) {
        let (old, new) = self.adjust(|rate| rate * BACKOFF_FACTOR);
        warn!(
            old_rate_per_min = old * 60.0,
            new_rate_per_min = new * 60.0,
            "Rate limit hit, reducing rate"
        );
    }

    pub fn on_success(&self) {
        let (old, new) = self.adjust(|rate| rate * RECOVERY_FACTOR);
        if old != new {
            debug!(rate_per_min = new * 60.0, "Rate limit recovered");
        }
    }

    pub fn current_rate_rpm(&self) -> f64 {
        self.bucket.lock().current_rate * 60.0
    }

    pub fn set_rate(&self, requests_per_minute: f64) {
        self.adjust(|_| requests_per_minute / 60.0);
        info!(rate_per_min = requests_per_minute, "Rate limit manually adjusted");
    }

    fn adjust(&self, change: impl FnOnce(f64) -> f64) -> (f64, f64) {
        let mut bucket = self.bucket.lock();
        // Settle tokens earned at the old rate first.
        bucket.refill(Instant::now());
        let old = bucket.current_rate;
        bucket.current_rate = change(old).clamp(self.min_rate, self.base_rate);
        metrics::gauge!("spider_rate_limit_rpm").set(bucket.current_rate * 60.0);
        (old, bucket.current_rate)
    }
}
