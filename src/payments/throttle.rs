//! Per-phone throttling of push requests
//!
//! Every push rings the customer's handset, so pushes to one number are
//! limited independently of the general API.

use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::RwLock;

/// Token bucket for one phone number
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_update: Instant::now(),
        }
    }

    fn try_consume(&mut self, tokens_per_second: f64, max_tokens: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * tokens_per_second).min(max_tokens);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct PushThrottle {
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
    tokens_per_minute: f64,
    max_tokens: f64,
}

impl PushThrottle {
    /// No burst above the per-minute limit
    pub fn new(pushes_per_minute: u32) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            tokens_per_minute: pushes_per_minute as f64,
            max_tokens: pushes_per_minute as f64,
        }
    }

    /// Take one push allowance for `phone_number`
    pub async fn check(&self, phone_number: &str) -> bool {
        let mut buckets = self.buckets.write().await;

        let bucket = buckets
            .entry(phone_number.to_string())
            .or_insert_with(|| TokenBucket::new(self.max_tokens));

        let tokens_per_second = self.tokens_per_minute / 60.0;
        bucket.try_consume(tokens_per_second, self.max_tokens)
    }

    /// Drop buckets idle for longer than `max_age`
    pub async fn cleanup(&self, max_age: std::time::Duration) -> usize {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_update) < max_age);
        before - buckets.len()
    }
}

impl Default for PushThrottle {
    fn default() -> Self {
        Self::new(10)
    }
}
