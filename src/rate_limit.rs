use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::store::RecordStore;

pub const DEFAULT_LIMIT: u32 = 5;
const MAX_TRACKED_IPS: usize = 10_000;

pub fn window() -> Duration {
    Duration::hours(1)
}

/// Per-IP submission throttle. `check` returns `false` when the caller is
/// over the limit.
#[async_trait]
pub trait SubmissionLimiter: Send + Sync {
    async fn check(&self, ip: &str) -> bool;
}

#[derive(Clone, Debug)]
pub struct WindowCounter {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Process-local fixed window counters. Not shared between instances.
#[derive(Debug)]
pub struct MemoryLimiter {
    limit: u32,
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl MemoryLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check_at(&self, ip: &str, now: DateTime<Utc>) -> bool {
        let mut counters = self.counters.lock().await;
        if counters.len() > MAX_TRACKED_IPS {
            counters.retain(|_, c| c.reset_at >= now);
        }
        let entry = counters.entry(ip.to_string()).or_insert(WindowCounter {
            count: 0,
            reset_at: now + window(),
        });
        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window();
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }
}

#[async_trait]
impl SubmissionLimiter for MemoryLimiter {
    async fn check(&self, ip: &str) -> bool {
        self.check_at(ip, Utc::now()).await
    }
}

/// Counts the caller's recent records in the shared store, so every instance
/// sees the same history. Fails open when the count cannot be read.
pub struct StoreLimiter {
    limit: u32,
    store: Arc<dyn RecordStore>,
}

impl StoreLimiter {
    pub fn new(limit: u32, store: Arc<dyn RecordStore>) -> Self {
        Self { limit, store }
    }
}

#[async_trait]
impl SubmissionLimiter for StoreLimiter {
    async fn check(&self, ip: &str) -> bool {
        match self.store.count_since(ip, Utc::now() - window()).await {
            Ok(count) => count < u64::from(self.limit),
            Err(e) => {
                warn!("Rate limit count failed for {}, allowing: {}", ip, e);
                true
            }
        }
    }
}
