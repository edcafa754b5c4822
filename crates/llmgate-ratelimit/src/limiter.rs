//! Sliding-window, exponential-backoff, and free-model quota limiters
//! (§4.D). All three are fail-open: a store error is logged and the call
//! returns `allowed=true` rather than blocking the request plane on a
//! degraded KV store.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::kv::KvStore;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitDecision {
    pub allowed: bool,
    /// Seconds until the caller may retry; only set when `allowed=false`.
    pub retry_after_secs: Option<u64>,
    pub limit: i64,
}

impl LimitDecision {
    fn allow(limit: i64) -> Self {
        Self { allowed: true, retry_after_secs: None, limit }
    }

    fn deny(limit: i64, retry_after_secs: u64) -> Self {
        Self { allowed: false, retry_after_secs: Some(retry_after_secs), limit }
    }

    /// The fail-open outcome: treated as allowed, but distinguishable in
    /// logs from a genuine capacity allow.
    fn fail_open(limit: i64) -> Self {
        Self { allowed: true, retry_after_secs: None, limit }
    }
}

/// Key = `{prefix}:{identifier}`; ordered set of score=unix-ms (§4.D).
pub struct SlidingWindowLimiter {
    store: Arc<dyn KvStore>,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self, prefix: &str, identifier: &str, limit: i64, window_secs: i64, now: i64) -> LimitDecision {
        match self.check_inner(prefix, identifier, limit, window_secs, now).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, prefix, identifier, "rate limiter store error, failing open");
                LimitDecision::fail_open(limit)
            }
        }
    }

    async fn check_inner(
        &self,
        prefix: &str,
        identifier: &str,
        limit: i64,
        window_secs: i64,
        now: i64,
    ) -> Result<LimitDecision, crate::error::KvError> {
        let key = format!("{prefix}:{identifier}");
        let window_ms = window_secs * 1000;
        self.store.zremrangebyscore(&key, f64::NEG_INFINITY, (now - window_ms) as f64).await?;
        let count = self.store.zcard(&key).await?;

        if count < limit {
            self.store.zadd(&key, now as f64, &now.to_string()).await?;
            self.store.expire(&key, window_secs.max(1)).await?;
            return Ok(LimitDecision::allow(limit));
        }

        let retry_after = match self.store.zrange_lowest_score(&key).await? {
            Some(oldest) => {
                let remaining_ms = (oldest as i64 + window_ms) - now;
                remaining_ms.max(0).div_ceil(1000) as u64
            }
            None => window_secs as u64,
        };
        Ok(LimitDecision::deny(limit, retry_after))
    }
}

/// Keys: `{prefix}:{id}` (last-attempt ms) and `{prefix}_attempts:{id}`
/// (counter) (§4.D).
pub struct ExponentialBackoffLimiter {
    store: Arc<dyn KvStore>,
}

impl ExponentialBackoffLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self, prefix: &str, id: &str, base_delay_ms: i64, max_delay_ms: i64, now: i64) -> LimitDecision {
        match self.check_inner(prefix, id, base_delay_ms, max_delay_ms, now).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, prefix, id, "backoff limiter store error, failing open");
                LimitDecision::fail_open(1)
            }
        }
    }

    async fn check_inner(
        &self,
        prefix: &str,
        id: &str,
        base_delay_ms: i64,
        max_delay_ms: i64,
        now: i64,
    ) -> Result<LimitDecision, crate::error::KvError> {
        let last_key = format!("{prefix}:{id}");
        let attempts_key = format!("{prefix}_attempts:{id}");

        let last_attempt = self.store.get(&last_key).await?.and_then(|v| v.parse::<i64>().ok());
        let attempts = self.store.get(&attempts_key).await?.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);

        if let Some(last_attempt) = last_attempt {
            let delay = if attempts <= 0 {
                0
            } else {
                let shift = (attempts - 1).clamp(0, 62) as u32;
                base_delay_ms.saturating_mul(1i64 << shift).min(max_delay_ms)
            };
            if now < last_attempt + delay {
                let retry_after = ((last_attempt + delay) - now).max(0).div_ceil(1000) as u64;
                return Ok(LimitDecision::deny(1, retry_after));
            }
        }

        self.store.set(&last_key, &now.to_string()).await?;
        self.store.incr(&attempts_key).await?;
        self.store.expire(&attempts_key, max_delay_ms.div_ceil(1000).max(1)).await?;
        Ok(LimitDecision::allow(1))
    }

    /// `resetExponentialRateLimit(id)` (§4.D "Reset").
    pub async fn reset(&self, prefix: &str, id: &str) {
        let last_key = format!("{prefix}:{id}");
        let attempts_key = format!("{prefix}_attempts:{id}");
        if let Err(err) = self.store.del(&[&last_key, &attempts_key]).await {
            warn!(error = %err, prefix, id, "failed to reset backoff limiter keys");
        }
    }
}

/// Elevated limits apply when the org's `credits>0` (20 per 60s), base
/// otherwise (5 per 600s) (§4.D "Free-model quota").
pub struct FreeModelLimiter {
    sliding_window: SlidingWindowLimiter,
}

const FREE_MODEL_PREFIX: &str = "rate_limit:free_model";
const ELEVATED_LIMIT: i64 = 20;
const ELEVATED_WINDOW_SECS: i64 = 60;
const BASE_LIMIT: i64 = 5;
const BASE_WINDOW_SECS: i64 = 600;

impl FreeModelLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { sliding_window: SlidingWindowLimiter::new(store) }
    }

    pub async fn check(&self, org_id: &str, model: &str, org_has_credits: bool, now: i64) -> LimitDecision {
        let identifier = format!("{org_id}:{model}");
        let (limit, window_secs) = if org_has_credits {
            (ELEVATED_LIMIT, ELEVATED_WINDOW_SECS)
        } else {
            (BASE_LIMIT, BASE_WINDOW_SECS)
        };
        self.sliding_window.check(FREE_MODEL_PREFIX, &identifier, limit, window_secs, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKvStore;

    fn store() -> Arc<dyn KvStore> {
        Arc::new(InMemoryKvStore::new())
    }

    #[tokio::test]
    async fn sliding_window_allows_up_to_limit_then_denies() {
        let limiter = SlidingWindowLimiter::new(store());
        let now = 1_000_000i64;
        for _ in 0..5 {
            let decision = limiter.check("test", "org_1", 5, 10, now).await;
            assert!(decision.allowed);
        }
        let decision = limiter.check("test", "org_1", 5, 10, now).await;
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs.unwrap() > 0);
    }

    #[tokio::test]
    async fn sliding_window_forgets_entries_outside_the_window() {
        let limiter = SlidingWindowLimiter::new(store());
        for i in 0..5 {
            limiter.check("test", "org_2", 5, 10, i * 1000).await;
        }
        // ten seconds later the first five entries have aged out.
        let decision = limiter.check("test", "org_2", 5, 10, 11_000).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn free_model_limiter_uses_elevated_limit_with_credits() {
        let limiter = FreeModelLimiter::new(store());
        let now = 0i64;
        for i in 0..20 {
            let decision = limiter.check("org_a", "gpt-oss", true, now + i).await;
            assert!(decision.allowed, "request {i} should be allowed");
        }
        let decision = limiter.check("org_a", "gpt-oss", true, now + 20).await;
        assert!(!decision.allowed);
        assert_eq!(decision.limit, 20);
    }

    #[tokio::test]
    async fn free_model_limiter_uses_base_limit_without_credits() {
        let limiter = FreeModelLimiter::new(store());
        let now = 0i64;
        for i in 0..5 {
            let decision = limiter.check("org_b", "gpt-oss", false, now + i).await;
            assert!(decision.allowed, "request {i} should be allowed");
        }
        let decision = limiter.check("org_b", "gpt-oss", false, now + 5).await;
        assert!(!decision.allowed);
        assert_eq!(decision.limit, 5);
    }

    #[tokio::test]
    async fn exponential_backoff_denies_before_delay_elapses_and_resets() {
        let limiter = ExponentialBackoffLimiter::new(store());
        let decision = limiter.check("signup_rate_limit", "1.2.3.4", 1000, 60_000, 0).await;
        assert!(decision.allowed);
        let decision = limiter.check("signup_rate_limit", "1.2.3.4", 1000, 60_000, 500).await;
        assert!(!decision.allowed);
        let decision = limiter.check("signup_rate_limit", "1.2.3.4", 1000, 60_000, 2000).await;
        assert!(decision.allowed);

        limiter.reset("signup_rate_limit", "1.2.3.4").await;
        let decision = limiter.check("signup_rate_limit", "1.2.3.4", 1000, 60_000, 2100).await;
        assert!(decision.allowed);
    }
}
