//! The key-value store abstraction backing every limiter (§3 "KV rate-limit
//! keys", §5 "shared resources"). Modeled narrowly on the handful of Redis
//! commands the limiters actually issue, so a non-Redis backend (tests, or
//! an in-process deployment) can implement the same trait without a mock.

use async_trait::async_trait;

use crate::error::KvError;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// `ZADD key score member`.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError>;
    /// `ZREMRANGEBYSCORE key min max`, returns the number removed.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, KvError>;
    /// `ZCARD key`.
    async fn zcard(&self, key: &str) -> Result<i64, KvError>;
    /// `ZRANGE key 0 0 WITHSCORES` — the single lowest-scored member, used to
    /// compute `retryAfter` from the oldest window entry.
    async fn zrange_lowest_score(&self, key: &str) -> Result<Option<f64>, KvError>;
    /// `EXPIRE key seconds`.
    async fn expire(&self, key: &str, seconds: i64) -> Result<(), KvError>;
    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    /// `SET key value`.
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    /// `INCR key`, returns the post-increment value.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;
    /// `DEL key` (and any other keys passed alongside it).
    async fn del(&self, keys: &[&str]) -> Result<(), KvError>;
    /// `RPUSH key value` — used by the log queue producer side.
    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError>;
    /// `LPOP key count` — used by the log queue consumer side.
    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>, KvError>;
}
