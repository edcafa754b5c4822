//! `redis`-backed [`KvStore`] (§6 `REDIS_URL`/`REDIS_HOST`+`REDIS_PORT`+`REDIS_PASSWORD`).
//! Not part of the teacher's stack — pulled in the way the spec's own
//! reference gateway does, as the idiomatic Rust client for Redis-shaped
//! sorted-set/string/list semantics.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::KvError;
use crate::kv::KvStore;

pub struct RedisKvStore {
    manager: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(|e| KvError::Unavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        Ok(Self { manager })
    }

    /// Builds a `redis://` DSN from the discrete `REDIS_HOST`/`REDIS_PORT`/
    /// `REDIS_PASSWORD` variables when `REDIS_URL` itself is absent (§6).
    pub fn dsn_from_parts(host: &str, port: u16, password: Option<&str>) -> String {
        match password {
            Some(password) if !password.is_empty() => format!("redis://:{password}@{host}:{port}"),
            _ => format!("redis://{host}:{port}"),
        }
    }
}

fn map_err(e: redis::RedisError) -> KvError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        KvError::Unavailable(e.to_string())
    } else {
        KvError::Protocol(e.to_string())
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await.map_err(map_err)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, KvError> {
        let mut conn = self.manager.clone();
        conn.zrembyscore(key, min, max).await.map_err(map_err)
    }

    async fn zcard(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.manager.clone();
        conn.zcard(key).await.map_err(map_err)
    }

    async fn zrange_lowest_score(&self, key: &str) -> Result<Option<f64>, KvError> {
        let mut conn = self.manager.clone();
        let result: Vec<(String, f64)> = conn.zrangebyscore_withscores(key, "-inf", "+inf").await.map_err(map_err)?;
        Ok(result.into_iter().next().map(|(_, score)| score))
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, seconds).await.map_err(map_err)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(map_err)
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await.map_err(map_err)
    }

    async fn del(&self, keys: &[&str]) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(keys).await.map_err(map_err)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(key, value).await.map_err(map_err)
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        let result: Option<Vec<String>> = conn
            .lpop(key, std::num::NonZeroUsize::new(count))
            .await
            .map_err(map_err)?;
        Ok(result.unwrap_or_default())
    }
}
