//! An in-process [`KvStore`] implementation. Not a mock: it implements the
//! same sorted-set/string/list semantics the limiters rely on, just backed
//! by a `Mutex<HashMap>` instead of a Redis connection, so tests exercise
//! the real limiter logic end to end (§4.D).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::KvError;
use crate::kv::KvStore;

#[derive(Default)]
struct Entry {
    zset: Vec<(String, f64)>,
    string: Option<String>,
    list: VecDeque<String>,
}

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_default();
        entry.zset.retain(|(m, _)| m != member);
        entry.zset.push((member.to_string(), score));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(0);
        };
        let before = entry.zset.len();
        entry.zset.retain(|(_, score)| *score < min || *score > max);
        Ok((before - entry.zset.len()) as i64)
    }

    async fn zcard(&self, key: &str) -> Result<i64, KvError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).map(|e| e.zset.len()).unwrap_or(0) as i64)
    }

    async fn zrange_lowest_score(&self, key: &str) -> Result<Option<f64>, KvError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(key)
            .and_then(|e| e.zset.iter().map(|(_, score)| *score).fold(None, |acc, s| {
                Some(acc.map_or(s, |a: f64| a.min(s)))
            })))
    }

    async fn expire(&self, _key: &str, _seconds: i64) -> Result<(), KvError> {
        // No TTL sweeper in the in-memory store; keys live for the test's
        // lifetime, which is all the limiter tests need.
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).and_then(|e| e.string.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(key.to_string()).or_default().string = Some(value.to_string());
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_default();
        let current = entry.string.as_deref().and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
        let next = current + 1;
        entry.string = Some(next.to_string());
        Ok(next)
    }

    async fn del(&self, keys: &[&str]) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(key.to_string()).or_default().list.push_back(value.to_string());
        Ok(())
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>, KvError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(count.min(entry.list.len()));
        for _ in 0..count {
            match entry.list.pop_front() {
                Some(value) => out.push(value),
                None => break,
            }
        }
        Ok(out)
    }
}
