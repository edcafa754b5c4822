//! Redis-backed rate limiting primitives (§4.D) and the KV-store
//! abstraction they (and the log queue) sit on top of.

pub mod error;
pub mod kv;
pub mod limiter;
pub mod memory;
pub mod queue;
pub mod redis_store;

pub use error::KvError;
pub use kv::KvStore;
pub use limiter::{ExponentialBackoffLimiter, FreeModelLimiter, LimitDecision, SlidingWindowLimiter, now_ms};
pub use memory::InMemoryKvStore;
pub use queue::{LOG_QUEUE_KEY, LogQueue};
pub use redis_store::RedisKvStore;
