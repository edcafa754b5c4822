//! Thin wrapper over the KV store's list commands for the `LOG_QUEUE`
//! (§4.E step 7, §4.F "Queue drain"). Serialization is the caller's
//! responsibility; this type only knows about the key name and push/pop.

use std::sync::Arc;

use crate::error::KvError;
use crate::kv::KvStore;

pub const LOG_QUEUE_KEY: &str = "LOG_QUEUE";

pub struct LogQueue {
    store: Arc<dyn KvStore>,
}

impl LogQueue {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn push(&self, serialized_log: &str) -> Result<(), KvError> {
        self.store.rpush(LOG_QUEUE_KEY, serialized_log).await
    }

    pub async fn pop_batch(&self, max: usize) -> Result<Vec<String>, KvError> {
        self.store.lpop(LOG_QUEUE_KEY, max).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKvStore;

    #[tokio::test]
    async fn pushes_and_drains_fifo() {
        let queue = LogQueue::new(Arc::new(InMemoryKvStore::new()));
        queue.push("log_1").await.unwrap();
        queue.push("log_2").await.unwrap();
        let batch = queue.pop_batch(10).await.unwrap();
        assert_eq!(batch, vec!["log_1".to_string(), "log_2".to_string()]);
    }
}
