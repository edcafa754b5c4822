//! §4.F `UsageWorker`: the single consumer of `LOG_QUEUE`, running two
//! interleaved loops (queue drain, batch credit processing) plus a periodic
//! auto top-up probe, all inside one task.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::{Duration, OffsetDateTime};

use llmgate_ratelimit::LogQueue;
use llmgate_storage::{NewLogRecord, Storage, StorageResult};

use crate::payment::PaymentProvider;

#[derive(Debug, Clone)]
pub struct UsageWorkerConfig {
    /// `CREDIT_BATCH_SIZE`.
    pub batch_size: u64,
    /// `CREDIT_BATCH_INTERVAL`, default 5s.
    pub batch_processing_interval: StdDuration,
    /// Auto top-up probe cadence in batch-processing ticks; 120 in production.
    pub topup_check_every_iterations: u64,
    /// Amount charged per auto top-up attempt.
    pub topup_amount: Decimal,
}

impl Default for UsageWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_processing_interval: StdDuration::from_secs(5),
            topup_check_every_iterations: 120,
            topup_amount: dec!(20.00),
        }
    }
}

pub struct UsageWorker {
    storage: Arc<dyn Storage>,
    queue: Arc<LogQueue>,
    payments: Arc<dyn PaymentProvider>,
    config: UsageWorkerConfig,
}

impl UsageWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<LogQueue>,
        payments: Arc<dyn PaymentProvider>,
        config: UsageWorkerConfig,
    ) -> Self {
        Self {
            storage,
            queue,
            payments,
            config,
        }
    }

    /// Runs forever. Intended to be spawned as its own background task by
    /// the app's bootstrap; never returns under normal operation.
    pub async fn run(self: Arc<Self>) {
        let mut drain_interval = tokio::time::interval(StdDuration::from_secs(1));
        let mut batch_interval = tokio::time::interval(self.config.batch_processing_interval);
        let mut iteration: u64 = 0;

        loop {
            tokio::select! {
                _ = drain_interval.tick() => {
                    self.drain_queue_once().await;
                }
                _ = batch_interval.tick() => {
                    iteration += 1;
                    self.process_credit_batch_once().await;
                    if iteration % self.config.topup_check_every_iterations == 0 {
                        self.run_topup_probe().await;
                    }
                }
            }
        }
    }

    /// §4.F "Queue drain". Logged and swallowed on failure — a dropped
    /// batch is retried the next tick since `LPOP` already removed it from
    /// the queue, so a parse failure here only loses the unparsable entries,
    /// not the whole batch.
    async fn drain_queue_once(&self) {
        let raw = match self.queue.pop_batch(self.config.batch_size as usize).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(error = %err, "log queue pop failed");
                return;
            }
        };
        if raw.is_empty() {
            return;
        }

        let mut records = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<NewLogRecord>(&entry) {
                Ok(record) => records.push(record),
                Err(err) => tracing::error!(error = %err, "dropped unparsable log record"),
            }
        }

        let count = records.len();
        if let Err(err) = self.storage.insert_logs_batch(records).await {
            tracing::error!(error = %err, count, "log batch insert failed");
        }
    }

    /// §4.F "Batch credit processing". The advisory lock and the
    /// `FOR UPDATE SKIP LOCKED` transaction both live in `Storage` so this
    /// loop only has to react to the outcome.
    async fn process_credit_batch_once(&self) {
        match self.storage.process_pending_logs(self.config.batch_size).await {
            Ok(outcome) => {
                if let Some(processed) = outcome.processed_logs {
                    tracing::debug!(processed, "credit batch processed");
                }
            }
            Err(err) => tracing::error!(error = %err, "credit batch processing failed"),
        }
    }

    /// §4.F "Auto top-up probe".
    async fn run_topup_probe(&self) {
        match self.try_run_topup_probe().await {
            Ok(()) => {}
            Err(err) => tracing::error!(error = %err, "auto top-up probe failed"),
        }
    }

    async fn try_run_topup_probe(&self) -> StorageResult<()> {
        if !self.storage.try_acquire_lock("auto_topup_check").await? {
            return Ok(());
        }
        let result = self.run_topup_probe_locked().await;
        self.storage.release_lock("auto_topup_check").await?;
        result
    }

    async fn run_topup_probe_locked(&self) -> StorageResult<()> {
        let candidates = self.storage.organizations_needing_topup().await?;
        let one_hour_ago = OffsetDateTime::now_utc() - Duration::hours(1);

        for candidate in candidates {
            if self
                .storage
                .has_recent_transaction(candidate.organization_id, one_hour_ago)
                .await?
            {
                continue;
            }

            let transaction_id = self
                .storage
                .create_pending_transaction(candidate.organization_id, self.config.topup_amount)
                .await?;
            let outcome = self
                .payments
                .charge_topup(candidate.organization_id, self.config.topup_amount)
                .await;
            let status = if outcome.succeeded { "succeeded" } else { "failed" };
            self.storage
                .update_transaction_status(
                    transaction_id,
                    status,
                    outcome.provider_reference.as_deref(),
                )
                .await?;
        }
        Ok(())
    }
}
