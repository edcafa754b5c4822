//! §4.G `StatsCalculator`: minute-history rollups plus the aggregated
//! 5-minute stats that feed the catalog's denormalized counters, with a
//! bounded backfill on startup.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};

use llmgate_catalog::ProviderRegistry;
use llmgate_storage::{Storage, StorageResult};

const MAX_BACKFILL_ITERATIONS: u64 = 1440;

pub struct StatsCalculator {
    storage: Arc<dyn Storage>,
    registry: Arc<ProviderRegistry>,
    /// `BACKFILL_DURATION_SECONDS`, default 300.
    backfill_duration_seconds: u64,
}

impl StatsCalculator {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<ProviderRegistry>,
        backfill_duration_seconds: u64,
    ) -> Self {
        Self {
            storage,
            registry,
            backfill_duration_seconds,
        }
    }

    /// Runs forever: backfills once, then rolls up at every minute boundary
    /// (plus a 5-minute aggregate every fifth one). Intended to be spawned
    /// as its own background task alongside [`crate::worker::UsageWorker`].
    pub async fn run(self: Arc<Self>) {
        if let Err(err) = self.backfill_on_startup().await {
            tracing::error!(error = %err, "minute-history backfill failed");
        }

        loop {
            let now = OffsetDateTime::now_utc();
            tokio::time::sleep(sleep_duration_until_next_minute(now)).await;

            let boundary = floor_to_minute(OffsetDateTime::now_utc());
            let previous_minute = boundary - Duration::minutes(1);

            if let Err(err) = self.write_bucket(previous_minute).await {
                tracing::error!(error = %err, "minute-history upsert failed");
            }

            if boundary.minute() % 5 == 0
                && let Err(err) = self.storage.rollup_five_minutes(boundary).await
            {
                tracing::error!(error = %err, "5-minute rollup failed");
            }
        }
    }

    async fn write_bucket(&self, minute: OffsetDateTime) -> StorageResult<()> {
        let mappings = self.active_mappings();
        let models = self.active_models();
        self.storage.write_minute_bucket(minute, &mappings, &models).await
    }

    fn active_mappings(&self) -> Vec<(String, String)> {
        self.registry
            .models()
            .filter(|m| !m.is_deprecated())
            .flat_map(|m| {
                m.providers
                    .iter()
                    .map(move |p| (m.id.clone(), p.provider_id.clone()))
            })
            .collect()
    }

    fn active_models(&self) -> Vec<String> {
        self.registry
            .models()
            .filter(|m| !m.is_deprecated())
            .map(|m| m.id.clone())
            .collect()
    }

    /// §4.G "Backfill on startup": bounded by `min(ceil(duration/60), 1440)`.
    async fn backfill_on_startup(&self) -> StorageResult<()> {
        let previous_minute = floor_to_minute(OffsetDateTime::now_utc()) - Duration::minutes(1);
        let watermark = self.storage.minute_history_high_watermark().await?;

        let (start, max_iterations) = match watermark {
            None => {
                let span = Duration::seconds(self.backfill_duration_seconds as i64);
                let start = previous_minute - span + Duration::minutes(1);
                (start, iterations_for(span))
            }
            Some(last) => {
                let gap = previous_minute - last;
                if gap <= Duration::minutes(2) {
                    return Ok(());
                }
                (last + Duration::minutes(1), iterations_for(gap))
            }
        };

        let mappings = self.active_mappings();
        let models = self.active_models();
        let mut minute = start;
        let mut iterations = 0u64;

        while minute <= previous_minute && iterations < max_iterations {
            self.storage
                .write_minute_bucket(minute, &mappings, &models)
                .await?;
            let next = minute + Duration::minutes(1);
            if next <= minute {
                // Hard break: clock computation failed to advance.
                break;
            }
            minute = next;
            iterations += 1;
        }

        Ok(())
    }
}

fn iterations_for(span: Duration) -> u64 {
    let minutes = (span.whole_seconds().max(0) as f64 / 60.0).ceil() as u64;
    minutes.min(MAX_BACKFILL_ITERATIONS)
}

fn floor_to_minute(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_second(0)
        .and_then(|t| t.replace_nanosecond(0))
        .unwrap_or(t)
}

/// Sleeps to :00 of the next minute plus a ~50ms buffer (§4.G).
fn sleep_duration_until_next_minute(now: OffsetDateTime) -> StdDuration {
    let next = floor_to_minute(now) + Duration::minutes(1) + Duration::milliseconds(50);
    let delta = (next - now).whole_milliseconds().max(0);
    StdDuration::from_millis(delta as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterations_for_caps_at_1440() {
        assert_eq!(iterations_for(Duration::seconds(300)), 5);
        assert_eq!(iterations_for(Duration::days(10)), MAX_BACKFILL_ITERATIONS);
    }
}
