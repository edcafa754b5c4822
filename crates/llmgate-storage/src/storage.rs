//! The `Storage` trait is the gateway's only seam onto the relational
//! store (§3). Request-plane reads (auth, routing, rate-limit context) and
//! usage-plane writes (credit batching, minute history, backfill) all go
//! through it so `llmgate-core`/`llmgate-router`/`llmgate-usage` never touch
//! `sea_orm` directly.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use llmgate_common::GlobalConfig;

use crate::snapshot::GlobalConfigRow;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// §3 `IamRule`, flattened for the router's evaluation loop.
#[derive(Debug, Clone)]
pub struct IamRuleRow {
    pub id: i64,
    pub rule_type: String,
    pub rule_value: serde_json::Value,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ApiKeyRow {
    pub id: i64,
    pub project_id: i64,
    pub masked_token: String,
    pub status: String,
    pub usage: Decimal,
    pub usage_limit: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: i64,
    pub organization_id: i64,
    pub mode: String,
}

#[derive(Debug, Clone)]
pub struct OrganizationRow {
    pub id: i64,
    pub credits: Decimal,
    pub plan: String,
    pub retention_level: String,
    pub status: String,
    pub auto_topup_enabled: bool,
    pub auto_topup_threshold: Option<Decimal>,
}

/// §4.E step 1: "resolve ApiKey + Organization + Project (single DB
/// roundtrip with joins)" plus the IAM rules the router needs next.
#[derive(Debug, Clone)]
pub struct ResolvedApiKey {
    pub api_key: ApiKeyRow,
    pub project: ProjectRow,
    pub organization: OrganizationRow,
    pub iam_rules: Vec<IamRuleRow>,
}

/// §3 `LogRecord`, as handed to `insert_logs_batch` by the usage worker's
/// queue-drain loop. Mirrors the `logs` entity; kept separate so callers
/// don't need `sea_orm::ActiveValue` wrapping. `Serialize`/`Deserialize`
/// because this is exactly what crosses the `LOG_QUEUE` KV list as JSON
/// (§4.E step 7, §4.F "Queue drain").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLogRecord {
    pub request_id: String,
    pub organization_id: i64,
    pub project_id: i64,
    pub api_key_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub duration_ms: i64,
    pub requested_model: String,
    pub requested_provider: Option<String>,
    pub used_model: String,
    pub used_provider: String,
    pub mode: String,
    pub used_mode: String,
    pub cached: bool,
    pub cost: Option<Decimal>,
    pub input_cost: Option<Decimal>,
    pub output_cost: Option<Decimal>,
    pub request_cost: Option<Decimal>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
    pub cached_tokens: Option<i64>,
    pub has_error: bool,
    pub unified_finish_reason: String,
    pub response_size: i64,
    pub time_to_first_token: Option<i64>,
    pub time_to_first_reasoning_token: Option<i64>,
    pub messages: Option<serde_json::Value>,
    pub content: Option<String>,
    pub custom_headers: Option<serde_json::Value>,
    pub error_details: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreditBatchOutcome {
    /// `None` when the advisory lock was already held elsewhere (§4.F step 2).
    pub processed_logs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LogQueryFilter {
    pub project_id: Option<i64>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub unified_finish_reason: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// §6 `/logs` `customHeaderKey`/`customHeaderValue`: matched together
    /// against `log.custom_headers`, a JSON object keyed by header name.
    pub custom_header_key: Option<String>,
    pub custom_header_value: Option<String>,
    pub cursor: Option<i64>,
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct LogSummaryRow {
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub requested_model: String,
    pub used_model: String,
    pub used_provider: String,
    pub unified_finish_reason: String,
    pub cost: Option<Decimal>,
    pub total_tokens: Option<i64>,
    pub has_error: bool,
}

#[derive(Debug, Clone)]
pub struct LogQueryResult {
    pub rows: Vec<LogSummaryRow>,
    pub next_cursor: Option<i64>,
    pub has_more: bool,
}

/// §6 `GET /activity?days={7|30}` daily bucket.
#[derive(Debug, Clone)]
pub struct ActivityBucket {
    pub day: OffsetDateTime,
    pub requests: i64,
    pub errors: i64,
    pub total_tokens: i64,
    pub cost: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrgTopupCandidate {
    pub organization_id: i64,
    pub credits: Decimal,
    pub threshold: Decimal,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync (SeaORM 2.0). Enabled by default at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>>;
    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()>;

    /// §3 `Lock`: generic advisory mutex, 5-minute TTL. `process_pending_logs`
    /// uses this internally under the `credit_processing` key; callers with
    /// their own coarse critical sections (e.g. `llmgate-usage`'s auto
    /// top-up probe under `auto_topup_check`) can take the same primitive.
    async fn try_acquire_lock(&self, key: &str) -> StorageResult<bool>;
    async fn release_lock(&self, key: &str) -> StorageResult<()>;

    /// §4.E step 1.
    async fn resolve_api_key(&self, token: &str) -> StorageResult<Option<ResolvedApiKey>>;

    /// §4.F "Queue drain": one `INSERT … VALUES (…)` per batch. Callers have
    /// already stripped `messages`/`content` for `retentionLevel=="none"` orgs.
    async fn insert_logs_batch(&self, logs: Vec<NewLogRecord>) -> StorageResult<()>;

    /// §4.F "Batch credit processing". Acquires the `credit_processing`
    /// advisory lock, runs the whole `FOR UPDATE SKIP LOCKED` transaction,
    /// and releases the lock, returning `None` for `processed_logs` if the
    /// lock was already held.
    async fn process_pending_logs(&self, batch_size: u64) -> StorageResult<CreditBatchOutcome>;

    /// §4.G: highest `minuteTimestamp` across both history tables, or `None`
    /// if no history rows exist yet (drives the backfill decision).
    async fn minute_history_high_watermark(&self) -> StorageResult<Option<OffsetDateTime>>;

    /// §4.G "Minute history": upserts one row per `(model, provider)` mapping
    /// and one per model, including zero-activity ones, for the given
    /// minute-aligned timestamp.
    async fn write_minute_bucket(
        &self,
        minute: OffsetDateTime,
        mappings: &[(String, String)],
        models: &[String],
    ) -> StorageResult<()>;

    /// §4.G "Aggregated stats": 5-minute rollup into `catalog_stats`.
    async fn rollup_five_minutes(&self, as_of: OffsetDateTime) -> StorageResult<()>;

    /// §4.F "Auto top-up probe": organizations with auto-topup enabled whose
    /// credits have fallen below their threshold.
    async fn organizations_needing_topup(&self) -> StorageResult<Vec<OrgTopupCandidate>>;
    async fn has_recent_transaction(
        &self,
        organization_id: i64,
        since: OffsetDateTime,
    ) -> StorageResult<bool>;
    async fn create_pending_transaction(
        &self,
        organization_id: i64,
        amount: Decimal,
    ) -> StorageResult<i64>;
    async fn update_transaction_status(
        &self,
        transaction_id: i64,
        status: &str,
        provider_reference: Option<&str>,
    ) -> StorageResult<()>;

    async fn query_logs(&self, filter: LogQueryFilter) -> StorageResult<LogQueryResult>;
    async fn activity_daily(
        &self,
        project_id: i64,
        days: u32,
    ) -> StorageResult<Vec<ActivityBucket>>;

    /// `POST /keys/api`.
    async fn create_api_key(
        &self,
        project_id: i64,
        token: &str,
        masked_token: &str,
        usage_limit: Option<Decimal>,
    ) -> StorageResult<ApiKeyRow>;
    /// `GET /keys/api`.
    async fn list_api_keys(&self, project_id: i64) -> StorageResult<Vec<ApiKeyRow>>;
    /// `PATCH /keys/api/{id}`.
    async fn update_api_key_status(
        &self,
        id: i64,
        status: &str,
    ) -> StorageResult<Option<ApiKeyRow>>;
    /// `DELETE /keys/api/{id}`: soft delete, `status="deleted"`.
    async fn delete_api_key(&self, id: i64) -> StorageResult<bool>;
    /// `PATCH /keys/api/limit/{id}`.
    async fn set_api_key_limit(
        &self,
        id: i64,
        usage_limit: Option<Decimal>,
    ) -> StorageResult<Option<ApiKeyRow>>;

    /// `POST /keys/api/{id}/iam`.
    async fn create_iam_rule(
        &self,
        api_key_id: i64,
        rule_type: &str,
        rule_value: serde_json::Value,
    ) -> StorageResult<IamRuleRow>;
    /// `GET /keys/api/{id}/iam`.
    async fn list_iam_rules(&self, api_key_id: i64) -> StorageResult<Vec<IamRuleRow>>;
    /// `PATCH /keys/api/{id}/iam/{ruleId}`.
    async fn update_iam_rule(
        &self,
        id: i64,
        status: Option<&str>,
        rule_value: Option<serde_json::Value>,
    ) -> StorageResult<Option<IamRuleRow>>;
    /// `DELETE /keys/api/{id}/iam/{ruleId}`.
    async fn delete_iam_rule(&self, id: i64) -> StorageResult<bool>;
}

/// §6 "Provider credentials are injected via per-organization `providerKey`
/// records... the router obtains them through a `CredentialStore` interface
/// with `get(orgId, providerId) -> token?`". Kept separate from [`Storage`]
/// so `llmgate-router` can depend on the narrower seam.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, organization_id: i64, provider_id: &str)
    -> StorageResult<Option<String>>;
}
