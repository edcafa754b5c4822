//! §3 `MinuteBucket` (per-mapping table). Token sums exclude rows where
//! `cached=true`; `logs_count`/`cached_count` include them (§4.G). Upsert is
//! idempotent on `(model_id, provider_id, minute_timestamp)`.

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_provider_mapping_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub model_id: String,
    pub provider_id: String,
    pub minute_timestamp: OffsetDateTime,
    pub logs_count: i64,
    pub errors_count: i64,
    pub client_errors_count: i64,
    pub gateway_errors_count: i64,
    pub upstream_errors_count: i64,
    pub cached_count: i64,
    pub prompt_tokens_sum: i64,
    pub completion_tokens_sum: i64,
    pub total_tokens_sum: i64,
    pub reasoning_tokens_sum: i64,
    /// Milliseconds.
    pub duration_sum: i64,
    pub time_to_first_token_sum: i64,
}

impl ActiveModelBehavior for ActiveModel {}
