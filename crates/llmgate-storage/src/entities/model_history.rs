//! §3 `MinuteBucket` (per-model table, aggregated over all of a model's
//! providers). Same idempotent-upsert and cached-token-exclusion rules as
//! [`super::model_provider_mapping_history`] (§4.G).

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub model_id: String,
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
    pub duration_sum: i64,
    pub time_to_first_token_sum: i64,
}

impl ActiveModelBehavior for ActiveModel {}
