//! §3 `LogRecord`. `processed_at` transitions exactly once from `NULL` to a
//! wall-clock time, under row lock (`FOR UPDATE SKIP LOCKED` in
//! `llmgate-usage`'s batch-processing transaction).

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub request_id: String,
    pub organization_id: i64,
    pub project_id: i64,
    pub api_key_id: i64,
    pub created_at: OffsetDateTime,
    /// Milliseconds.
    pub duration: i64,
    pub requested_model: String,
    pub requested_provider: Option<String>,
    pub used_model: String,
    pub used_provider: String,
    /// Project mode at request time: `api-keys` | `credits` | `hybrid`.
    pub mode: String,
    /// Which ledger the cost was actually attributed to: `api-keys` | `credits`.
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
    /// Milliseconds from request start to first content byte.
    pub time_to_first_token: Option<i64>,
    pub time_to_first_reasoning_token: Option<i64>,
    /// Stripped to `NULL` on insert when `organization.retentionLevel=="none"`.
    pub messages: Option<Json>,
    pub content: Option<String>,
    pub custom_headers: Option<Json>,
    pub error_details: Option<String>,
    pub processed_at: Option<OffsetDateTime>,
}

impl ActiveModelBehavior for ActiveModel {}
