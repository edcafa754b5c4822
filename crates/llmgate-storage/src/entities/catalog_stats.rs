//! **[ADDED]** (SPEC_FULL.md §4.A) Persisted read-cache for the static
//! catalog's denormalized stats counters, since the catalog itself is
//! compiled-in Rust data and has nowhere else to durably record
//! `statsUpdatedAt` (§4.G "Aggregated stats").

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "catalog_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// `provider` | `model` | `mapping`.
    pub scope: String,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub request_count_5m: i64,
    pub error_count_5m: i64,
    pub avg_duration_ms_5m: i64,
    pub stats_updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
