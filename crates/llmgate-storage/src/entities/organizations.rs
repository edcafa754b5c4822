//! §3 `Organization`. `credits` is monotonically non-increasing except via
//! an explicit top-up transaction — enforced by convention (only
//! `UsageWorker`'s batch-processing transaction and the top-up probe write
//! this column), not by a DB constraint.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub credits: Decimal,
    pub plan: String,
    pub retention_level: String,
    pub status: String,
    pub auto_topup_enabled: bool,
    pub auto_topup_threshold: Option<Decimal>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub projects: HasMany<super::projects::Entity>,
    #[sea_orm(has_many)]
    pub provider_keys: HasMany<super::provider_keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
