//! §3 `ApiKey`. `usage` is monotonically non-decreasing (only the usage
//! worker's batch-processing transaction writes it); once `status=deleted`
//! the key must not authenticate, enforced by the caller's `AuthProvider`.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub project_id: i64,
    #[sea_orm(unique_key = "api_key_token")]
    pub token: String,
    pub masked_token: String,
    /// `active` | `inactive` | `deleted`.
    pub status: String,
    pub usage: Decimal,
    pub usage_limit: Option<Decimal>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "project_id", to = "id", on_delete = "Cascade")]
    pub project: HasOne<super::projects::Entity>,
    #[sea_orm(has_many)]
    pub iam_rules: HasMany<super::iam_rules::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
