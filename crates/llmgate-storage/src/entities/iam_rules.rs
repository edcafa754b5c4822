//! §3 `IamRule`, one per `ApiKey`. `rule_value` holds whichever of
//! `models`/`providers`/`pricing_type`/`max_input_price`/`max_output_price`
//! the `rule_type` needs — modeled as JSON rather than one column per shape
//! since only one rule type is ever active per row (§4.C).

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "iam_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub api_key_id: i64,
    /// `allow_models` | `deny_models` | `allow_providers` | `deny_providers`
    /// | `allow_pricing` | `deny_pricing`.
    pub rule_type: String,
    pub rule_value: Json,
    /// `active` | `inactive`.
    pub status: String,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "api_key_id", to = "id", on_delete = "Cascade")]
    pub api_key: HasOne<super::api_keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
