//! §4.F "Auto top-up probe" / §6 billing table. Out-of-scope payment
//! specifics stay behind `llmgate-usage::PaymentProvider`; this row only
//! tracks the gateway's own view of a top-up attempt.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub organization_id: i64,
    pub amount: Decimal,
    /// `pending` | `succeeded` | `failed`.
    pub status: String,
    /// `auto_topup` for now; left open for manual top-ups out of scope here.
    pub kind: String,
    pub provider_reference: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
