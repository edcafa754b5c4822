//! §6 "Provider credentials are injected via per-organization `providerKey`
//! records"; reached through [`crate::storage::CredentialStore`] rather than
//! depending on this entity directly. One row per `(organization, provider)`
//! pair.

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "provider_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "org_provider")]
    pub organization_id: i64,
    #[sea_orm(unique_key = "org_provider")]
    pub provider_id: String,
    pub token: String,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "organization_id", to = "id", on_delete = "Cascade")]
    pub organization: HasOne<super::organizations::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
