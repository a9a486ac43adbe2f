use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub label: String,
    /// SHA-256 hex of the raw key; the raw key is never stored.
    #[sea_orm(unique_key = "api_key_hash")]
    pub key_hash: String,
    pub key_prefix: String,
    /// Requests per minute.
    pub rate_limit: i32,
    pub quota_limit: Option<i64>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
