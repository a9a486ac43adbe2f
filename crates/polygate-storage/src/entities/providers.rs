use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique_key = "provider_name")]
    pub name: String,
    /// openai | google | anthropic | oauth | custom
    pub kind: String,
    pub base_url: String,
    /// bearer | header | oauth | none
    pub auth_kind: String,
    pub encrypted_credentials: Option<String>,
    pub timeout_ms: i64,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub provider_models: HasMany<super::models::Entity>,
    #[sea_orm(has_many)]
    pub oauth_accounts: HasMany<super::oauth_accounts::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
