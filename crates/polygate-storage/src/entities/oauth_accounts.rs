use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub provider_id: Uuid,
    pub encrypted_access_token: String,
    /// Google rows may carry an embedded `|<projectId>` suffix.
    pub encrypted_refresh_token: String,
    /// Absolute wall-clock expiry of the sealed access token.
    pub expires_at: OffsetDateTime,
    pub email: Option<String>,
    pub health_score: i32,
    pub last_used_at: Option<OffsetDateTime>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
