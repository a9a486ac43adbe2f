use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "usage_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub api_key_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub model_id: Option<Uuid>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub latency_ms: i64,
    pub status_code: i32,
    /// No pricing model; persisted as zero unless populated externally.
    pub cost: f64,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "api_key_id", to = "id", on_delete = "SetNull")]
    pub api_key: HasOne<super::api_keys::Entity>,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "SetNull")]
    pub provider: HasOne<super::providers::Entity>,
    #[sea_orm(belongs_to, from = "model_id", to = "id", on_delete = "SetNull")]
    pub used_model: HasOne<super::models::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
