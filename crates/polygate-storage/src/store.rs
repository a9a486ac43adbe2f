#![allow(clippy::needless_update)]

use std::collections::HashMap;

use sea_orm::{
    ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("row not found")]
    NotFound,
}

#[derive(Debug, Clone)]
pub struct NewProvider {
    pub name: String,
    pub kind: String,
    pub base_url: String,
    pub auth_kind: String,
    pub encrypted_credentials: Option<String>,
    pub timeout_ms: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewModel {
    pub provider_id: Uuid,
    pub public_name: String,
    pub upstream_name: String,
    pub supports_streaming: bool,
    pub priority: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub label: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub rate_limit: i32,
    pub quota_limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewOAuthAccount {
    pub provider_id: Uuid,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: String,
    pub expires_at: OffsetDateTime,
    pub email: Option<String>,
}

/// Health score persisted for a freshly added account.
pub const INITIAL_HEALTH_SCORE: i32 = 70;

/// One entry of a public model's fallback chain: the model row stitched
/// with its active provider.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub model: entities::models::Model,
    pub provider: entities::providers::Model,
}

#[derive(Debug, Clone)]
pub struct UsageRow {
    pub api_key_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub model_id: Option<Uuid>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub latency_ms: i64,
    pub status_code: i32,
}

#[derive(Clone)]
pub struct GatewayStore {
    db: DatabaseConnection,
}

impl GatewayStore {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = Database::connect(database_url).await?;
        // Sqlite needs this for cascade / set-null to fire.
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Entity-first schema sync; run once at bootstrap.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Providers)
            .register(entities::Models)
            .register(entities::ApiKeys)
            .register(entities::OAuthAccounts)
            .register(entities::UsageLogs)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    pub async fn health(&self) -> StorageResult<()> {
        entities::Providers::find()
            .order_by_asc(entities::providers::Column::CreatedAt)
            .one(&self.db)
            .await?;
        Ok(())
    }

    // ---- providers ----

    pub async fn insert_provider(
        &self,
        input: NewProvider,
    ) -> StorageResult<entities::providers::Model> {
        let id = Uuid::new_v4();
        let active = entities::providers::ActiveModel {
            id: ActiveValue::Set(id),
            name: ActiveValue::Set(input.name),
            kind: ActiveValue::Set(input.kind),
            base_url: ActiveValue::Set(input.base_url),
            auth_kind: ActiveValue::Set(input.auth_kind),
            encrypted_credentials: ActiveValue::Set(input.encrypted_credentials),
            timeout_ms: ActiveValue::Set(input.timeout_ms),
            is_active: ActiveValue::Set(input.is_active),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Providers::insert(active).exec(&self.db).await?;
        self.require_provider(id).await
    }

    async fn require_provider(&self, id: Uuid) -> StorageResult<entities::providers::Model> {
        entities::Providers::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)
    }

    pub async fn list_providers(&self) -> StorageResult<Vec<entities::providers::Model>> {
        Ok(entities::Providers::find()
            .order_by_asc(entities::providers::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    pub async fn set_provider_active(&self, id: Uuid, is_active: bool) -> StorageResult<()> {
        let active = entities::providers::ActiveModel {
            id: ActiveValue::Set(id),
            is_active: ActiveValue::Set(is_active),
            ..Default::default()
        };
        entities::Providers::update(active).exec(&self.db).await?;
        Ok(())
    }

    pub async fn delete_provider(&self, id: Uuid) -> StorageResult<()> {
        entities::Providers::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    // ---- models ----

    pub async fn insert_model(&self, input: NewModel) -> StorageResult<entities::models::Model> {
        let id = Uuid::new_v4();
        let active = entities::models::ActiveModel {
            id: ActiveValue::Set(id),
            provider_id: ActiveValue::Set(input.provider_id),
            public_name: ActiveValue::Set(input.public_name),
            upstream_name: ActiveValue::Set(input.upstream_name),
            supports_streaming: ActiveValue::Set(input.supports_streaming),
            priority: ActiveValue::Set(input.priority),
            is_active: ActiveValue::Set(input.is_active),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Models::insert(active).exec(&self.db).await?;
        entities::Models::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)
    }

    pub async fn delete_model(&self, id: Uuid) -> StorageResult<()> {
        entities::Models::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    /// Active models stitched with their active providers, for `/v1/models`.
    pub async fn list_active_models(
        &self,
    ) -> StorageResult<Vec<(entities::models::Model, entities::providers::Model)>> {
        let models = entities::Models::find()
            .filter(entities::models::Column::IsActive.eq(true))
            .order_by_asc(entities::models::Column::PublicName)
            .all(&self.db)
            .await?;
        let providers = self.providers_by_id(models.iter().map(|m| m.provider_id)).await?;
        Ok(models
            .into_iter()
            .filter_map(|model| {
                providers
                    .get(&model.provider_id)
                    .filter(|provider| provider.is_active)
                    .cloned()
                    .map(|provider| (model, provider))
            })
            .collect())
    }

    /// The fallback chain for a public model name: both sides active,
    /// ascending priority, capped at 5.
    pub async fn route_candidates(&self, public_name: &str) -> StorageResult<Vec<RouteCandidate>> {
        let models = entities::Models::find()
            .filter(entities::models::Column::PublicName.eq(public_name))
            .filter(entities::models::Column::IsActive.eq(true))
            .order_by_asc(entities::models::Column::Priority)
            .limit(5)
            .all(&self.db)
            .await?;
        let providers = self.providers_by_id(models.iter().map(|m| m.provider_id)).await?;
        Ok(models
            .into_iter()
            .filter_map(|model| {
                providers
                    .get(&model.provider_id)
                    .filter(|provider| provider.is_active)
                    .cloned()
                    .map(|provider| RouteCandidate { model, provider })
            })
            .collect())
    }

    async fn providers_by_id(
        &self,
        ids: impl Iterator<Item = Uuid>,
    ) -> StorageResult<HashMap<Uuid, entities::providers::Model>> {
        let ids: Vec<Uuid> = ids.collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = entities::Providers::find()
            .filter(entities::providers::Column::Id.is_in(ids))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|row| (row.id, row)).collect())
    }

    // ---- api keys ----

    pub async fn insert_api_key(
        &self,
        input: NewApiKey,
    ) -> StorageResult<entities::api_keys::Model> {
        let id = Uuid::new_v4();
        let active = entities::api_keys::ActiveModel {
            id: ActiveValue::Set(id),
            label: ActiveValue::Set(input.label),
            key_hash: ActiveValue::Set(input.key_hash),
            key_prefix: ActiveValue::Set(input.key_prefix),
            rate_limit: ActiveValue::Set(input.rate_limit),
            quota_limit: ActiveValue::Set(input.quota_limit),
            is_active: ActiveValue::Set(true),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::ApiKeys::insert(active).exec(&self.db).await?;
        entities::ApiKeys::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)
    }

    pub async fn find_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> StorageResult<Option<entities::api_keys::Model>> {
        Ok(entities::ApiKeys::find()
            .filter(entities::api_keys::Column::KeyHash.eq(key_hash))
            .one(&self.db)
            .await?)
    }

    pub async fn set_api_key_active(&self, id: Uuid, is_active: bool) -> StorageResult<()> {
        let active = entities::api_keys::ActiveModel {
            id: ActiveValue::Set(id),
            is_active: ActiveValue::Set(is_active),
            ..Default::default()
        };
        entities::ApiKeys::update(active).exec(&self.db).await?;
        Ok(())
    }

    pub async fn delete_api_key(&self, id: Uuid) -> StorageResult<()> {
        entities::ApiKeys::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    // ---- oauth accounts ----

    pub async fn insert_oauth_account(
        &self,
        input: NewOAuthAccount,
    ) -> StorageResult<entities::oauth_accounts::Model> {
        let id = Uuid::new_v4();
        let active = entities::oauth_accounts::ActiveModel {
            id: ActiveValue::Set(id),
            provider_id: ActiveValue::Set(input.provider_id),
            encrypted_access_token: ActiveValue::Set(input.encrypted_access_token),
            encrypted_refresh_token: ActiveValue::Set(input.encrypted_refresh_token),
            expires_at: ActiveValue::Set(input.expires_at),
            email: ActiveValue::Set(input.email),
            health_score: ActiveValue::Set(INITIAL_HEALTH_SCORE),
            last_used_at: ActiveValue::Set(None),
            is_active: ActiveValue::Set(true),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::OAuthAccounts::insert(active).exec(&self.db).await?;
        self.require_oauth_account(id).await
    }

    async fn require_oauth_account(
        &self,
        id: Uuid,
    ) -> StorageResult<entities::oauth_accounts::Model> {
        entities::OAuthAccounts::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)
    }

    /// Active accounts for a provider, least-recently-used first.
    /// Never-used rows sort ahead of every used row regardless of the
    /// backend's null ordering.
    pub async fn oauth_accounts_for_provider(
        &self,
        provider_id: Uuid,
    ) -> StorageResult<Vec<entities::oauth_accounts::Model>> {
        let mut rows = entities::OAuthAccounts::find()
            .filter(entities::oauth_accounts::Column::ProviderId.eq(provider_id))
            .filter(entities::oauth_accounts::Column::IsActive.eq(true))
            .order_by_asc(entities::oauth_accounts::Column::LastUsedAt)
            .all(&self.db)
            .await?;
        rows.sort_by_key(|row| row.last_used_at);
        Ok(rows)
    }

    pub async fn find_oauth_account(
        &self,
        id: Uuid,
    ) -> StorageResult<Option<entities::oauth_accounts::Model>> {
        Ok(entities::OAuthAccounts::find_by_id(id).one(&self.db).await?)
    }

    pub async fn update_oauth_tokens(
        &self,
        id: Uuid,
        encrypted_access_token: String,
        encrypted_refresh_token: Option<String>,
        expires_at: OffsetDateTime,
    ) -> StorageResult<entities::oauth_accounts::Model> {
        let mut active = entities::oauth_accounts::ActiveModel {
            id: ActiveValue::Set(id),
            encrypted_access_token: ActiveValue::Set(encrypted_access_token),
            expires_at: ActiveValue::Set(expires_at),
            ..Default::default()
        };
        if let Some(refresh) = encrypted_refresh_token {
            active.encrypted_refresh_token = ActiveValue::Set(refresh);
        }
        entities::OAuthAccounts::update(active).exec(&self.db).await?;
        self.require_oauth_account(id).await
    }

    pub async fn touch_oauth_last_used(&self, id: Uuid, at: OffsetDateTime) -> StorageResult<()> {
        let active = entities::oauth_accounts::ActiveModel {
            id: ActiveValue::Set(id),
            last_used_at: ActiveValue::Set(Some(at)),
            ..Default::default()
        };
        entities::OAuthAccounts::update(active).exec(&self.db).await?;
        Ok(())
    }

    pub async fn set_oauth_account_active(&self, id: Uuid, is_active: bool) -> StorageResult<()> {
        let active = entities::oauth_accounts::ActiveModel {
            id: ActiveValue::Set(id),
            is_active: ActiveValue::Set(is_active),
            ..Default::default()
        };
        entities::OAuthAccounts::update(active).exec(&self.db).await?;
        Ok(())
    }

    // ---- usage logs ----

    pub async fn insert_usage(&self, row: UsageRow) -> StorageResult<()> {
        let active = entities::usage_logs::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            api_key_id: ActiveValue::Set(row.api_key_id),
            provider_id: ActiveValue::Set(row.provider_id),
            model_id: ActiveValue::Set(row.model_id),
            input_tokens: ActiveValue::Set(row.input_tokens),
            output_tokens: ActiveValue::Set(row.output_tokens),
            latency_ms: ActiveValue::Set(row.latency_ms),
            status_code: ActiveValue::Set(row.status_code),
            cost: ActiveValue::Set(0.0),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::UsageLogs::insert(active).exec(&self.db).await?;
        Ok(())
    }

    pub async fn list_usage(&self, limit: u64) -> StorageResult<Vec<entities::usage_logs::Model>> {
        Ok(entities::UsageLogs::find()
            .order_by_desc(entities::usage_logs::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }
}
