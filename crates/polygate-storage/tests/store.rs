use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use polygate_storage::{
    GatewayStore, NewApiKey, NewModel, NewOAuthAccount, NewProvider, UsageRow,
};

async fn scratch_store() -> GatewayStore {
    let path = std::env::temp_dir().join(format!("polygate-test-{}.db", Uuid::new_v4()));
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let store = GatewayStore::connect(&url).await.expect("connect");
    store.sync().await.expect("schema sync");
    store
}

fn provider_input(name: &str, active: bool) -> NewProvider {
    NewProvider {
        name: name.to_string(),
        kind: "openai".to_string(),
        base_url: "https://api.openai.com".to_string(),
        auth_kind: "bearer".to_string(),
        encrypted_credentials: Some("sealed".to_string()),
        timeout_ms: 30_000,
        is_active: active,
    }
}

fn model_input(provider_id: Uuid, public: &str, priority: i32, active: bool) -> NewModel {
    NewModel {
        provider_id,
        public_name: public.to_string(),
        upstream_name: format!("{public}-upstream"),
        supports_streaming: true,
        priority,
        is_active: active,
    }
}

#[tokio::test]
async fn route_candidates_order_and_cap() {
    let store = scratch_store().await;
    let provider = store.insert_provider(provider_input("openai", true)).await.unwrap();

    for priority in [4, 0, 2, 6, 1, 3, 5] {
        store
            .insert_model(model_input(provider.id, "gpt-4o", priority, true))
            .await
            .unwrap();
    }
    store
        .insert_model(model_input(provider.id, "gpt-4o", -1, false))
        .await
        .unwrap();

    let chain = store.route_candidates("gpt-4o").await.unwrap();
    assert_eq!(chain.len(), 5);
    let priorities: Vec<i32> = chain.iter().map(|c| c.model.priority).collect();
    assert_eq!(priorities, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn route_candidates_skip_inactive_provider() {
    let store = scratch_store().await;
    let active = store.insert_provider(provider_input("up", true)).await.unwrap();
    let inactive = store.insert_provider(provider_input("down", false)).await.unwrap();

    store
        .insert_model(model_input(inactive.id, "shared", 0, true))
        .await
        .unwrap();
    store
        .insert_model(model_input(active.id, "shared", 1, true))
        .await
        .unwrap();

    let chain = store.route_candidates("shared").await.unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].provider.id, active.id);

    assert!(store.route_candidates("missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn api_key_lookup_by_hash() {
    let store = scratch_store().await;
    let key = store
        .insert_api_key(NewApiKey {
            label: "ci".to_string(),
            key_hash: "abc123".to_string(),
            key_prefix: "sk-gw-abc12…".to_string(),
            rate_limit: 60,
            quota_limit: None,
        })
        .await
        .unwrap();

    let found = store.find_api_key_by_hash("abc123").await.unwrap().unwrap();
    assert_eq!(found.id, key.id);
    assert!(found.is_active);
    assert!(store.find_api_key_by_hash("other").await.unwrap().is_none());
}

#[tokio::test]
async fn oauth_accounts_least_recently_used_first() {
    let store = scratch_store().await;
    let provider = store.insert_provider(provider_input("oauth", true)).await.unwrap();
    let now = OffsetDateTime::now_utc();

    let fresh = store
        .insert_oauth_account(account_input(provider.id, now))
        .await
        .unwrap();
    let stale = store
        .insert_oauth_account(account_input(provider.id, now))
        .await
        .unwrap();
    let never = store
        .insert_oauth_account(account_input(provider.id, now))
        .await
        .unwrap();
    let disabled = store
        .insert_oauth_account(account_input(provider.id, now))
        .await
        .unwrap();

    store.touch_oauth_last_used(fresh.id, now).await.unwrap();
    store
        .touch_oauth_last_used(stale.id, now - Duration::minutes(30))
        .await
        .unwrap();
    store.set_oauth_account_active(disabled.id, false).await.unwrap();

    let rows = store.oauth_accounts_for_provider(provider.id).await.unwrap();
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    assert_eq!(ids, vec![never.id, stale.id, fresh.id]);
}

#[tokio::test]
async fn update_oauth_tokens_retains_refresh_when_absent() {
    let store = scratch_store().await;
    let provider = store.insert_provider(provider_input("oauth", true)).await.unwrap();
    let now = OffsetDateTime::now_utc();
    let account = store
        .insert_oauth_account(account_input(provider.id, now))
        .await
        .unwrap();

    let later = now + Duration::hours(1);
    let updated = store
        .update_oauth_tokens(account.id, "sealed-a2".to_string(), None, later)
        .await
        .unwrap();
    assert_eq!(updated.encrypted_access_token, "sealed-a2");
    assert_eq!(updated.encrypted_refresh_token, account.encrypted_refresh_token);

    let updated = store
        .update_oauth_tokens(account.id, "sealed-a3".to_string(), Some("sealed-r2".to_string()), later)
        .await
        .unwrap();
    assert_eq!(updated.encrypted_refresh_token, "sealed-r2");
}

#[tokio::test]
async fn provider_delete_cascades_and_usage_links_null() {
    let store = scratch_store().await;
    let provider = store.insert_provider(provider_input("doomed", true)).await.unwrap();
    let model = store
        .insert_model(model_input(provider.id, "doomed-model", 0, true))
        .await
        .unwrap();
    store
        .insert_oauth_account(account_input(provider.id, OffsetDateTime::now_utc()))
        .await
        .unwrap();

    store
        .insert_usage(UsageRow {
            api_key_id: None,
            provider_id: Some(provider.id),
            model_id: Some(model.id),
            input_tokens: 3,
            output_tokens: 5,
            latency_ms: 12,
            status_code: 200,
        })
        .await
        .unwrap();

    store.delete_provider(provider.id).await.unwrap();

    assert!(store.route_candidates("doomed-model").await.unwrap().is_empty());
    assert!(store
        .oauth_accounts_for_provider(provider.id)
        .await
        .unwrap()
        .is_empty());

    let logs = store.list_usage(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].provider_id, None);
    assert_eq!(logs[0].model_id, None);
    assert_eq!(logs[0].input_tokens, 3);
    assert_eq!(logs[0].cost, 0.0);
}

fn account_input(provider_id: Uuid, now: OffsetDateTime) -> NewOAuthAccount {
    NewOAuthAccount {
        provider_id,
        encrypted_access_token: "sealed-access".to_string(),
        encrypted_refresh_token: "sealed-refresh".to_string(),
        expires_at: now + Duration::hours(1),
        email: None,
    }
}
