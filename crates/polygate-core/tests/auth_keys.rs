use uuid::Uuid;

use polygate_core::{ApiKeyAuthenticator, ApiKeyMaterial};
use polygate_storage::{GatewayStore, NewApiKey};

async fn scratch_store() -> GatewayStore {
    let path = std::env::temp_dir().join(format!("polygate-auth-{}.db", Uuid::new_v4()));
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let store = GatewayStore::connect(&url).await.expect("connect");
    store.sync().await.expect("schema sync");
    store
}

#[tokio::test]
async fn generated_key_validates_and_near_misses_do_not() {
    let store = scratch_store().await;
    let material = ApiKeyMaterial::generate();
    let row = store
        .insert_api_key(NewApiKey {
            label: "ci".to_string(),
            key_hash: material.key_hash.clone(),
            key_prefix: material.key_prefix.clone(),
            rate_limit: 60,
            quota_limit: None,
        })
        .await
        .unwrap();

    let authenticator = ApiKeyAuthenticator::new(store.clone());

    let found = authenticator.validate(&material.raw).await.expect("valid key");
    assert_eq!(found.id, row.id);
    assert_eq!(found.key_prefix, material.key_prefix);

    assert!(authenticator.validate(&format!("{}x", material.raw)).await.is_none());
    assert!(authenticator.validate("sk-gw-0000").await.is_none());

    store.set_api_key_active(row.id, false).await.unwrap();
    assert!(authenticator.validate(&material.raw).await.is_none());
}
