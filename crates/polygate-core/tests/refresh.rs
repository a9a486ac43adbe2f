use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::routing::post;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use polygate_common::{CredentialCipher, GatewayConfig, ProviderKind};
use polygate_core::TokenRefresher;
use polygate_storage::{GatewayStore, NewOAuthAccount, NewProvider};

const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

async fn scratch_store() -> GatewayStore {
    let path = std::env::temp_dir().join(format!("polygate-refresh-{}.db", Uuid::new_v4()));
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let store = GatewayStore::connect(&url).await.expect("connect");
    store.sync().await.expect("schema sync");
    store
}

#[derive(Clone)]
struct StubState {
    hits: Arc<AtomicUsize>,
    body: &'static str,
    status: u16,
}

async fn token_endpoint(State(state): State<StubState>, body: String) -> (axum::http::StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    // Both flows carry the grant type; shape differs (form vs json).
    assert!(body.contains("refresh_token"));
    (
        axum::http::StatusCode::from_u16(state.status).unwrap(),
        state.body.to_string(),
    )
}

async fn spawn_stub(state: StubState) -> String {
    let app = Router::new().route("/token", post(token_endpoint)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/token")
}

fn config_with_google_endpoint(url: String) -> GatewayConfig {
    let mut config = GatewayConfig::defaults("sqlite::memory:".to_string(), KEY_HEX.to_string());
    config.google_token_url = url;
    config.google_client_id = Some("client-id".to_string());
    config.google_client_secret = Some("client-secret".to_string());
    config
}

async fn expired_account(
    store: &GatewayStore,
    cipher: &CredentialCipher,
    refresh_plain: &str,
) -> polygate_storage::entities::oauth_accounts::Model {
    let provider = store
        .insert_provider(NewProvider {
            name: "google".to_string(),
            kind: "google".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            auth_kind: "oauth".to_string(),
            encrypted_credentials: None,
            timeout_ms: 30_000,
            is_active: true,
        })
        .await
        .unwrap();
    store
        .insert_oauth_account(NewOAuthAccount {
            provider_id: provider.id,
            encrypted_access_token: cipher.encrypt("A1").unwrap(),
            encrypted_refresh_token: cipher.encrypt(refresh_plain).unwrap(),
            expires_at: OffsetDateTime::now_utc() - Duration::seconds(1),
            email: Some("pool@example.com".to_string()),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn fresh_token_is_left_alone() {
    let store = scratch_store().await;
    let cipher = CredentialCipher::from_hex(KEY_HEX).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let url = spawn_stub(StubState {
        hits: Arc::clone(&hits),
        body: r#"{"access_token":"A2","expires_in":3600}"#,
        status: 200,
    })
    .await;

    let mut account = expired_account(&store, &cipher, "1//rt").await;
    account.expires_at = OffsetDateTime::now_utc() + Duration::hours(1);

    let refresher =
        TokenRefresher::new(store, cipher, &config_with_google_endpoint(url)).unwrap();
    let out = refresher
        .refresh_if_expired(account.clone(), ProviderKind::Google)
        .await
        .unwrap();
    assert_eq!(out.encrypted_access_token, account.encrypted_access_token);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expired_token_is_refreshed_and_persisted() {
    let store = scratch_store().await;
    let cipher = CredentialCipher::from_hex(KEY_HEX).unwrap();
    let url = spawn_stub(StubState {
        hits: Arc::new(AtomicUsize::new(0)),
        body: r#"{"access_token":"A2","expires_in":3600}"#,
        status: 200,
    })
    .await;

    let account = expired_account(&store, &cipher, "1//rt|proj-42").await;
    let refresher =
        TokenRefresher::new(store.clone(), cipher.clone(), &config_with_google_endpoint(url))
            .unwrap();

    let before = OffsetDateTime::now_utc();
    let updated = refresher
        .refresh_if_expired(account.clone(), ProviderKind::Google)
        .await
        .unwrap();

    assert_eq!(cipher.decrypt(&updated.encrypted_access_token).unwrap(), "A2");
    // No refresh token in the response: the old ciphertext is retained.
    assert_eq!(updated.encrypted_refresh_token, account.encrypted_refresh_token);
    let lifetime = updated.expires_at - before;
    assert!(lifetime > Duration::minutes(55) && lifetime <= Duration::minutes(61));

    let persisted = store.find_oauth_account(account.id).await.unwrap().unwrap();
    assert_eq!(persisted.encrypted_access_token, updated.encrypted_access_token);
}

#[tokio::test]
async fn rotated_refresh_token_keeps_project_suffix() {
    let store = scratch_store().await;
    let cipher = CredentialCipher::from_hex(KEY_HEX).unwrap();
    let url = spawn_stub(StubState {
        hits: Arc::new(AtomicUsize::new(0)),
        body: r#"{"access_token":"A2","refresh_token":"1//rt-new","expires_in":3600}"#,
        status: 200,
    })
    .await;

    let account = expired_account(&store, &cipher, "1//rt|proj-42").await;
    let refresher =
        TokenRefresher::new(store, cipher.clone(), &config_with_google_endpoint(url)).unwrap();

    let updated = refresher
        .refresh_if_expired(account, ProviderKind::Google)
        .await
        .unwrap();
    assert_eq!(
        cipher.decrypt(&updated.encrypted_refresh_token).unwrap(),
        "1//rt-new|proj-42"
    );
}

#[tokio::test]
async fn rejected_refresh_surfaces_error() {
    let store = scratch_store().await;
    let cipher = CredentialCipher::from_hex(KEY_HEX).unwrap();
    let url = spawn_stub(StubState {
        hits: Arc::new(AtomicUsize::new(0)),
        body: r#"{"error":"invalid_grant"}"#,
        status: 400,
    })
    .await;

    let account = expired_account(&store, &cipher, "1//rt").await;
    let refresher =
        TokenRefresher::new(store, cipher, &config_with_google_endpoint(url)).unwrap();

    let err = refresher
        .refresh_if_expired(account, ProviderKind::Google)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"));
}
