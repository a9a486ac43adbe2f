use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use polygate_common::{CredentialCipher, GatewayConfig, ProviderKind};
use polygate_storage::{GatewayStore, StorageError, entities};

/// Tokens expiring within this window are refreshed eagerly.
const EXPIRY_SLACK: Duration = Duration::minutes(5);

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("oauth client is not configured for {0}")]
    NotConfigured(&'static str),
    #[error("stored token could not be unsealed")]
    Unseal,
    #[error("token endpoint request failed: {0}")]
    Http(String),
    #[error("token endpoint rejected refresh: {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Serialize)]
struct GoogleRefreshForm<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Serialize)]
struct OpenAiRefreshBody<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Refreshes expired OAuth access tokens and persists the re-sealed
/// triple. No single-flight: concurrent refreshes of one account are
/// wasteful but both land in a valid state.
#[derive(Clone)]
pub struct TokenRefresher {
    store: GatewayStore,
    cipher: CredentialCipher,
    client: wreq::Client,
    google_token_url: String,
    openai_token_url: String,
    google_client_id: Option<String>,
    google_client_secret: Option<String>,
    openai_client_id: Option<String>,
}

impl TokenRefresher {
    pub fn new(
        store: GatewayStore,
        cipher: CredentialCipher,
        config: &GatewayConfig,
    ) -> Result<Self, wreq::Error> {
        Ok(Self {
            store,
            cipher,
            client: wreq::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(5))
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            google_token_url: config.google_token_url.clone(),
            openai_token_url: config.openai_token_url.clone(),
            google_client_id: config.google_client_id.clone(),
            google_client_secret: config.google_client_secret.clone(),
            openai_client_id: config.openai_client_id.clone(),
        })
    }

    /// Returns the account unchanged while its access token has more than
    /// five minutes of life left; otherwise refreshes and persists.
    pub async fn refresh_if_expired(
        &self,
        account: entities::oauth_accounts::Model,
        kind: ProviderKind,
    ) -> Result<entities::oauth_accounts::Model, RefreshError> {
        let now = OffsetDateTime::now_utc();
        if account.expires_at > now + EXPIRY_SLACK {
            return Ok(account);
        }

        let refresh_plain = self
            .cipher
            .decrypt(&account.encrypted_refresh_token)
            .map_err(|_| RefreshError::Unseal)?;

        let (token, new_refresh_plain) = match kind {
            ProviderKind::OpenAi => {
                let token = self.refresh_openai(&refresh_plain).await?;
                let new_refresh = token.refresh_token.clone();
                (token, new_refresh)
            }
            _ => {
                // Google and generic oauth providers share the Google flow.
                // The refresh token may carry an embedded `|<projectId>`
                // suffix that never leaves the gateway.
                let (bare, suffix) = split_project_suffix(&refresh_plain);
                let token = self.refresh_google(bare).await?;
                let new_refresh = token.refresh_token.clone().map(|fresh| match suffix {
                    Some(project) => format!("{fresh}|{project}"),
                    None => fresh,
                });
                (token, new_refresh)
            }
        };

        let sealed_access = self
            .cipher
            .encrypt(&token.access_token)
            .map_err(|_| RefreshError::Unseal)?;
        let sealed_refresh = match new_refresh_plain {
            Some(plain) => Some(self.cipher.encrypt(&plain).map_err(|_| RefreshError::Unseal)?),
            None => None,
        };
        let expires_at = OffsetDateTime::now_utc() + Duration::seconds(token.expires_in);

        Ok(self
            .store
            .update_oauth_tokens(account.id, sealed_access, sealed_refresh, expires_at)
            .await?)
    }

    async fn refresh_google(&self, refresh_token: &str) -> Result<TokenResponse, RefreshError> {
        let client_id = self
            .google_client_id
            .as_deref()
            .ok_or(RefreshError::NotConfigured("google"))?;
        let client_secret = self
            .google_client_secret
            .as_deref()
            .ok_or(RefreshError::NotConfigured("google"))?;

        let response = self
            .client
            .post(&self.google_token_url)
            .form(&GoogleRefreshForm {
                grant_type: "refresh_token",
                refresh_token,
                client_id,
                client_secret,
            })
            .send()
            .await
            .map_err(|err| RefreshError::Http(err.to_string()))?;
        read_token_response(response).await
    }

    async fn refresh_openai(&self, refresh_token: &str) -> Result<TokenResponse, RefreshError> {
        let client_id = self
            .openai_client_id
            .as_deref()
            .ok_or(RefreshError::NotConfigured("openai"))?;

        let response = self
            .client
            .post(&self.openai_token_url)
            .json(&OpenAiRefreshBody {
                grant_type: "refresh_token",
                refresh_token,
                client_id,
            })
            .send()
            .await
            .map_err(|err| RefreshError::Http(err.to_string()))?;
        read_token_response(response).await
    }
}

async fn read_token_response(response: wreq::Response) -> Result<TokenResponse, RefreshError> {
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(RefreshError::Rejected { status, body });
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|err| RefreshError::Http(err.to_string()))
}

fn split_project_suffix(refresh_token: &str) -> (&str, Option<&str>) {
    match refresh_token.split_once('|') {
        Some((bare, project)) if !project.is_empty() => (bare, Some(project)),
        _ => (refresh_token, None),
    }
}
