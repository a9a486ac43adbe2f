use tracing::{debug, warn};
use uuid::Uuid;

use polygate_common::{AuthKind, CredentialCipher, GatewayError, ProviderKind, UpstreamGuard};
use polygate_storage::{GatewayStore, entities};
use polygate_translate::AuthMaterial;

use crate::refresh::TokenRefresher;
use crate::select::AccountSelector;

#[derive(Clone)]
pub struct OAuthGrant {
    pub account_id: Uuid,
    pub access_token: String,
}

/// A fully materialized candidate for one request: SSRF-checked provider,
/// model row, and decrypted credentials. Holds plaintext secrets.
/// Never logged or persisted.
#[derive(Clone)]
pub struct ResolvedRoute {
    pub provider: entities::providers::Model,
    pub model: entities::models::Model,
    pub kind: ProviderKind,
    pub auth_kind: AuthKind,
    pub credentials: Option<String>,
    pub oauth: Option<OAuthGrant>,
}

impl ResolvedRoute {
    pub fn auth_material(&self) -> AuthMaterial {
        match self.auth_kind {
            AuthKind::Bearer => match &self.credentials {
                Some(credentials) => AuthMaterial::Bearer(credentials.clone()),
                None => AuthMaterial::None,
            },
            AuthKind::Header => match &self.credentials {
                Some(credentials) => AuthMaterial::Header(credentials.clone()),
                None => AuthMaterial::None,
            },
            AuthKind::OAuth => match &self.oauth {
                Some(grant) => AuthMaterial::Bearer(grant.access_token.clone()),
                None => AuthMaterial::None,
            },
            AuthKind::None => AuthMaterial::None,
        }
    }
}

impl std::fmt::Debug for ResolvedRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedRoute")
            .field("provider", &self.provider.name)
            .field("model", &self.model.public_name)
            .field("kind", &self.kind)
            .field("auth_kind", &self.auth_kind)
            .finish_non_exhaustive()
    }
}

/// Walks a public model's fallback chain and returns the first candidate
/// that survives the SSRF guard, credential unsealing, and (for OAuth
/// providers) account selection plus token refresh.
#[derive(Clone)]
pub struct RouteResolver {
    store: GatewayStore,
    guard: UpstreamGuard,
    cipher: CredentialCipher,
    selector: AccountSelector,
    refresher: TokenRefresher,
}

impl RouteResolver {
    pub fn new(
        store: GatewayStore,
        guard: UpstreamGuard,
        cipher: CredentialCipher,
        selector: AccountSelector,
        refresher: TokenRefresher,
    ) -> Self {
        Self {
            store,
            guard,
            cipher,
            selector,
            refresher,
        }
    }

    pub async fn resolve(&self, public_name: &str) -> Result<ResolvedRoute, GatewayError> {
        let candidates = self
            .store
            .route_candidates(public_name)
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;
        if candidates.is_empty() {
            return Err(GatewayError::model_not_found(public_name));
        }

        for candidate in candidates {
            let provider = candidate.provider;
            let model = candidate.model;

            let Some(kind) = ProviderKind::parse(&provider.kind) else {
                warn!(provider = %provider.name, kind = %provider.kind, "unknown provider kind");
                continue;
            };
            let Some(auth_kind) = AuthKind::parse(&provider.auth_kind) else {
                warn!(provider = %provider.name, auth = %provider.auth_kind, "unknown auth kind");
                continue;
            };

            if let Err(reason) = self.guard.check(&provider.base_url) {
                warn!(provider = %provider.name, %reason, "upstream url rejected");
                continue;
            }

            let mut credentials = None;
            if auth_kind.needs_static_credentials() {
                let Some(sealed) = provider.encrypted_credentials.as_deref() else {
                    warn!(provider = %provider.name, "auth requires credentials but none stored");
                    continue;
                };
                match self.cipher.decrypt(sealed) {
                    Ok(plain) => credentials = Some(plain),
                    Err(err) => {
                        warn!(provider = %provider.name, %err, "credential unseal failed");
                        continue;
                    }
                }
            }

            let mut oauth = None;
            if auth_kind == AuthKind::OAuth {
                let Some(account) = self.selector.select(provider.id).await else {
                    debug!(provider = %provider.name, "no oauth account available");
                    continue;
                };
                let account = match self.refresher.refresh_if_expired(account, kind).await {
                    Ok(account) => account,
                    Err(err) => {
                        warn!(provider = %provider.name, %err, "token refresh failed");
                        continue;
                    }
                };
                let access_token = match self.cipher.decrypt(&account.encrypted_access_token) {
                    Ok(plain) => plain,
                    Err(err) => {
                        warn!(provider = %provider.name, %err, "access token unseal failed");
                        continue;
                    }
                };
                oauth = Some(OAuthGrant {
                    account_id: account.id,
                    access_token,
                });
            }

            return Ok(ResolvedRoute {
                provider,
                model,
                kind,
                auth_kind,
                credentials,
                oauth,
            });
        }

        Err(GatewayError::provider(format!(
            "no available provider for {public_name}"
        )))
    }
}
