use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use polygate_common::{
    CredentialCipher, GatewayConfig, Posture,
    config::{DEFAULT_GOOGLE_TOKEN_URL, DEFAULT_OPENAI_TOKEN_URL},
};
use polygate_storage::GatewayStore;

use crate::state::Gateway;
use crate::upstream::WreqUpstreamClient;

#[derive(Debug, Clone, Parser)]
#[command(name = "polygate", version, about = "Multi-provider LLM API gateway")]
pub struct CliArgs {
    /// Relational DB DSN (sqlite/mysql/postgres).
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// 64 hex chars; the AES-256-GCM key sealing credentials at rest.
    #[arg(long, env = "ENCRYPTION_KEY")]
    pub encryption_key: String,

    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "GATEWAY_PORT", default_value_t = 4000)]
    pub port: u16,

    /// Public base URL, used when constructing OAuth redirects.
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:4000")]
    pub base_url: String,

    /// `production` enforces HTTPS upstreams and suppresses internal
    /// error details.
    #[arg(long, env = "GATEWAY_ENV", default_value = "development")]
    pub posture: String,

    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
    pub google_client_secret: Option<String>,

    #[arg(long, env = "OPENAI_CLIENT_ID")]
    pub openai_client_id: Option<String>,

    #[arg(long, env = "GOOGLE_TOKEN_URL", default_value = DEFAULT_GOOGLE_TOKEN_URL)]
    pub google_token_url: String,

    #[arg(long, env = "OPENAI_TOKEN_URL", default_value = DEFAULT_OPENAI_TOKEN_URL)]
    pub openai_token_url: String,

    /// Comma-separated host allowlist; empty keeps the built-in list.
    #[arg(long, env = "ALLOWED_UPSTREAM_HOSTS")]
    pub allowed_upstream_hosts: Option<String>,

    #[arg(long, env = "DISABLE_SSRF_PROTECTION")]
    pub disable_ssrf_protection: Option<String>,

    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = 60_000)]
    pub rate_limit_window_ms: u64,

    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = 60)]
    pub rate_limit_max_requests: u32,

    #[arg(long, env = "GLOBAL_RATE_LIMIT_MAX", default_value_t = 1000)]
    pub global_rate_limit_max: u32,
}

impl CliArgs {
    pub fn into_config(self) -> GatewayConfig {
        let mut config = GatewayConfig::defaults(self.database_url, self.encryption_key);
        config.host = self.host;
        config.port = self.port;
        config.base_url = self.base_url;
        config.posture = Posture::parse(&self.posture);
        config.google_client_id = sanitize(self.google_client_id);
        config.google_client_secret = sanitize(self.google_client_secret);
        config.openai_client_id = sanitize(self.openai_client_id);
        config.google_token_url = self.google_token_url;
        config.openai_token_url = self.openai_token_url;
        if let Some(hosts) = sanitize(self.allowed_upstream_hosts) {
            config.allowed_upstream_hosts = hosts
                .split(',')
                .map(|host| host.trim().to_string())
                .filter(|host| !host.is_empty())
                .collect();
        }
        config.disable_ssrf_protection = parse_bool(self.disable_ssrf_protection.as_deref());
        config.rate_limit_window_ms = self.rate_limit_window_ms;
        config.rate_limit_max_requests = self.rate_limit_max_requests;
        config.global_rate_limit_max = self.global_rate_limit_max;
        config
    }
}

fn sanitize(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn parse_bool(value: Option<&str>) -> bool {
    matches!(
        value.map(|item| item.trim().to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

pub async fn bootstrap_from_env() -> anyhow::Result<Arc<Gateway>> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Arc<Gateway>> {
    let config = args.into_config();

    // Fail fast: a missing or malformed key must abort startup, not
    // surface per-request.
    CredentialCipher::from_hex(&config.encryption_key).context("ENCRYPTION_KEY")?;

    let store = GatewayStore::connect(&config.database_url)
        .await
        .context("connect storage")?;
    store.sync().await.context("schema sync")?;

    let upstream = Arc::new(WreqUpstreamClient::new().context("build upstream client")?);
    Gateway::build(config, store, upstream)
}
